//Traits
pub use vulkano::{
    pipeline::graphics::vertex_input::VertexDefinition,
    pipeline::{graphics::vertex_input::Vertex, Pipeline},
    sync::GpuFuture,
};

//Types and such
pub mod vk {
    pub use vulkano::{
        buffer::{Buffer, BufferContents, BufferCreateInfo, BufferUsage, Subbuffer},
        command_buffer::{
            allocator::StandardCommandBufferAllocator,
            AutoCommandBufferBuilder,
            BufferImageCopy,
            CommandBufferUsage,
            CopyBufferInfo,
            //Image ops
            CopyBufferToImageInfo,
            PrimaryAutoCommandBuffer,
            //Renderpass
            RenderPassBeginInfo,
            SubpassBeginInfo,
            SubpassContents,
            SubpassEndInfo,
        },
        descriptor_set::{
            allocator::{StandardDescriptorSetAllocator, StandardDescriptorSetAllocatorCreateInfo},
            layout::{
                DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
                DescriptorType,
            },
            PersistentDescriptorSet, WriteDescriptorSet,
        },
        device::{
            physical::{PhysicalDevice, PhysicalDeviceType},
            Device, DeviceCreateInfo, DeviceExtensions, Features, Queue, QueueCreateInfo,
            QueueFlags,
        },
        format::{ClearValue, Format},
        image::{
            sampler::{
                ComponentMapping, ComponentSwizzle, Filter, Sampler, SamplerAddressMode,
                SamplerCreateInfo,
            },
            view::{ImageView, ImageViewCreateInfo},
            Image, ImageAspects, ImageCreateInfo, ImageSubresourceLayers, ImageUsage,
        },
        instance::{Instance, InstanceCreateInfo, InstanceExtensions},
        library::VulkanLibrary,
        memory::allocator::{
            AllocationCreateInfo, MemoryAllocator, MemoryTypeFilter, StandardMemoryAllocator,
        },
        pipeline::{
            graphics::{
                color_blend::{
                    AttachmentBlend, BlendFactor, BlendOp, ColorBlendAttachmentState,
                    ColorBlendState,
                },
                input_assembly::{InputAssemblyState, PrimitiveTopology},
                vertex_input::{Vertex, VertexInputState},
                multisample::MultisampleState,
                rasterization::{CullMode, RasterizationState},
                viewport::{Scissor, Viewport, ViewportState},
                GraphicsPipeline, GraphicsPipelineCreateInfo,
            },
            layout::{PipelineLayout, PipelineLayoutCreateInfo, PushConstantRange},
            DynamicState, PipelineShaderStageCreateInfo,
        },
        render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, Subpass},
        shader::ShaderStages,
        swapchain::{
            acquire_next_image, CompositeAlpha, PresentMode, Surface, SurfaceInfo, Swapchain,
            SwapchainAcquireFuture, SwapchainCreateInfo, SwapchainPresentInfo,
        },
        sync,
        sync::{
            future::{FenceSignalFuture, NowFuture},
            HostAccessError, Sharing,
        },
        DeviceSize, Validated, ValidationError, Version, VulkanError,
    };
}
