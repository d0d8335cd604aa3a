//! Turns a [`DrawList`] into draw calls inside a frame's render pass.

use crate::frame::{Commands, Frame};
use crate::image::GpuImage;
use crate::render_device::RenderContext;
use crate::vulkano_prelude::*;
use primwalk_core::{
    cache::TextureHandle,
    draw::{DrawList, UiVertex},
    font::Font,
    Bitmap, Color, TextureID,
};
use primwalk_core::AnyResult;
use std::sync::{Arc, Weak};

mod fs {
    vulkano_shaders::shader! {
        ty: "fragment",
        src:
        r"#version 460

        layout(binding = 0, set = 0) uniform sampler2D tex;

        layout(location = 0) in vec2 uv;
        layout(location = 1) in vec4 vertex_color;
        layout(location = 2) in vec2 local;
        layout(location = 3) flat in vec2 half_size;
        layout(location = 4) flat in vec4 params;

        layout(location = 0) out vec4 out_color;

        vec3 toLinear(vec3 sRGB)
        {
            bvec3 cutoff = lessThan(sRGB, vec3(0.04045));
            vec3 higher = pow((sRGB + vec3(0.055))/vec3(1.055), vec3(2.4));
            vec3 lower = sRGB/vec3(12.92);

            return mix(higher, lower, cutoff);
        }
        float median(float r, float g, float b) {
            return max(min(r, g), min(max(r, g), b));
        }
        // Signed distance to a rounded box centered at the origin.
        float roundedBox(vec2 p, vec2 half_extent, float radius) {
            vec2 q = abs(p) - (half_extent - vec2(radius));
            return length(max(q, vec2(0.0))) + min(max(q.x, q.y), 0.0) - radius;
        }

        void main() {
            uint mode = uint(params.x + 0.5);
            float radius = params.y;
            float px_range = params.z;

            //Vertex color is straight sRGB, convert to straight linear
            vec4 color = vec4(toLinear(vertex_color.rgb), vertex_color.a);

            if (mode == 2u) {
                // Distance field glyph. px_range is the screen size of the whole distance range.
                vec4 msd = texture(tex, uv);
                float sd = median(msd.r, msd.g, msd.b);
                float screen_distance = (sd - 0.5) * max(px_range, 1.0);
                color.a *= clamp(screen_distance + 0.5, 0.0, 1.0);
            } else {
                // Untextured quads sample the white texture.
                color *= texture(tex, uv);
                if (radius > 0.0) {
                    color.a *= clamp(0.5 - roundedBox(local, half_size, radius), 0.0, 1.0);
                }
            }

            //Convert to premul linear
            color.rgb *= color.a;
            out_color = color;
        }",
    }
}
mod vs {
    vulkano_shaders::shader! {
        ty: "vertex",
        src:
        r"#version 460

        layout(push_constant) uniform Matrix {
            mat4 ortho;
        } matrix;

        layout(location = 0) in vec2 position;
        layout(location = 1) in vec2 uv;
        layout(location = 2) in vec4 color;
        layout(location = 3) in vec2 local;
        layout(location = 4) in vec2 half_size;
        layout(location = 5) in vec4 params;

        layout(location = 0) out vec2 out_uv;
        layout(location = 1) out vec4 vertex_color;
        layout(location = 2) out vec2 out_local;
        layout(location = 3) flat out vec2 out_half_size;
        layout(location = 4) flat out vec4 out_params;

        void main() {
            gl_Position = matrix.ortho * vec4(position, 0.0, 1.0);
            out_uv = uv;
            vertex_color = color;
            out_local = local;
            out_half_size = half_size;
            out_params = params;
        }",
    }
}

#[derive(vk::BufferContents, vk::Vertex, Copy, Clone)]
#[repr(C)]
struct GpuVertex {
    #[format(R32G32_SFLOAT)]
    position: [f32; 2],
    #[format(R32G32_SFLOAT)]
    uv: [f32; 2],
    #[format(R32G32B32A32_SFLOAT)]
    color: [f32; 4],
    #[format(R32G32_SFLOAT)]
    local: [f32; 2],
    #[format(R32G32_SFLOAT)]
    half_size: [f32; 2],
    #[format(R32G32B32A32_SFLOAT)]
    params: [f32; 4],
}
impl From<UiVertex> for GpuVertex {
    fn from(value: UiVertex) -> Self {
        Self {
            position: value.position,
            uv: value.uv,
            color: value.color,
            local: value.local,
            half_size: value.half_size,
            params: value.params,
        }
    }
}

/// Per frame slot geometry. Grown on demand, never shrunk.
#[derive(Default)]
struct SlotBuffers {
    vertices: Option<vk::Subbuffer<[GpuVertex]>>,
    indices: Option<vk::Subbuffer<[u32]>>,
}

struct TextureSet {
    /// Descriptor sets keep their image alive, so the texture is tracked separately to know when
    /// to let go.
    texture: Weak<GpuImage>,
    descriptor_set: Arc<vk::PersistentDescriptorSet>,
}

pub struct UiRenderer {
    context: Arc<RenderContext>,
    pipeline: Arc<vk::GraphicsPipeline>,
    sampler: Arc<vk::Sampler>,
    white: Arc<GpuImage>,
    white_set: Arc<vk::PersistentDescriptorSet>,
    texture_sets: hashbrown::HashMap<TextureID, TextureSet>,
    slots: Vec<SlotBuffers>,
    list: DrawList<GpuImage>,
    scale_factor: f32,
}
impl UiRenderer {
    /// `render_pass` is the pass frames are recorded in, `frames_in_flight` the frame slot count.
    pub fn new(
        context: &Arc<RenderContext>,
        render_pass: &Arc<vk::RenderPass>,
        frames_in_flight: usize,
    ) -> AnyResult<Self> {
        let device = context.device().clone();

        let matrix_push_constant = vk::PushConstantRange {
            offset: 0,
            stages: vk::ShaderStages::VERTEX,
            size: std::mem::size_of::<vs::Matrix>() as u32,
        };
        let image_sampler_layout = vk::DescriptorSetLayout::new(
            device.clone(),
            vk::DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    vk::DescriptorSetLayoutBinding {
                        descriptor_count: 1,
                        stages: vk::ShaderStages::FRAGMENT,
                        ..vk::DescriptorSetLayoutBinding::descriptor_type(
                            vk::DescriptorType::CombinedImageSampler,
                        )
                    },
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            },
        )?;

        let layout = vk::PipelineLayout::new(
            device.clone(),
            vk::PipelineLayoutCreateInfo {
                push_constant_ranges: vec![matrix_push_constant],
                set_layouts: vec![image_sampler_layout],
                ..Default::default()
            },
        )?;

        let fragment = fs::load(device.clone())?;
        let vertex = vs::load(device.clone())?;

        let Some(fragment_entry) = fragment.entry_point("main") else {
            anyhow::bail!("UI fragment shader has no entry point");
        };
        let Some(vertex_entry) = vertex.entry_point("main") else {
            anyhow::bail!("UI vertex shader has no entry point");
        };

        let fragment_stage = vk::PipelineShaderStageCreateInfo::new(fragment_entry);
        let vertex_stage = vk::PipelineShaderStageCreateInfo::new(vertex_entry.clone());

        let premul = {
            let premul = vk::AttachmentBlend {
                src_alpha_blend_factor: vk::BlendFactor::One,
                src_color_blend_factor: vk::BlendFactor::One,
                dst_alpha_blend_factor: vk::BlendFactor::OneMinusSrcAlpha,
                dst_color_blend_factor: vk::BlendFactor::OneMinusSrcAlpha,
                alpha_blend_op: vk::BlendOp::Add,
                color_blend_op: vk::BlendOp::Add,
            };
            let blend_states = vk::ColorBlendAttachmentState {
                blend: Some(premul),
                ..Default::default()
            };
            vk::ColorBlendState::with_attachment_states(1, blend_states)
        };

        let Some(subpass) = vk::Subpass::from(render_pass.clone(), 0) else {
            anyhow::bail!("Render pass has no subpass");
        };

        let pipeline = vk::GraphicsPipeline::new(
            device.clone(),
            None,
            vk::GraphicsPipelineCreateInfo {
                color_blend_state: Some(premul),
                input_assembly_state: Some(vk::InputAssemblyState {
                    topology: vk::PrimitiveTopology::TriangleList,
                    primitive_restart_enable: false,
                    ..Default::default()
                }),
                multisample_state: Some(vk::MultisampleState::default()),
                rasterization_state: Some(vk::RasterizationState {
                    cull_mode: vk::CullMode::None,
                    ..Default::default()
                }),
                vertex_input_state: Some(
                    GpuVertex::per_vertex().definition(&vertex_entry.info().input_interface)?,
                ),
                // One dynamic viewport and scissor
                viewport_state: Some(vk::ViewportState::default()),
                dynamic_state: [vk::DynamicState::Viewport, vk::DynamicState::Scissor]
                    .into_iter()
                    .collect(),
                subpass: Some(subpass.into()),
                stages: smallvec::smallvec![vertex_stage, fragment_stage,],
                ..vk::GraphicsPipelineCreateInfo::layout(layout)
            },
        )?;

        let sampler = vk::Sampler::new(
            device,
            vk::SamplerCreateInfo {
                mag_filter: vk::Filter::Linear,
                min_filter: vk::Filter::Linear,
                address_mode: [vk::SamplerAddressMode::ClampToEdge; 3],
                ..Default::default()
            },
        )?;

        let white = Arc::new(GpuImage::from_bitmap(context, &Bitmap::white_pixel())?);
        let white_set = make_set(context, &pipeline, &sampler, &white)?;

        Ok(Self {
            context: context.clone(),
            pipeline,
            sampler,
            white,
            white_set,
            texture_sets: hashbrown::HashMap::new(),
            slots: std::iter::repeat_with(SlotBuffers::default)
                .take(frames_in_flight.max(1))
                .collect(),
            list: DrawList::new(),
            scale_factor: 1.0,
        })
    }
    /// Physical pixels per logical pixel. Draw positions are logical.
    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        if scale_factor.is_finite() && scale_factor > 0.0 {
            self.scale_factor = scale_factor;
        }
    }
    /// The 1x1 white stand-in used for untextured draws.
    pub fn white_texture(&self) -> &Arc<GpuImage> {
        &self.white
    }
    /// The accumulated draws, for widgets to emit into.
    pub fn draw_list(&mut self) -> &mut DrawList<GpuImage> {
        &mut self.list
    }
    pub fn draw_rect(
        &mut self,
        position: [f32; 2],
        width: f32,
        height: f32,
        color: Color,
        border_radius: Option<f32>,
        texture: Option<&Arc<GpuImage>>,
    ) {
        self.list
            .draw_rect(position, width, height, color, border_radius, texture);
    }
    pub fn draw_text(
        &mut self,
        position: [f32; 2],
        text: &str,
        size: f32,
        color: Color,
        font: &Font<GpuImage>,
    ) {
        self.list.draw_text(position, text, size, color, font);
    }
    /// Record everything drawn since the last call into `frame`, then start over.
    pub fn on_render(&mut self, frame: &mut Frame) -> AnyResult<()> {
        let result = self.record(frame);
        self.list.clear();
        result
    }
    fn record(&mut self, frame: &mut Frame) -> AnyResult<()> {
        // Forget sets whose texture is gone. Frames still using them hold their own reference.
        self.texture_sets
            .retain(|_, set| set.texture.strong_count() != 0);

        if self.list.is_empty() {
            return Ok(());
        }
        let slot = frame.slot();
        let Some(buffers) = self.slots.get_mut(slot) else {
            anyhow::bail!("Frame slot {slot} out of range");
        };
        let vertices = write_growing(
            &self.context,
            &mut buffers.vertices,
            vk::BufferUsage::VERTEX_BUFFER,
            self.list.vertices().iter().copied().map(GpuVertex::from),
            self.list.vertices().len(),
        )?;
        let indices = write_growing(
            &self.context,
            &mut buffers.indices,
            vk::BufferUsage::INDEX_BUFFER,
            self.list.indices().iter().copied(),
            self.list.indices().len(),
        )?;

        let extent = frame.extent();
        let matrix = cgmath::ortho(
            0.0,
            extent[0] as f32 / self.scale_factor,
            0.0,
            extent[1] as f32 / self.scale_factor,
            -1.0,
            1.0,
        );
        let pipeline_layout = self.pipeline.layout().clone();

        let commands: &mut Commands = frame.commands();
        commands
            .bind_pipeline_graphics(self.pipeline.clone())?
            .set_viewport(
                0,
                smallvec::smallvec![vk::Viewport {
                    depth_range: 0.0..=1.0,
                    extent: extent.map(|dim| dim as f32),
                    offset: [0.0; 2],
                }],
            )?
            .set_scissor(
                0,
                smallvec::smallvec![vk::Scissor {
                    offset: [0, 0],
                    extent,
                }],
            )?
            .bind_vertex_buffers(0, vertices)?
            .bind_index_buffer(indices)?
            .push_constants(
                pipeline_layout.clone(),
                0,
                vs::Matrix {
                    ortho: matrix.into(),
                },
            )?;

        for batch in self.list.batches() {
            let descriptor_set = match &batch.texture {
                None => self.white_set.clone(),
                Some(texture) => {
                    if let Some(set) = self.texture_sets.get(&texture.texture_id()) {
                        set.descriptor_set.clone()
                    } else {
                        let descriptor_set =
                            make_set(&self.context, &self.pipeline, &self.sampler, texture)?;
                        log::trace!("New descriptor set for {}", texture.texture_id());
                        self.texture_sets.insert(
                            texture.texture_id(),
                            TextureSet {
                                texture: Arc::downgrade(texture),
                                descriptor_set: descriptor_set.clone(),
                            },
                        );
                        descriptor_set
                    }
                }
            };
            //Maybe there's a better way than rebinding every draw.
            commands
                .bind_descriptor_sets(
                    self.pipeline.bind_point(),
                    pipeline_layout.clone(),
                    0,
                    descriptor_set,
                )?
                .draw_indexed(batch.index_count, 1, batch.first_index, 0, 0)?;
        }
        Ok(())
    }
}

fn make_set(
    context: &RenderContext,
    pipeline: &vk::GraphicsPipeline,
    sampler: &Arc<vk::Sampler>,
    texture: &GpuImage,
) -> AnyResult<Arc<vk::PersistentDescriptorSet>> {
    let Some(layout) = pipeline.layout().set_layouts().first() else {
        anyhow::bail!("UI shader needs a sampler!");
    };
    Ok(vk::PersistentDescriptorSet::new(
        context.allocators().descriptor_set(),
        layout.clone(),
        [vk::WriteDescriptorSet::image_view_sampler(
            0,
            texture.view().clone(),
            sampler.clone(),
        )],
        [],
    )?)
}

/// Write `len` items from `data` into `buffer`, replacing it with a larger one first if it's too
/// small. Returns the written prefix.
fn write_growing<T: vk::BufferContents + Copy>(
    context: &RenderContext,
    buffer: &mut Option<vk::Subbuffer<[T]>>,
    usage: vk::BufferUsage,
    data: impl Iterator<Item = T>,
    len: usize,
) -> AnyResult<vk::Subbuffer<[T]>> {
    let len = len as vk::DeviceSize;
    let current = buffer.as_ref().filter(|b| b.len() >= len).cloned();
    let target = if let Some(current) = current {
        current
    } else {
        let capacity = len.next_power_of_two().max(64);
        log::debug!(
            "Growing UI {usage:?} buffer to {}",
            human_bytes::human_bytes((capacity * std::mem::size_of::<T>() as u64) as f64)
        );
        let new = vk::Buffer::new_slice::<T>(
            context.allocators().memory().clone(),
            vk::BufferCreateInfo {
                usage,
                ..Default::default()
            },
            vk::AllocationCreateInfo {
                memory_type_filter: vk::MemoryTypeFilter::HOST_SEQUENTIAL_WRITE
                    | vk::MemoryTypeFilter::PREFER_DEVICE,
                ..Default::default()
            },
            capacity,
        )?;
        *buffer = Some(new.clone());
        new
    };
    let target = target.slice(0..len);
    {
        // The slot's previous frame has retired, so the device is done with it.
        let mut write = target.write()?;
        for (dst, src) in write.iter_mut().zip(data) {
            *dst = src;
        }
    }
    Ok(target)
}

#[cfg(test)]
mod test {
    use super::GpuVertex;
    use crate::vulkano_prelude::*;

    #[test]
    fn vertex_layout_matches_core() {
        let description = GpuVertex::per_vertex();
        assert_eq!(description.stride as usize, std::mem::size_of::<GpuVertex>());
        assert_eq!(
            std::mem::size_of::<GpuVertex>(),
            std::mem::size_of::<primwalk_core::draw::UiVertex>()
        );
        assert_eq!(description.members.len(), 6);
        assert_eq!(description.members["position"].offset, 0);
        assert_eq!(description.members["params"].offset, 48);
        assert_eq!(description.members["params"].format, vk::Format::R32G32B32A32_SFLOAT);
    }
}
