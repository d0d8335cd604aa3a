//! The swapchain half of the frame loop. [`SwapchainBackend`] implements the device operations
//! that [`primwalk_core::frame::FrameRenderer`] sequences.

use crate::render_device::RenderContext;
use crate::vulkano_prelude::*;
use primwalk_core::frame::{
    Acquired, ChainInfo, FenceWaitError, FrameBackend, PresentChain, PresentMode, SlotFence,
    Submitted, SurfaceError, SurfaceState,
};
use primwalk_core::{AnyResult, Color};
use std::sync::Arc;
use std::time::Duration;

pub type FrameRenderer = primwalk_core::frame::FrameRenderer<SwapchainBackend>;
pub type Frame = primwalk_core::frame::Frame<SwapchainBackend>;
pub type BeginFrame = primwalk_core::frame::BeginFrame<SwapchainBackend>;
pub type Commands = vk::AutoCommandBufferBuilder<vk::PrimaryAutoCommandBuffer>;

fn from_vk_mode(mode: vk::PresentMode) -> Option<PresentMode> {
    Some(match mode {
        vk::PresentMode::Immediate => PresentMode::Immediate,
        vk::PresentMode::Mailbox => PresentMode::Mailbox,
        vk::PresentMode::Fifo => PresentMode::Fifo,
        vk::PresentMode::FifoRelaxed => PresentMode::FifoRelaxed,
        _ => return None,
    })
}
fn to_vk_mode(mode: PresentMode) -> vk::PresentMode {
    match mode {
        PresentMode::Immediate => vk::PresentMode::Immediate,
        PresentMode::Mailbox => vk::PresentMode::Mailbox,
        PresentMode::Fifo => vk::PresentMode::Fifo,
        PresentMode::FifoRelaxed => vk::PresentMode::FifoRelaxed,
    }
}

/// Swapchain, plus a framebuffer per image.
pub struct SwapchainChain {
    swapchain: Arc<vk::Swapchain>,
    framebuffers: Vec<Arc<vk::Framebuffer>>,
    present_mode: PresentMode,
}
impl SwapchainChain {
    pub fn swapchain(&self) -> &Arc<vk::Swapchain> {
        &self.swapchain
    }
    pub fn framebuffers(&self) -> &[Arc<vk::Framebuffer>] {
        &self.framebuffers
    }
}
impl PresentChain for SwapchainChain {
    fn extent(&self) -> [u32; 2] {
        self.swapchain.image_extent()
    }
    fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }
    fn present_mode(&self) -> PresentMode {
        self.present_mode
    }
}

/// Completion of a frame's submission and presentation.
pub struct FrameFence(vk::FenceSignalFuture<Box<dyn GpuFuture>>);
impl SlotFence for FrameFence {
    fn wait(&mut self, timeout: Duration) -> Result<(), FenceWaitError> {
        match self.0.wait(Some(timeout)) {
            Ok(()) => Ok(()),
            Err(vk::Validated::Error(vk::VulkanError::Timeout)) => Err(FenceWaitError::Timeout),
            Err(err) => Err(FenceWaitError::Device(err.into())),
        }
    }
}

fn surface_error(err: vk::Validated<vk::VulkanError>) -> SurfaceError {
    match err {
        vk::Validated::Error(vk::VulkanError::OutOfDate) => SurfaceError::OutOfDate,
        vk::Validated::Error(vk::VulkanError::Timeout | vk::VulkanError::NotReady) => {
            SurfaceError::Timeout
        }
        err => SurfaceError::Fatal(err.into()),
    }
}

pub struct SwapchainBackend {
    context: Arc<RenderContext>,
    surface: Arc<vk::Surface>,
    window: Arc<winit::window::Window>,
    format: vk::Format,
    color_space: vulkano::swapchain::ColorSpace,
    render_pass: Arc<vk::RenderPass>,
    clear_color: Color,
}
impl SwapchainBackend {
    /// `clear_color` is straight sRGB, as in the renderer config.
    pub fn new(
        context: Arc<RenderContext>,
        surface: Arc<vk::Surface>,
        window: Arc<winit::window::Window>,
        clear_color: [f32; 4],
    ) -> AnyResult<Self> {
        let formats = context
            .physical_device()
            .surface_formats(&surface, vk::SurfaceInfo::default())?;
        // Blending happens in linear, so an sRGB target is wanted.
        let preferred = formats.iter().find(|(format, _)| {
            matches!(
                format,
                vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB
            )
        });
        let Some(&(format, color_space)) = preferred.or_else(|| formats.first()) else {
            return Err(anyhow::anyhow!("Device reported no valid surface formats."));
        };
        log::info!("Surface format {format:?} {color_space:?}");
        let clear_color = Color::from_array_lossy(clear_color).unwrap_or_else(|_| {
            log::warn!("Clear color {clear_color:?} is not finite, using black");
            Color::BLACK
        });

        let render_pass = vulkano::single_pass_renderpass!(
            context.device().clone(),
            attachments : {
                swapchain_color : {
                    format: format,
                    samples: 1,
                    load_op: Clear,
                    store_op: Store,
                },
            },
            pass: {
                color: [swapchain_color],
                depth_stencil: {},
            },
        )?;

        Ok(Self {
            context,
            surface,
            window,
            format,
            color_space,
            render_pass,
            clear_color,
        })
    }
    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }
    pub fn window(&self) -> &Arc<winit::window::Window> {
        &self.window
    }
    pub fn format(&self) -> vk::Format {
        self.format
    }
    /// The pass every frame's commands are recorded inside of.
    pub fn render_pass(&self) -> &Arc<vk::RenderPass> {
        &self.render_pass
    }
}

impl FrameBackend for SwapchainBackend {
    type Chain = SwapchainChain;
    type Acquire = vk::SwapchainAcquireFuture;
    type Commands = Commands;
    type Fence = FrameFence;

    fn surface(&mut self) -> AnyResult<SurfaceState> {
        let physical_device = self.context.physical_device();
        let capabilities =
            physical_device.surface_capabilities(&self.surface, vk::SurfaceInfo::default())?;
        let present_modes = physical_device
            .surface_present_modes(&self.surface, vk::SurfaceInfo::default())?
            .filter_map(from_vk_mode)
            .collect();
        // The surface dictates its extent where it can. Otherwise, match the window.
        let extent = capabilities
            .current_extent
            .unwrap_or_else(|| self.window.inner_size().into());

        Ok(SurfaceState {
            extent: Some(extent),
            present_modes,
            min_image_count: capabilities.min_image_count,
            max_image_count: capabilities.max_image_count,
        })
    }
    fn wait_idle(&mut self) -> AnyResult<()> {
        self.context.wait_idle()
    }
    fn build_chain(
        &mut self,
        old: Option<SwapchainChain>,
        info: &ChainInfo,
    ) -> AnyResult<SwapchainChain> {
        let (swapchain, images) = if let Some(old) = &old {
            old.swapchain.recreate(vk::SwapchainCreateInfo {
                image_extent: info.extent,
                present_mode: to_vk_mode(info.present_mode),
                min_image_count: info.image_count,
                ..old.swapchain.create_info()
            })?
        } else {
            let capabilities = self
                .context
                .physical_device()
                .surface_capabilities(&self.surface, vk::SurfaceInfo::default())?;
            let supported_alpha = capabilities.supported_composite_alpha;
            let composite_alpha = if supported_alpha.contains_enum(vk::CompositeAlpha::Opaque) {
                vk::CompositeAlpha::Opaque
            } else {
                supported_alpha
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Device provided no alpha modes"))?
            };
            vk::Swapchain::new(
                self.context.device().clone(),
                self.surface.clone(),
                vk::SwapchainCreateInfo {
                    min_image_count: info.image_count,
                    image_format: self.format,
                    image_color_space: self.color_space,
                    image_extent: info.extent,
                    image_usage: vk::ImageUsage::COLOR_ATTACHMENT,
                    composite_alpha,
                    present_mode: to_vk_mode(info.present_mode),
                    clipped: true, // We wont read the framebuffer.
                    ..Default::default()
                },
            )?
        };

        let framebuffers = images
            .into_iter()
            .map(|image| -> AnyResult<_> {
                Ok(vk::Framebuffer::new(
                    self.render_pass.clone(),
                    vk::FramebufferCreateInfo {
                        attachments: vec![vk::ImageView::new_default(image)?],
                        ..Default::default()
                    },
                )?)
            })
            .collect::<AnyResult<Vec<_>>>()?;

        // The old views and framebuffers go only now that the replacement exists.
        drop(old);

        Ok(SwapchainChain {
            swapchain,
            framebuffers,
            present_mode: info.present_mode,
        })
    }
    fn acquire(
        &mut self,
        chain: &SwapchainChain,
        timeout: Option<Duration>,
    ) -> Result<Acquired<vk::SwapchainAcquireFuture>, SurfaceError> {
        let (index, suboptimal, token) =
            vk::acquire_next_image(chain.swapchain.clone(), timeout).map_err(surface_error)?;
        Ok(Acquired {
            index,
            suboptimal,
            token,
        })
    }
    fn record(&mut self, chain: &SwapchainChain, image_index: u32) -> AnyResult<Commands> {
        let Some(framebuffer) = chain.framebuffers.get(image_index as usize) else {
            anyhow::bail!("Present image {image_index} out-of-bounds");
        };
        let mut builder = vk::AutoCommandBufferBuilder::primary(
            self.context.allocators().command_buffer(),
            self.context.queues().graphics().idx(),
            vk::CommandBufferUsage::OneTimeSubmit,
        )?;
        builder
            .begin_render_pass(
                vk::RenderPassBeginInfo {
                    clear_values: vec![Some(vk::ClearValue::Float(self.clear_color.to_linear()))],
                    ..vk::RenderPassBeginInfo::framebuffer(framebuffer.clone())
                },
                vk::SubpassBeginInfo {
                    contents: vk::SubpassContents::Inline,
                    ..Default::default()
                },
            )?
            .set_viewport(
                0,
                smallvec::smallvec![vk::Viewport {
                    depth_range: 0.0..=1.0,
                    extent: framebuffer.extent().map(|dim| dim as f32),
                    offset: [0.0; 2],
                }],
            )?;
        Ok(builder)
    }
    fn submit(
        &mut self,
        chain: &SwapchainChain,
        acquired: Acquired<vk::SwapchainAcquireFuture>,
        mut commands: Commands,
    ) -> Result<Submitted<FrameFence>, SurfaceError> {
        let fatal = |err: anyhow::Error| SurfaceError::Fatal(err);
        commands
            .end_render_pass(vk::SubpassEndInfo::default())
            .map_err(|err| fatal(err.into()))?;
        let commands = commands.build().map_err(|err| fatal(err.into()))?;

        // Per a dire warning in the comments of vulkano, dropping swapchain futures can result
        // in that swapchain image being lost forever...!
        let bail_warning = defer::defer(|| log::warn!("Dropped swapchain future."));

        let render_complete = acquired
            .token
            .then_execute(self.context.queues().graphics().queue().clone(), commands)
            .map_err(|err| fatal(err.into()))?;

        self.window.pre_present_notify();

        let fence = render_complete
            .then_swapchain_present(
                self.context.queues().present().queue().clone(),
                vk::SwapchainPresentInfo::swapchain_image_index(
                    chain.swapchain.clone(),
                    acquired.index,
                ),
            )
            .boxed()
            .then_signal_fence_and_flush()
            .map_err(surface_error)?;

        std::mem::forget(bail_warning);

        Ok(Submitted {
            fence: FrameFence(fence),
            suboptimal: acquired.suboptimal,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{from_vk_mode, to_vk_mode};
    use crate::vulkano_prelude::vk;
    use primwalk_core::frame::PresentMode;

    #[test]
    fn present_modes_map_both_ways() {
        for mode in [
            PresentMode::Immediate,
            PresentMode::Mailbox,
            PresentMode::Fifo,
            PresentMode::FifoRelaxed,
        ] {
            assert_eq!(from_vk_mode(to_vk_mode(mode)), Some(mode));
        }
        // Modes the frame loop never asks for are filtered out.
        assert_eq!(from_vk_mode(vk::PresentMode::SharedDemandRefresh), None);
    }
}
