use crate::frame::{FrameRenderer, SwapchainBackend};
use crate::image::GpuResources;
use crate::render_device::RenderContext;
use crate::ui_render::UiRenderer;
use primwalk_core::cache::ResourceCache;
use primwalk_core::config::RendererConfig;
use primwalk_core::frame::{BeginFrame, FrameError};
use primwalk_core::AnyResult;

use std::sync::Arc;

/// A window and the event loop that drives it, before any device exists.
pub struct WindowSurface {
    event_loop: winit::event_loop::EventLoop<()>,
    win: Arc<winit::window::Window>,
}
impl WindowSurface {
    pub fn new(title: &str) -> AnyResult<Self> {
        let event_loop = winit::event_loop::EventLoopBuilder::default().build()?;
        let win = winit::window::WindowBuilder::default()
            .with_title(title)
            .with_min_inner_size(winit::dpi::LogicalSize::new(320u32, 240u32))
            .with_transparent(false)
            .build(&event_loop)?;

        Ok(Self {
            event_loop,
            win: Arc::new(win),
        })
    }
    pub fn window(&self) -> Arc<winit::window::Window> {
        self.win.clone()
    }
    pub fn event_loop(&self) -> &winit::event_loop::EventLoop<()> {
        &self.event_loop
    }
    /// Create the device and renderer. The event loop is handed back for the caller to run.
    pub fn with_renderer(
        self,
        config: &RendererConfig,
    ) -> AnyResult<(winit::event_loop::EventLoop<()>, Renderer)> {
        let (context, surface) =
            RenderContext::new_with_window(&self.event_loop, self.win.clone(), config.validation)?;
        let backend = SwapchainBackend::new(
            context.clone(),
            surface,
            self.win.clone(),
            config.clear_color,
        )?;
        let ui = UiRenderer::new(
            &context,
            backend.render_pass(),
            config.frame.frames_in_flight,
        )?;
        let resources = Arc::new(ResourceCache::new(
            GpuResources::new(context.clone()),
            config.atlas.clone(),
        ));
        let frames = FrameRenderer::new(backend, config.frame.clone());

        Ok((
            self.event_loop,
            Renderer {
                frames,
                ui,
                resources,
                win: self.win,
                _context: context,
            },
        ))
    }
}

/// Everything needed to draw UI into a window.
pub struct Renderer {
    // Declared first to drop first: retires in-flight frames before anything they use goes away.
    frames: FrameRenderer,
    ui: UiRenderer,
    resources: Arc<ResourceCache<GpuResources>>,
    win: Arc<winit::window::Window>,
    _context: Arc<RenderContext>,
}
impl Renderer {
    pub fn window(&self) -> &Arc<winit::window::Window> {
        &self.win
    }
    /// Texture and font cache. Clone the `Arc` to load from other threads.
    pub fn resources(&self) -> &Arc<ResourceCache<GpuResources>> {
        &self.resources
    }
    pub fn frames(&self) -> &FrameRenderer {
        &self.frames
    }
    /// Call on `WindowEvent::Resized`.
    pub fn resized(&mut self) {
        self.frames.notify_resized();
    }
    /// Run one frame, with `draw` filling the UI renderer.
    ///
    /// `Ok(None)` if no frame could be drawn this time (try again next redraw), otherwise
    /// `Ok(Some(relayout))`, with `relayout` true if the surface changed since the last frame.
    pub fn render(
        &mut self,
        draw: impl FnOnce(&mut UiRenderer),
    ) -> Result<Option<bool>, FrameError> {
        #[allow(clippy::cast_possible_truncation)]
        self.ui.set_scale_factor(self.win.scale_factor() as f32);

        let mut frame = match self.frames.begin_frame()? {
            BeginFrame::Ready(frame) => frame,
            BeginFrame::Retry => {
                self.win.request_redraw();
                return Ok(None);
            }
        };
        draw(&mut self.ui);
        self.ui.on_render(&mut frame).map_err(FrameError::Device)?;
        self.frames.end_frame(frame).map(Some)
    }
}
