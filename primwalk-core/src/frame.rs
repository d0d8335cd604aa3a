//! # Frame loop
//!
//! Drives a presentation chain through `begin_frame` / `end_frame` with a fixed ring of frame slots.
//! Slot `i` is only recorded again after the fence of its previous submission signals, so at most
//! `frames_in_flight` frames are ever unretired.
//!
//! The chain is rebuilt when the surface is resized, or reports itself stale. Rebuilding retires every
//! slot and idles the device first, so nothing in flight can still reference the old chain when the
//! backend destroys it. Frames recorded against a chain that was rebuilt under them are dropped.
//!
//! The GPU specifics live behind [`FrameBackend`].

use std::time::Duration;

use smallvec::SmallVec;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

#[derive(thiserror::Error, Debug)]
pub enum FenceWaitError {
    #[error("timed out")]
    Timeout,
    #[error(transparent)]
    Device(anyhow::Error),
}

/// Completion signal of one submission.
pub trait SlotFence {
    /// Block until signaled, or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<(), FenceWaitError>;
}

pub trait PresentChain {
    fn extent(&self) -> [u32; 2];
    fn image_count(&self) -> u32;
    fn present_mode(&self) -> PresentMode;
}

/// What the surface currently supports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceState {
    /// None, or zero area, while the window is minimized.
    pub extent: Option<[u32; 2]>,
    pub present_modes: SmallVec<[PresentMode; 4]>,
    pub min_image_count: u32,
    /// None if unbounded.
    pub max_image_count: Option<u32>,
}

/// Parameters for a new chain, decided by the frame renderer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    pub extent: [u32; 2],
    pub present_mode: PresentMode,
    pub image_count: u32,
}

/// An acquired presentable image.
pub struct Acquired<Token> {
    pub index: u32,
    /// The image is usable, but the chain should be rebuilt soon.
    pub suboptimal: bool,
    /// Backend signal that the image is ready to be written.
    pub token: Token,
}

pub struct Submitted<Fence> {
    pub fence: Fence,
    pub suboptimal: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum SurfaceError {
    /// The chain no longer matches the surface, and must be rebuilt.
    #[error("presentation chain out of date")]
    OutOfDate,
    #[error("timed out acquiring an image")]
    Timeout,
    #[error(transparent)]
    Fatal(anyhow::Error),
}

/// The device half of the frame loop.
pub trait FrameBackend {
    type Chain: PresentChain;
    type Acquire;
    type Commands;
    type Fence: SlotFence;

    fn surface(&mut self) -> anyhow::Result<SurfaceState>;
    /// Block until the device has no outstanding work.
    fn wait_idle(&mut self) -> anyhow::Result<()>;
    /// Create a chain. `old`, if any, is retired and must be destroyed once the new chain exists.
    fn build_chain(
        &mut self,
        old: Option<Self::Chain>,
        info: &ChainInfo,
    ) -> anyhow::Result<Self::Chain>;
    fn acquire(
        &mut self,
        chain: &Self::Chain,
        timeout: Option<Duration>,
    ) -> Result<Acquired<Self::Acquire>, SurfaceError>;
    /// Begin recording commands that draw into image `image_index`.
    fn record(&mut self, chain: &Self::Chain, image_index: u32) -> anyhow::Result<Self::Commands>;
    /// Finish recording, submit after the image is available, and present once rendering finishes.
    fn submit(
        &mut self,
        chain: &Self::Chain,
        acquired: Acquired<Self::Acquire>,
        commands: Self::Commands,
    ) -> Result<Submitted<Self::Fence>, SurfaceError>;
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Number of frame slots. At least one.
    pub frames_in_flight: usize,
    pub fence_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    /// Use mailbox presentation where supported, rather than vsync'd FIFO.
    pub prefer_low_latency: bool,
}
impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: 2_000,
            acquire_timeout_ms: 1_000,
            prefer_low_latency: true,
        }
    }
}
impl FrameConfig {
    #[must_use]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    /// The device stopped making progress. Fatal.
    #[error("timed out waiting for frame slot {slot}")]
    FenceTimeout { slot: usize },
    #[error(transparent)]
    Device(anyhow::Error),
}

/// Fixed ring of frame slots, each holding the fence of its last submission.
pub struct SlotRing<F> {
    fences: Vec<Option<F>>,
    current: usize,
}
impl<F: SlotFence> SlotRing<F> {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            fences: std::iter::repeat_with(|| None).take(count.max(1)).collect(),
            current: 0,
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.fences.len()
    }
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }
    /// Submissions not yet known to be complete.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.fences.iter().filter(|f| f.is_some()).count()
    }
    fn wait_slot(&mut self, slot: usize, timeout: Duration) -> Result<(), FrameError> {
        let Some(fence) = &mut self.fences[slot] else {
            return Ok(());
        };
        match fence.wait(timeout) {
            Ok(()) => {
                // Only forget the fence once it is known to have signaled.
                self.fences[slot] = None;
                Ok(())
            }
            Err(FenceWaitError::Timeout) => Err(FrameError::FenceTimeout { slot }),
            Err(FenceWaitError::Device(err)) => Err(FrameError::Device(err)),
        }
    }
    /// Wait for the current slot to retire.
    pub fn wait_current(&mut self, timeout: Duration) -> Result<(), FrameError> {
        self.wait_slot(self.current, timeout)
    }
    /// Wait for every slot to retire, oldest first.
    pub fn wait_all(&mut self, timeout: Duration) -> Result<(), FrameError> {
        let len = self.fences.len();
        (0..len).try_for_each(|offs| self.wait_slot((self.current + offs) % len, timeout))
    }
    /// Occupy the current slot with a submission's fence, and move to the next slot.
    pub fn store(&mut self, fence: F) {
        self.fences[self.current] = Some(fence);
        self.current = (self.current + 1) % self.fences.len();
    }
}

/// A frame being recorded. Consumed by [`FrameRenderer::end_frame`].
pub struct Frame<B: FrameBackend> {
    commands: B::Commands,
    acquired: Acquired<B::Acquire>,
    slot: usize,
    generation: u64,
    extent: [u32; 2],
}
impl<B: FrameBackend> Frame<B> {
    pub fn commands(&mut self) -> &mut B::Commands {
        &mut self.commands
    }
    /// Frame slot index, in `0..frames_in_flight`. Per-frame resources are indexed by this.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }
    /// Index of the presentable image being drawn.
    #[must_use]
    pub fn image_index(&self) -> u32 {
        self.acquired.index
    }
    #[must_use]
    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }
    /// Generation of the chain this frame was recorded against.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub enum BeginFrame<B: FrameBackend> {
    Ready(Frame<B>),
    /// No frame this time: the chain was rebuilt, or the surface has no area. Try again next loop.
    Retry,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_in_flight: usize,
    /// Incremented on every chain rebuild.
    pub generation: u64,
    pub image_count: u32,
    pub extent: Option<[u32; 2]>,
    pub present_mode: Option<PresentMode>,
    pub frames_submitted: u64,
    pub frames_dropped: u64,
}

fn choose_present_mode(available: &[PresentMode], prefer_low_latency: bool) -> PresentMode {
    // FIFO is always supported.
    if prefer_low_latency && available.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

pub struct FrameRenderer<B: FrameBackend> {
    backend: B,
    config: FrameConfig,
    chain: Option<B::Chain>,
    slots: SlotRing<B::Fence>,
    generation: u64,
    resize_pending: bool,
    /// A rebuild happened that the caller hasn't been told about yet.
    relayout: bool,
    frames_submitted: u64,
    frames_dropped: u64,
}
impl<B: FrameBackend> FrameRenderer<B> {
    /// The chain is built lazily, on the first `begin_frame`.
    pub fn new(backend: B, config: FrameConfig) -> Self {
        let slots = SlotRing::new(config.frames_in_flight);
        Self {
            backend,
            config,
            chain: None,
            slots,
            generation: 0,
            resize_pending: false,
            relayout: false,
            frames_submitted: 0,
            frames_dropped: 0,
        }
    }
    pub fn backend(&self) -> &B {
        &self.backend
    }
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
    pub fn chain(&self) -> Option<&B::Chain> {
        self.chain.as_ref()
    }
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }
    /// Resize callback. The chain is rebuilt at the next slot boundary.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }
    #[must_use]
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_in_flight: self.slots.in_flight(),
            generation: self.generation,
            image_count: self.chain.as_ref().map_or(0, PresentChain::image_count),
            extent: self.chain.as_ref().map(PresentChain::extent),
            present_mode: self.chain.as_ref().map(PresentChain::present_mode),
            frames_submitted: self.frames_submitted,
            frames_dropped: self.frames_dropped,
        }
    }
    /// Retire everything in flight and rebuild the chain against the surface as it is now.
    ///
    /// Returns false, keeping the rebuild pending, if the surface currently has no area.
    pub fn rebuild(&mut self) -> Result<bool, FrameError> {
        self.slots.wait_all(self.config.fence_timeout())?;
        self.backend.wait_idle().map_err(FrameError::Device)?;

        let surface = self.backend.surface().map_err(FrameError::Device)?;
        let Some(extent) = surface.extent.filter(|&[w, h]| w != 0 && h != 0) else {
            log::debug!("Surface has no area, deferring rebuild");
            self.resize_pending = true;
            return Ok(false);
        };
        let present_mode =
            choose_present_mode(&surface.present_modes, self.config.prefer_low_latency);
        let mut image_count = surface
            .min_image_count
            .max(u32::try_from(self.slots.len()).unwrap_or(u32::MAX));
        if let Some(max) = surface.max_image_count {
            image_count = image_count.min(max);
        }
        let info = ChainInfo {
            extent,
            present_mode,
            image_count,
        };
        let chain = self
            .backend
            .build_chain(self.chain.take(), &info)
            .map_err(FrameError::Device)?;
        self.generation += 1;
        log::info!(
            "Built presentation chain #{}: {}x{}, {} images, {present_mode:?}",
            self.generation,
            extent[0],
            extent[1],
            chain.image_count(),
        );
        self.chain = Some(chain);
        self.resize_pending = false;
        self.relayout = true;
        Ok(true)
    }
    /// Wait for the current slot, then acquire an image and begin recording into it.
    pub fn begin_frame(&mut self) -> Result<BeginFrame<B>, FrameError> {
        self.slots.wait_current(self.config.fence_timeout())?;

        if (self.resize_pending || self.chain.is_none()) && !self.rebuild()? {
            return Ok(BeginFrame::Retry);
        }
        let Some(chain) = self.chain.as_ref() else {
            return Ok(BeginFrame::Retry);
        };
        let acquired = match self
            .backend
            .acquire(chain, Some(self.config.acquire_timeout()))
        {
            Ok(acquired) => acquired,
            Err(SurfaceError::OutOfDate) => {
                log::debug!("Chain out of date on acquire");
                self.rebuild()?;
                return Ok(BeginFrame::Retry);
            }
            Err(SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring a presentable image");
                return Ok(BeginFrame::Retry);
            }
            Err(SurfaceError::Fatal(err)) => return Err(FrameError::Device(err)),
        };
        if acquired.suboptimal {
            // Still presentable. Draw this one, rebuild at the end of it.
            self.resize_pending = true;
        }
        let extent = chain.extent();
        let commands = self
            .backend
            .record(chain, acquired.index)
            .map_err(FrameError::Device)?;
        Ok(BeginFrame::Ready(Frame {
            commands,
            acquired,
            slot: self.slots.current(),
            generation: self.generation,
            extent,
        }))
    }
    /// Submit and present. Returns true if the chain was rebuilt since the last `end_frame`,
    /// and the caller must lay out again at the new extent.
    pub fn end_frame(&mut self, frame: Frame<B>) -> Result<bool, FrameError> {
        let Some(chain) = self
            .chain
            .as_ref()
            .filter(|_| frame.generation == self.generation)
        else {
            log::warn!(
                "Dropping frame recorded against retired chain #{}",
                frame.generation
            );
            self.frames_dropped += 1;
            self.relayout = false;
            return Ok(true);
        };
        match self.backend.submit(chain, frame.acquired, frame.commands) {
            Ok(Submitted { fence, suboptimal }) => {
                self.slots.store(fence);
                self.frames_submitted += 1;
                if suboptimal {
                    self.resize_pending = true;
                }
            }
            Err(SurfaceError::OutOfDate) => {
                log::debug!("Chain out of date on present");
                self.resize_pending = true;
            }
            Err(SurfaceError::Timeout) => {
                return Err(FrameError::Device(anyhow::anyhow!(
                    "presentation timed out"
                )))
            }
            Err(SurfaceError::Fatal(err)) => return Err(FrameError::Device(err)),
        }
        if self.resize_pending {
            self.rebuild()?;
        }
        Ok(std::mem::take(&mut self.relayout))
    }
}
impl<B: FrameBackend> Drop for FrameRenderer<B> {
    fn drop(&mut self) {
        // Everything in flight must retire before the chain and backend go away.
        if let Err(err) = self.slots.wait_all(self.config.fence_timeout()) {
            log::warn!("Frame slots did not retire on shutdown: {err}");
        }
        if let Err(err) = self.backend.wait_idle() {
            log::warn!("Device did not idle on shutdown: {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::{
        Acquired, BeginFrame, ChainInfo, FenceWaitError, FrameBackend, FrameConfig, FrameError,
        FrameRenderer, PresentChain, PresentMode, SlotFence, Submitted, SurfaceError, SurfaceState,
    };

    #[derive(Default)]
    struct World {
        extent: [u32; 2],
        modes: Vec<PresentMode>,
        next_chain: u32,
        destroyed: Vec<u32>,
        /// Fence ids that have signaled.
        signaled: Vec<u32>,
        /// Fence ids waited on, in order.
        waits: Vec<u32>,
        next_fence: u32,
        /// Chain ids every submission went to.
        submitted_to: Vec<u32>,
        out_of_date_once: bool,
    }

    struct MockChain {
        id: u32,
        info: ChainInfo,
    }
    impl PresentChain for MockChain {
        fn extent(&self) -> [u32; 2] {
            self.info.extent
        }
        fn image_count(&self) -> u32 {
            self.info.image_count
        }
        fn present_mode(&self) -> PresentMode {
            self.info.present_mode
        }
    }

    struct MockFence {
        id: u32,
        world: Arc<Mutex<World>>,
    }
    impl SlotFence for MockFence {
        fn wait(&mut self, _: Duration) -> Result<(), FenceWaitError> {
            let mut world = self.world.lock();
            world.waits.push(self.id);
            if world.signaled.contains(&self.id) {
                Ok(())
            } else {
                Err(FenceWaitError::Timeout)
            }
        }
    }

    struct MockBackend {
        world: Arc<Mutex<World>>,
    }
    impl MockBackend {
        fn assert_live(&self, chain: &MockChain) {
            assert!(
                !self.world.lock().destroyed.contains(&chain.id),
                "touched destroyed chain {}",
                chain.id
            );
        }
    }
    impl FrameBackend for MockBackend {
        type Chain = MockChain;
        type Acquire = ();
        type Commands = Vec<&'static str>;
        type Fence = MockFence;
        fn surface(&mut self) -> anyhow::Result<SurfaceState> {
            let world = self.world.lock();
            Ok(SurfaceState {
                extent: Some(world.extent),
                present_modes: world.modes.iter().copied().collect(),
                min_image_count: 1,
                max_image_count: Some(3),
            })
        }
        fn wait_idle(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn build_chain(
            &mut self,
            old: Option<MockChain>,
            info: &ChainInfo,
        ) -> anyhow::Result<MockChain> {
            let mut world = self.world.lock();
            world.next_chain += 1;
            let chain = MockChain {
                id: world.next_chain,
                info: *info,
            };
            if let Some(old) = old {
                world.destroyed.push(old.id);
            }
            Ok(chain)
        }
        fn acquire(
            &mut self,
            chain: &MockChain,
            _: Option<Duration>,
        ) -> Result<Acquired<()>, SurfaceError> {
            self.assert_live(chain);
            let mut world = self.world.lock();
            if world.out_of_date_once || world.extent != chain.info.extent {
                world.out_of_date_once = false;
                return Err(SurfaceError::OutOfDate);
            }
            Ok(Acquired {
                index: 0,
                suboptimal: false,
                token: (),
            })
        }
        fn record(&mut self, chain: &MockChain, _: u32) -> anyhow::Result<Vec<&'static str>> {
            self.assert_live(chain);
            Ok(vec!["begin"])
        }
        fn submit(
            &mut self,
            chain: &MockChain,
            _: Acquired<()>,
            _: Vec<&'static str>,
        ) -> Result<Submitted<MockFence>, SurfaceError> {
            self.assert_live(chain);
            let mut world = self.world.lock();
            world.submitted_to.push(chain.id);
            world.next_fence += 1;
            Ok(Submitted {
                fence: MockFence {
                    id: world.next_fence,
                    world: self.world.clone(),
                },
                suboptimal: false,
            })
        }
    }

    fn renderer(extent: [u32; 2]) -> (FrameRenderer<MockBackend>, Arc<Mutex<World>>) {
        let world = Arc::new(Mutex::new(World {
            extent,
            modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            ..Default::default()
        }));
        let backend = MockBackend {
            world: world.clone(),
        };
        (FrameRenderer::new(backend, FrameConfig::default()), world)
    }
    fn frame(renderer: &mut FrameRenderer<MockBackend>) -> super::Frame<MockBackend> {
        match renderer.begin_frame().unwrap() {
            BeginFrame::Ready(frame) => frame,
            BeginFrame::Retry => panic!("expected a frame"),
        }
    }
    /// Let every fence signal, so the next frames never block.
    fn signal_all(world: &Mutex<World>) {
        let mut world = world.lock();
        let all = 1..=world.next_fence;
        world.signaled.extend(all);
    }

    #[test]
    fn slot_bound() {
        let (mut renderer, world) = renderer([640, 480]);
        let first = frame(&mut renderer);
        assert_eq!(first.slot(), 0);
        // A fresh chain always asks for a relayout.
        assert!(renderer.end_frame(first).unwrap());
        let second = frame(&mut renderer);
        assert_eq!(second.slot(), 1);
        assert!(!renderer.end_frame(second).unwrap());
        assert_eq!(renderer.stats().frames_in_flight, 2);

        // Third frame reuses slot 0, whose fence (id 1) hasn't signaled.
        assert!(matches!(
            renderer.begin_frame(),
            Err(FrameError::FenceTimeout { slot: 0 })
        ));
        assert_eq!(world.lock().waits, vec![1]);
        // Still unretired after the failed wait.
        assert_eq!(renderer.stats().frames_in_flight, 2);

        world.lock().signaled.push(1);
        let third = frame(&mut renderer);
        assert_eq!(third.slot(), 0);
        assert_eq!(renderer.stats().frames_in_flight, 1);
        renderer.end_frame(third).unwrap();
        signal_all(&world);
    }
    #[test]
    fn prefers_mailbox() {
        let (mut renderer, world) = renderer([64, 64]);
        let f = frame(&mut renderer);
        renderer.end_frame(f).unwrap();
        let stats = renderer.stats();
        assert_eq!(stats.present_mode, Some(PresentMode::Mailbox));
        // Enough images for both slots, within the surface's maximum.
        assert_eq!(stats.image_count, 2);
        signal_all(&world);

        world.lock().modes = vec![PresentMode::Fifo];
        assert!(renderer.rebuild().unwrap());
        assert_eq!(renderer.stats().present_mode, Some(PresentMode::Fifo));
    }
    #[test]
    fn resize_safety() {
        let (mut renderer, world) = renderer([640, 480]);
        let f = frame(&mut renderer);
        renderer.end_frame(f).unwrap();

        // The window grows mid-frame and the resize path rebuilds immediately.
        let stale = frame(&mut renderer);
        signal_all(&world);
        world.lock().extent = [800, 600];
        assert!(renderer.rebuild().unwrap());
        // The frame recorded against chain 1 is dropped, not submitted.
        assert!(renderer.end_frame(stale).unwrap());
        assert_eq!(renderer.stats().frames_dropped, 1);

        let resumed = frame(&mut renderer);
        assert_eq!(resumed.extent(), [800, 600]);
        assert!(!renderer.end_frame(resumed).unwrap());
        assert_eq!(world.lock().destroyed, vec![1]);
        assert_eq!(world.lock().submitted_to, vec![1, 2]);
    }
    #[test]
    fn resize_notification() {
        let (mut renderer, world) = renderer([640, 480]);
        let f = frame(&mut renderer);
        renderer.end_frame(f).unwrap();
        signal_all(&world);

        world.lock().extent = [1024, 768];
        renderer.notify_resized();
        let f = frame(&mut renderer);
        assert_eq!(f.extent(), [1024, 768]);
        assert!(renderer.end_frame(f).unwrap());
        assert_eq!(renderer.stats().generation, 2);
    }
    #[test]
    fn out_of_date_retries() {
        let (mut renderer, world) = renderer([640, 480]);
        let f = frame(&mut renderer);
        renderer.end_frame(f).unwrap();
        signal_all(&world);

        world.lock().out_of_date_once = true;
        assert!(matches!(renderer.begin_frame(), Ok(BeginFrame::Retry)));
        assert_eq!(renderer.stats().generation, 2);
        let f = frame(&mut renderer);
        assert!(renderer.end_frame(f).unwrap());
    }
    #[test]
    fn minimized_waits() {
        let (mut renderer, world) = renderer([0, 0]);
        assert!(matches!(renderer.begin_frame(), Ok(BeginFrame::Retry)));
        assert!(renderer.chain().is_none());
        world.lock().extent = [10, 10];
        let f = frame(&mut renderer);
        assert_eq!(f.extent(), [10, 10]);
        renderer.end_frame(f).unwrap();
        signal_all(&world);
    }
}
