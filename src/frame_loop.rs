// =============================================================================
// FRAME LOOP - per-frame state machine
// =============================================================================
//
// One frame in flight, one command buffer, one fence, two semaphores.
//
// FRAME TIMELINE:
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait fence ─> acquire ─┬─> reset fence ─> record ─> submit ─> present     │
// │                        │                                                 │
// │                        └─> stale: recreate swapchain, abandon the frame  │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The fence is only reset after an in-date acquisition. An abandoned frame
// therefore leaves it signalled and the next wait returns immediately.
// A rebuild the surface cannot take yet (zero area) stays requested and the
// frame is postponed without acquiring.

use anyhow::{Context, Result};
use std::fmt;

/// Why the swapchain no longer matches the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Suboptimal,
    OutOfDate,
    /// Acquisition did not complete within its bound
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image(u32),
    Stale(StaleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale(StaleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The image was rendered and queued for display
    Presented { image_index: u32, recreated: bool },
    /// Acquisition was stale; a rebuild was attempted and nothing was drawn
    Abandoned(StaleReason),
    /// The surface has no area; nothing was acquired or submitted
    Postponed,
}

/// The steps of one frame, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Recreate,
    WaitPrevious,
    Acquire,
    Release,
    Record,
    Submit,
    Present,
    Drain,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramePhase::Recreate => "recreating swapchain",
            FramePhase::WaitPrevious => "waiting for previous frame",
            FramePhase::Acquire => "acquiring image",
            FramePhase::Release => "releasing stale image",
            FramePhase::Record => "recording commands",
            FramePhase::Submit => "submitting",
            FramePhase::Present => "presenting",
            FramePhase::Drain => "draining queue",
        };
        f.write_str(name)
    }
}

/// GPU-side operations the loop drives
///
/// Implemented by the Vulkan renderer; tests substitute a stub that tracks
/// fence and submission state.
pub trait FrameBackend {
    /// Block until the previous submission of the command buffer completed
    fn wait_for_frame(&mut self) -> Result<()>;
    /// Request the next image, signalling the image-available semaphore
    fn acquire_image(&mut self) -> Result<AcquireOutcome>;
    fn reset_frame_fence(&mut self) -> Result<()>;
    /// Reset and re-record the command buffer against `image_index`
    fn record_commands(&mut self, image_index: u32) -> Result<()>;
    /// Submit, waiting on image-available and signalling render-finished + fence
    fn submit(&mut self) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;
    /// Consume the image-available signal of an acquisition that was
    /// reported suboptimal and will not be submitted
    fn release_acquired_image(&mut self) -> Result<()>;
    /// Tear down and rebuild the swapchain cluster. `false` when the surface
    /// cannot back a swapchain yet and nothing was rebuilt.
    fn recreate_swapchain(&mut self) -> Result<bool>;
    /// Block until the graphics queue is idle
    fn drain(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    pub frames_presented: u64,
    pub recreations: u64,
    recreate_requested: bool,
    wait_idle_after_present: bool,
}

impl FrameLoop {
    pub fn new(wait_idle_after_present: bool) -> Self {
        Self {
            wait_idle_after_present,
            ..Default::default()
        }
    }

    /// Rebuild the swapchain before the next acquisition (e.g. window resized)
    pub fn request_recreate(&mut self) {
        self.recreate_requested = true;
    }

    /// Run one frame through the state machine
    pub fn render_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        if self.recreate_requested && !self.recreate(backend)? {
            return Ok(FrameOutcome::Postponed);
        }

        backend
            .wait_for_frame()
            .with_context(|| FramePhase::WaitPrevious.to_string())?;

        let image_index = match backend
            .acquire_image()
            .with_context(|| FramePhase::Acquire.to_string())?
        {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::Stale(reason) => {
                log::warn!("Swapchain stale on acquire ({:?}), recreating", reason);
                // a suboptimal acquisition still handed out an image
                if reason == StaleReason::Suboptimal {
                    backend
                        .release_acquired_image()
                        .with_context(|| FramePhase::Release.to_string())?;
                }
                self.recreate(backend)?;
                return Ok(FrameOutcome::Abandoned(reason));
            }
        };

        backend
            .reset_frame_fence()
            .and_then(|_| backend.record_commands(image_index))
            .with_context(|| FramePhase::Record.to_string())?;

        backend
            .submit()
            .with_context(|| FramePhase::Submit.to_string())?;

        let presented = backend
            .present(image_index)
            .with_context(|| FramePhase::Present.to_string())?;

        if self.wait_idle_after_present {
            backend
                .drain()
                .with_context(|| FramePhase::Drain.to_string())?;
        }

        self.frames_presented += 1;

        let recreated = match presented {
            PresentOutcome::Presented => false,
            PresentOutcome::Stale(reason) => {
                log::warn!("Swapchain stale on present ({:?}), recreating", reason);
                self.recreate(backend)?
            }
        };

        log::debug!("Frame {} presented image {}", self.frames_presented, image_index);

        Ok(FrameOutcome::Presented {
            image_index,
            recreated,
        })
    }

    /// Drive frames until `keep_running` says stop, then `finish`.
    ///
    /// Headless driver; the windowed app renders from redraw events and calls
    /// `finish` itself. The condition is checked once per iteration, never
    /// mid-frame.
    pub fn run<B, F>(&mut self, backend: &mut B, mut keep_running: F) -> Result<()>
    where
        B: FrameBackend,
        F: FnMut() -> bool,
    {
        let mut result = Ok(());
        while keep_running() {
            if let Err(e) = self.render_frame(backend) {
                log::error!("Frame loop aborted: {:#}", e);
                result = Err(e);
                break;
            }
        }

        result.and(self.finish(backend))
    }

    /// Drain the queue before anything the frames used is destroyed
    pub fn finish<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        backend
            .drain()
            .with_context(|| FramePhase::Drain.to_string())?;
        log::info!(
            "Presented {} frames, rebuilt swapchain {} times",
            self.frames_presented,
            self.recreations
        );
        Ok(())
    }

    /// Rebuild now, or keep the request pending if the surface cannot take it
    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<bool> {
        let rebuilt = backend
            .recreate_swapchain()
            .with_context(|| FramePhase::Recreate.to_string())?;
        if rebuilt {
            self.recreations += 1;
        } else {
            log::debug!("Swapchain rebuild postponed");
        }
        self.recreate_requested = !rebuilt;
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait,
        Acquire,
        ResetFence,
        Record(u32),
        Submit,
        Present(u32),
        Release,
        Recreate,
        Drain,
    }

    /// Stub GPU: submission completes when the CPU waits on the fence
    struct StubBackend {
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        fence_signaled: bool,
        in_flight: u32,
        recording: bool,
        image_count: u32,
        next_image: u32,
        fail_submit: bool,
        /// Surface has no area; rebuilds are refused
        zero_area: bool,
        /// Image-available semaphore holds a signal nobody has waited on
        image_signal_pending: bool,
        rebuilt: u32,
    }

    impl StubBackend {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                // created signalled so the first wait does not block
                fence_signaled: true,
                in_flight: 0,
                recording: false,
                image_count: 3,
                next_image: 0,
                fail_submit: false,
                zero_area: false,
                image_signal_pending: false,
                rebuilt: 0,
            }
        }
    }

    impl FrameBackend for StubBackend {
        fn wait_for_frame(&mut self) -> Result<()> {
            self.calls.push(Call::Wait);
            if self.in_flight > 0 {
                self.in_flight -= 1;
                self.fence_signaled = true;
            }
            anyhow::ensure!(self.fence_signaled, "deadlock: fence unsignalled with nothing in flight");
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire);
            anyhow::ensure!(
                !self.image_signal_pending,
                "acquiring with an already signalled semaphore"
            );
            let outcome = self.acquires.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Image(index)
            });
            // out-of-date and timed-out acquisitions signal nothing
            self.image_signal_pending = matches!(
                outcome,
                AcquireOutcome::Image(_) | AcquireOutcome::Stale(StaleReason::Suboptimal)
            );
            Ok(outcome)
        }

        fn reset_frame_fence(&mut self) -> Result<()> {
            self.calls.push(Call::ResetFence);
            anyhow::ensure!(self.in_flight == 0, "fence reset while its submission is pending");
            self.fence_signaled = false;
            Ok(())
        }

        fn record_commands(&mut self, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(image_index));
            anyhow::ensure!(self.in_flight == 0, "recording while previous submission pending");
            anyhow::ensure!(!self.recording, "nested recording");
            self.recording = true;
            Ok(())
        }

        fn submit(&mut self) -> Result<()> {
            self.calls.push(Call::Submit);
            anyhow::ensure!(!self.fail_submit, "device lost");
            anyhow::ensure!(self.recording, "submitting an unrecorded command buffer");
            anyhow::ensure!(!self.fence_signaled, "submitting with a signalled fence");
            self.recording = false;
            self.image_signal_pending = false;
            self.in_flight += 1;
            assert!(self.in_flight <= 1, "more than one submission pending");
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn release_acquired_image(&mut self) -> Result<()> {
            self.calls.push(Call::Release);
            anyhow::ensure!(self.image_signal_pending, "nothing to release");
            self.image_signal_pending = false;
            Ok(())
        }

        fn recreate_swapchain(&mut self) -> Result<bool> {
            self.calls.push(Call::Recreate);
            if self.zero_area {
                return Ok(false);
            }
            self.next_image = 0;
            self.rebuilt += 1;
            Ok(true)
        }

        fn drain(&mut self) -> Result<()> {
            self.calls.push(Call::Drain);
            if self.in_flight > 0 {
                self.in_flight = 0;
                self.fence_signaled = true;
            }
            Ok(())
        }
    }

    #[test]
    fn normal_frame_runs_every_phase_in_order() {
        let mut backend = StubBackend::new();
        let mut frames = FrameLoop::new(false);

        let outcome = frames.render_frame(&mut backend).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 0,
                recreated: false
            }
        );
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait,
                Call::Acquire,
                Call::ResetFence,
                Call::Record(0),
                Call::Submit,
                Call::Present(0),
            ]
        );
        assert_eq!(frames.frames_presented, 1);
    }

    #[test]
    fn out_of_date_acquire_recreates_and_skips_the_frame() {
        let mut backend = StubBackend::new();
        backend
            .acquires
            .push_back(AcquireOutcome::Stale(StaleReason::OutOfDate));
        let mut frames = FrameLoop::new(false);

        let first = frames.render_frame(&mut backend).unwrap();
        assert_eq!(first, FrameOutcome::Abandoned(StaleReason::OutOfDate));
        assert_eq!(backend.calls, vec![Call::Wait, Call::Acquire, Call::Recreate]);

        backend.calls.clear();
        let second = frames.render_frame(&mut backend).unwrap();
        assert!(matches!(second, FrameOutcome::Presented { .. }));
        assert_eq!(backend.calls[..2], [Call::Wait, Call::Acquire]);
        assert_eq!(frames.recreations, 1);
    }

    #[test]
    fn abandoned_frame_leaves_fence_signalled_for_next_wait() {
        let mut backend = StubBackend::new();
        let mut frames = FrameLoop::new(false);

        frames.render_frame(&mut backend).unwrap();
        backend
            .acquires
            .push_back(AcquireOutcome::Stale(StaleReason::Suboptimal));
        backend
            .acquires
            .push_back(AcquireOutcome::Stale(StaleReason::Timeout));

        // the stub errors on a wait that could never complete
        assert!(matches!(
            frames.render_frame(&mut backend).unwrap(),
            FrameOutcome::Abandoned(StaleReason::Suboptimal)
        ));
        assert!(matches!(
            frames.render_frame(&mut backend).unwrap(),
            FrameOutcome::Abandoned(StaleReason::Timeout)
        ));
        assert!(matches!(
            frames.render_frame(&mut backend).unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }

    #[test]
    fn stale_present_recreates_after_the_frame_completes() {
        let mut backend = StubBackend::new();
        backend
            .presents
            .push_back(PresentOutcome::Stale(StaleReason::OutOfDate));
        let mut frames = FrameLoop::new(false);

        let outcome = frames.render_frame(&mut backend).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 0,
                recreated: true
            }
        );
        assert_eq!(backend.calls.last(), Some(&Call::Recreate));
        assert_eq!(frames.recreations, 1);
    }

    #[test]
    fn never_more_than_one_submission_pending_over_many_frames() {
        let mut backend = StubBackend::new();
        for i in 0..20 {
            if i % 7 == 3 {
                backend
                    .acquires
                    .push_back(AcquireOutcome::Stale(StaleReason::OutOfDate));
            }
        }
        let mut frames = FrameLoop::new(false);

        let mut remaining = 50;
        frames
            .run(&mut backend, || {
                remaining -= 1;
                remaining >= 0
            })
            .unwrap();

        assert_eq!(backend.in_flight, 0);
        assert_eq!(backend.calls.last(), Some(&Call::Drain));
        // every record is preceded by a wait with no other record in between
        let mut waited = false;
        for call in &backend.calls {
            match call {
                Call::Wait => waited = true,
                Call::Record(_) => {
                    assert!(waited, "record without a preceding fence wait");
                    waited = false;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn requested_recreate_happens_before_acquisition() {
        let mut backend = StubBackend::new();
        let mut frames = FrameLoop::new(false);
        frames.request_recreate();

        frames.render_frame(&mut backend).unwrap();
        assert_eq!(backend.calls[..3], [Call::Recreate, Call::Wait, Call::Acquire]);

        backend.calls.clear();
        frames.render_frame(&mut backend).unwrap();
        assert!(!backend.calls.contains(&Call::Recreate));
    }

    #[test]
    fn full_sync_mode_drains_after_each_present() {
        let mut backend = StubBackend::new();
        let mut frames = FrameLoop::new(true);

        frames.render_frame(&mut backend).unwrap();
        frames.render_frame(&mut backend).unwrap();

        let drains = backend.calls.iter().filter(|c| **c == Call::Drain).count();
        assert_eq!(drains, 2);
        assert_eq!(backend.calls[5..7], [Call::Present(0), Call::Drain]);
    }

    #[test]
    fn fatal_error_aborts_the_loop_but_still_drains() {
        let mut backend = StubBackend::new();
        backend.fail_submit = true;
        let mut frames = FrameLoop::new(false);

        let mut iterations = 0;
        let err = frames
            .run(&mut backend, || {
                iterations += 1;
                true
            })
            .unwrap_err();

        assert_eq!(iterations, 1);
        assert!(format!("{err:#}").contains("submitting"));
        assert_eq!(backend.calls.last(), Some(&Call::Drain));
    }

    #[test]
    fn close_before_first_frame_only_drains() {
        let mut backend = StubBackend::new();
        let mut frames = FrameLoop::new(false);

        frames.run(&mut backend, || false).unwrap();

        assert_eq!(backend.calls, vec![Call::Drain]);
        assert_eq!(frames.frames_presented, 0);
    }

    #[test]
    fn suboptimal_acquire_releases_the_image_before_rebuilding() {
        let mut backend = StubBackend::new();
        backend
            .acquires
            .push_back(AcquireOutcome::Stale(StaleReason::Suboptimal));
        let mut frames = FrameLoop::new(false);

        let outcome = frames.render_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Abandoned(StaleReason::Suboptimal));
        assert_eq!(
            backend.calls,
            vec![Call::Wait, Call::Acquire, Call::Release, Call::Recreate]
        );
        assert!(!backend.image_signal_pending);
    }

    #[test]
    fn zero_area_surface_keeps_rebuild_pending() {
        let mut backend = StubBackend::new();
        backend.zero_area = true;
        let mut frames = FrameLoop::new(false);
        frames.request_recreate();

        // postponed: nothing acquired, nothing counted, request kept
        assert_eq!(frames.render_frame(&mut backend).unwrap(), FrameOutcome::Postponed);
        assert_eq!(backend.calls, vec![Call::Recreate]);
        assert_eq!(frames.recreations, 0);
        assert!(frames.recreate_requested);

        // window restored: the pending rebuild runs before the next acquire
        backend.zero_area = false;
        backend.calls.clear();
        assert!(matches!(
            frames.render_frame(&mut backend).unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_eq!(backend.calls[..3], [Call::Recreate, Call::Wait, Call::Acquire]);
        assert_eq!(frames.recreations, 1);
        assert_eq!(backend.rebuilt, 1);
        assert!(!frames.recreate_requested);
    }

    #[test]
    fn suboptimal_acquire_on_zero_area_surface_retries_later() {
        let mut backend = StubBackend::new();
        backend.zero_area = true;
        backend
            .acquires
            .push_back(AcquireOutcome::Stale(StaleReason::Suboptimal));
        let mut frames = FrameLoop::new(false);

        assert_eq!(
            frames.render_frame(&mut backend).unwrap(),
            FrameOutcome::Abandoned(StaleReason::Suboptimal)
        );
        // the signal is consumed even though nothing was rebuilt
        assert!(!backend.image_signal_pending);
        assert_eq!(frames.recreations, 0);
        assert!(frames.recreate_requested);

        backend.zero_area = false;
        backend.calls.clear();
        frames.render_frame(&mut backend).unwrap();
        assert_eq!(backend.calls[0], Call::Recreate);
        assert_eq!(frames.recreations, 1);
    }

    #[test]
    fn stale_present_on_zero_area_surface_is_not_counted() {
        let mut backend = StubBackend::new();
        backend.zero_area = true;
        backend
            .presents
            .push_back(PresentOutcome::Stale(StaleReason::OutOfDate));
        let mut frames = FrameLoop::new(false);

        assert_eq!(
            frames.render_frame(&mut backend).unwrap(),
            FrameOutcome::Presented {
                image_index: 0,
                recreated: false
            }
        );
        assert_eq!(frames.recreations, 0);
        assert!(frames.recreate_requested);
    }

    #[test]
    fn finish_drains_a_pending_submission() {
        let mut backend = StubBackend::new();
        let mut frames = FrameLoop::new(false);

        frames.render_frame(&mut backend).unwrap();
        assert_eq!(backend.in_flight, 1);

        frames.finish(&mut backend).unwrap();
        assert_eq!(backend.in_flight, 0);
        assert_eq!(backend.calls.last(), Some(&Call::Drain));
    }
}
