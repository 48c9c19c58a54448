//! Frame pacing state machine.
//!
//! [`FrameLoop`] decides *when* to wait, acquire, record, submit, present and
//! recreate; a [`FrameBackend`] does the actual work. The Vulkan backend lives
//! in [`crate::context`], and the tests below drive a model backend that
//! tracks fences and command buffer reuse.
//!
//! One iteration for slot `i` of `K`:
//!
//! 1. recreate the swapchain first if a resize or an earlier out-of-date left
//!    it stale (a zero-sized window skips the frame)
//! 2. wait on `fence[i]`
//! 3. acquire an image; out-of-date recreates and ends the iteration with the
//!    fence still signaled
//! 4. reset `fence[i]`, record `command_buffer[i]` for the acquired image
//! 5. submit, then present
//! 6. advance `i = (i + 1) % K`, recreating if present or acquire asked for it

use tracing::{debug, trace};

use vkloop_core::config::MAX_FRAMES_IN_FLIGHT;
use vkloop_rhi::RhiResult;

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available. `suboptimal` asks for recreation after present.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
}

/// Result of queueing a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Result of a swapchain recreation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    /// Swapchain, views and framebuffers were rebuilt.
    Recreated,
    /// The framebuffer has zero area; nothing was touched.
    Deferred,
}

/// What one call to [`FrameLoop::run_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and queued for presentation.
    Presented { slot: usize, image_index: u32 },
    /// The swapchain went out of date; the frame was dropped after recreation.
    OutOfDate,
    /// The window has zero area; nothing was rendered.
    Skipped,
}

/// Operations the frame loop sequences.
///
/// Every method addresses a frame slot in `0..K`. Implementations may assume
/// the call order documented on [`FrameLoop::run_frame`].
pub trait FrameBackend {
    /// Blocks until the slot's in-flight fence is signaled.
    fn wait_for_fence(&mut self, slot: usize) -> RhiResult<()>;

    /// Returns the slot's fence to the unsignaled state.
    fn reset_fence(&mut self, slot: usize) -> RhiResult<()>;

    /// Acquires the next image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Resets and records the slot's command buffer for `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Submits the slot's command buffer, signaling its fence on completion.
    fn submit(&mut self, slot: usize) -> RhiResult<()>;

    /// Presents `image_index` once the slot's render-finished semaphore fires.
    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Rebuilds the swapchain for the current framebuffer size.
    fn recreate_swapchain(&mut self) -> RhiResult<RecreateOutcome>;
}

/// Clamps a requested frames-in-flight count to `1..=3`.
///
/// The frame loop and the context that owns the per-slot resources both go
/// through this, so they always agree on `K`.
pub fn clamp_frames_in_flight(requested: usize) -> usize {
    requested.clamp(1, MAX_FRAMES_IN_FLIGHT)
}

/// Drives `K` frames in flight over a [`FrameBackend`].
#[derive(Debug)]
pub struct FrameLoop {
    frames_in_flight: usize,
    current_slot: usize,
    /// Set by a resize or an out-of-date/suboptimal result.
    needs_recreate: bool,
    frames_presented: u64,
}

impl FrameLoop {
    /// Creates a loop with `frames_in_flight` slots, clamped to `1..=3`.
    pub fn new(frames_in_flight: usize) -> Self {
        let clamped = clamp_frames_in_flight(frames_in_flight);
        if clamped != frames_in_flight {
            debug!(
                "frames_in_flight {} out of range, using {}",
                frames_in_flight, clamped
            );
        }

        Self {
            frames_in_flight: clamped,
            current_slot: 0,
            needs_recreate: false,
            frames_presented: 0,
        }
    }

    /// Number of slots (K).
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Frames queued for presentation so far.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Whether the next frame will recreate the swapchain first.
    #[inline]
    pub fn recreate_pending(&self) -> bool {
        self.needs_recreate
    }

    /// Marks the swapchain stale, e.g. after a window resize.
    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Runs one iteration of the loop.
    ///
    /// # Errors
    ///
    /// Any backend error is returned unchanged. Out-of-date and suboptimal
    /// results are handled here and never surface as errors.
    pub fn run_frame(&mut self, backend: &mut impl FrameBackend) -> RhiResult<FrameStatus> {
        if self.needs_recreate && !self.try_recreate(backend)? {
            trace!("Framebuffer has zero area, skipping frame");
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.current_slot;
        backend.wait_for_fence(slot)?;

        let (image_index, acquire_suboptimal) = match backend.acquire(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire, recreating");
                self.needs_recreate = true;
                self.try_recreate(backend)?;
                return Ok(FrameStatus::OutOfDate);
            }
        };

        // Only reset once the frame is certain to submit
        backend.reset_fence(slot)?;
        backend.record(slot, image_index)?;
        backend.submit(slot)?;
        let presented = backend.present(slot, image_index)?;

        self.current_slot = (slot + 1) % self.frames_in_flight;

        let stale = match presented {
            PresentOutcome::Presented => acquire_suboptimal,
            PresentOutcome::Suboptimal => true,
            PresentOutcome::OutOfDate => {
                debug!("Swapchain out of date on present, recreating");
                self.needs_recreate = true;
                self.try_recreate(backend)?;
                return Ok(FrameStatus::OutOfDate);
            }
        };

        self.frames_presented += 1;

        if stale {
            debug!("Swapchain suboptimal, recreating");
            self.needs_recreate = true;
            self.try_recreate(backend)?;
        }

        Ok(FrameStatus::Presented { slot, image_index })
    }

    /// Recreates if possible. Returns false while the framebuffer is empty,
    /// leaving the request pending for the next frame.
    fn try_recreate(&mut self, backend: &mut impl FrameBackend) -> RhiResult<bool> {
        match backend.recreate_swapchain()? {
            RecreateOutcome::Recreated => {
                self.needs_recreate = false;
                Ok(true)
            }
            RecreateOutcome::Deferred => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkloop_rhi::{RhiError, vk};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
    }

    /// Fence and queue model. Submitted work stays pending until the fence is
    /// waited on, so recording into a slot whose work has not been waited for
    /// is caught.
    struct ModelBackend {
        signaled: Vec<bool>,
        pending: Vec<bool>,
        /// Submissions per slot, and the submission each recording followed.
        generations: Vec<u64>,
        waited_generation: Vec<u64>,
        calls: Vec<Call>,
        window: (u32, u32),
        swapchain: (u32, u32),
        image_count: u32,
        next_image: u32,
        acquires: u64,
        out_of_date_acquires: Vec<u64>,
        suboptimal_acquires: Vec<u64>,
        suboptimal_presents: Vec<u64>,
        out_of_date_presents: Vec<u64>,
        presents: u64,
        fail_submit: bool,
    }

    impl ModelBackend {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                signaled: vec![true; frames_in_flight],
                pending: vec![false; frames_in_flight],
                generations: vec![0; frames_in_flight],
                waited_generation: vec![0; frames_in_flight],
                calls: Vec::new(),
                window: (800, 600),
                swapchain: (800, 600),
                image_count: 3,
                next_image: 0,
                acquires: 0,
                out_of_date_acquires: Vec::new(),
                suboptimal_acquires: Vec::new(),
                suboptimal_presents: Vec::new(),
                out_of_date_presents: Vec::new(),
                presents: 0,
                fail_submit: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn recreations(&self) -> usize {
            self.count(|c| *c == Call::Recreate)
        }
    }

    impl FrameBackend for ModelBackend {
        fn wait_for_fence(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Wait(slot));
            if self.pending[slot] {
                self.pending[slot] = false;
                self.signaled[slot] = true;
            }
            assert!(self.signaled[slot], "waiting on an unsubmitted, unsignaled fence");
            self.waited_generation[slot] = self.generations[slot];
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Reset(slot));
            assert!(self.signaled[slot]);
            self.signaled[slot] = false;
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            self.acquires += 1;
            if self.out_of_date_acquires.contains(&self.acquires) {
                return Ok(AcquireOutcome::OutOfDate);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: self.suboptimal_acquires.contains(&self.acquires),
            })
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert!(!self.pending[slot], "command buffer still owned by the GPU");
            assert_eq!(
                self.waited_generation[slot], self.generations[slot],
                "slot {slot} recorded without waiting on its last submission"
            );
            assert!(image_index < self.image_count);
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
            }
            assert!(!self.signaled[slot], "submitting with a signaled fence");
            self.pending[slot] = true;
            self.generations[slot] += 1;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            self.presents += 1;
            if self.out_of_date_presents.contains(&self.presents) {
                Ok(PresentOutcome::OutOfDate)
            } else if self.suboptimal_presents.contains(&self.presents) {
                Ok(PresentOutcome::Suboptimal)
            } else {
                Ok(PresentOutcome::Presented)
            }
        }

        fn recreate_swapchain(&mut self) -> RhiResult<RecreateOutcome> {
            if self.window.0 == 0 || self.window.1 == 0 {
                return Ok(RecreateOutcome::Deferred);
            }
            self.calls.push(Call::Recreate);
            // Recreation waits for the device to go idle
            for slot in 0..self.pending.len() {
                if self.pending[slot] {
                    self.pending[slot] = false;
                    self.signaled[slot] = true;
                }
            }
            self.swapchain = self.window;
            self.next_image = 0;
            Ok(RecreateOutcome::Recreated)
        }
    }

    #[test]
    fn test_fence_wait_precedes_reuse_for_each_k() {
        for k in 1..=MAX_FRAMES_IN_FLIGHT {
            let mut frame_loop = FrameLoop::new(k);
            let mut backend = ModelBackend::new(k);

            for _ in 0..20 {
                let status = frame_loop.run_frame(&mut backend).unwrap();
                assert!(matches!(status, FrameStatus::Presented { .. }));
            }

            assert_eq!(frame_loop.frames_presented(), 20);
            assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 20);
        }
    }

    #[test]
    fn test_call_order_within_a_frame() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);

        frame_loop.run_frame(&mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(frame_loop.current_slot(), 1);
    }

    #[test]
    fn test_slots_cycle_modulo_k() {
        let mut frame_loop = FrameLoop::new(3);
        let mut backend = ModelBackend::new(3);

        let slots: Vec<usize> = (0..7)
            .map(|_| match frame_loop.run_frame(&mut backend).unwrap() {
                FrameStatus::Presented { slot, .. } => slot,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_out_of_date_acquire_leaves_fence_signaled() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);
        backend.out_of_date_acquires = vec![1];

        let status = frame_loop.run_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::OutOfDate);
        assert!(backend.signaled[0]);
        assert_eq!(backend.recreations(), 1);
        assert_eq!(frame_loop.current_slot(), 0);
        assert_eq!(frame_loop.frames_presented(), 0);

        // The same slot is reused without deadlocking on its fence
        let status = frame_loop.run_frame(&mut backend).unwrap();
        assert_eq!(
            status,
            FrameStatus::Presented {
                slot: 0,
                image_index: 0
            }
        );
    }

    #[test]
    fn test_resize_request_recreates_before_acquire() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);
        frame_loop.run_frame(&mut backend).unwrap();

        backend.window = (1024, 768);
        frame_loop.request_recreate();
        assert!(frame_loop.recreate_pending());
        backend.calls.clear();

        frame_loop.run_frame(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Recreate);
        assert_eq!(backend.calls[1], Call::Wait(1));
        assert_eq!(backend.swapchain, (1024, 768));
        assert!(!frame_loop.recreate_pending());
    }

    #[test]
    fn test_zero_extent_skips_until_restored() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);

        backend.window = (0, 0);
        frame_loop.request_recreate();

        for _ in 0..5 {
            assert_eq!(
                frame_loop.run_frame(&mut backend).unwrap(),
                FrameStatus::Skipped
            );
        }
        assert!(backend.calls.is_empty());
        assert!(frame_loop.recreate_pending());

        backend.window = (640, 480);
        let status = frame_loop.run_frame(&mut backend).unwrap();
        assert!(matches!(status, FrameStatus::Presented { .. }));
        assert_eq!(backend.swapchain, (640, 480));
        assert_eq!(backend.recreations(), 1);
    }

    #[test]
    fn test_suboptimal_present_recreates_after_present() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);
        backend.suboptimal_presents = vec![2];

        frame_loop.run_frame(&mut backend).unwrap();
        let status = frame_loop.run_frame(&mut backend).unwrap();

        // Still counts as a presented frame
        assert!(matches!(status, FrameStatus::Presented { slot: 1, .. }));
        assert_eq!(backend.calls.last(), Some(&Call::Recreate));
        assert_eq!(backend.recreations(), 1);
        assert!(!frame_loop.recreate_pending());
    }

    #[test]
    fn test_out_of_date_present_advances_slot_and_recreates() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);
        backend.out_of_date_presents = vec![3];

        frame_loop.run_frame(&mut backend).unwrap();
        frame_loop.run_frame(&mut backend).unwrap();
        backend.window = (1024, 768);
        backend.calls.clear();

        let status = frame_loop.run_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::OutOfDate);
        // The submission went out, so its slot is spent
        assert_eq!(frame_loop.current_slot(), 1);
        assert_eq!(frame_loop.frames_presented(), 2);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 2),
                Call::Submit(0),
                Call::Present(0, 2),
                Call::Recreate,
            ]
        );
        assert_eq!(backend.swapchain, (1024, 768));
        assert!(!frame_loop.recreate_pending());

        let status = frame_loop.run_frame(&mut backend).unwrap();
        assert_eq!(
            status,
            FrameStatus::Presented {
                slot: 1,
                image_index: 0
            }
        );
        assert_eq!(frame_loop.frames_presented(), 3);
        assert_eq!(backend.recreations(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_renders_then_recreates() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);
        backend.suboptimal_acquires = vec![1];

        let status = frame_loop.run_frame(&mut backend).unwrap();

        assert_eq!(
            status,
            FrameStatus::Presented {
                slot: 0,
                image_index: 0
            }
        );
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
                Call::Recreate,
            ]
        );
        assert_eq!(frame_loop.frames_presented(), 1);
        assert!(!frame_loop.recreate_pending());

        frame_loop.run_frame(&mut backend).unwrap();
        assert_eq!(backend.recreations(), 1);
    }

    #[test]
    fn test_backend_error_is_fatal() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = ModelBackend::new(2);
        backend.fail_submit = true;

        let err = frame_loop.run_frame(&mut backend).unwrap_err();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert_eq!(frame_loop.frames_presented(), 0);
    }

    #[test]
    fn test_clamp_frames_in_flight() {
        assert_eq!(clamp_frames_in_flight(0), 1);
        assert_eq!(clamp_frames_in_flight(1), 1);
        assert_eq!(clamp_frames_in_flight(3), 3);
        assert_eq!(clamp_frames_in_flight(4), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_frames_in_flight_is_clamped() {
        assert_eq!(FrameLoop::new(0).frames_in_flight(), 1);
        assert_eq!(FrameLoop::new(2).frames_in_flight(), 2);
        assert_eq!(FrameLoop::new(9).frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }
}
