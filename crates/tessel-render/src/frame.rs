// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bitflags::bitflags;
use thiserror::Error;
use tracing::{debug, info};

use crate::{FramebufferSource, RenderSize};

bitflags! {
    /// Reasons the swap chain and everything derived from it must be rebuilt.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RecreateReasons: u32 {
        const RESIZED = 1 << 0;
        const OUT_OF_DATE = 1 << 1;
        const SUBOPTIMAL = 1 << 2;
        const SHADERS_CHANGED = 1 << 3;
    }
}

/// Index of the frame slot used by the next loop iteration, in `[0, F)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    frames: usize,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            frames: frames_in_flight.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, nothing of this slot is pending on the device.
    Available,
    /// Fence reset, command buffer is being recorded.
    Recording,
    /// Submitted; the command buffer and per-slot memory belong to the device
    /// until the fence is observed signaled.
    InFlight,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("frame slot {0} is still in flight; its fence must be waited on before re-recording")]
    InFlight(usize),
    #[error("frame slot {0} was submitted without being recorded")]
    NotRecording(usize),
}

/// Host-side mirror of one slot's fence. Slots start `Available` because
/// their fences are created signaled.
#[derive(Clone, Copy, Debug)]
pub struct SlotTracker {
    index: usize,
    state: SlotState,
}

impl SlotTracker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: SlotState::Available,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Host observed the fence signaled.
    pub fn fence_signaled(&mut self) {
        if self.state == SlotState::InFlight {
            self.state = SlotState::Available;
        }
    }

    pub fn begin_recording(&mut self) -> Result<(), SlotError> {
        match self.state {
            SlotState::InFlight => Err(SlotError::InFlight(self.index)),
            SlotState::Available | SlotState::Recording => {
                self.state = SlotState::Recording;
                Ok(())
            }
        }
    }

    pub fn mark_submitted(&mut self) -> Result<(), SlotError> {
        match self.state {
            SlotState::Recording => {
                self.state = SlotState::InFlight;
                Ok(())
            }
            _ => Err(SlotError::NotRecording(self.index)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and presented; `recreated` is set when the swap
    /// chain was rebuilt at the end of the iteration.
    Presented { recreated: bool },
    /// Acquisition hit a stale chain. Nothing was submitted and the cursor
    /// did not move.
    Skipped,
}

/// The device side of one loop iteration. Every call addresses a frame slot
/// by index; errors returned here are fatal to the loop.
pub trait FrameBackend {
    /// Block until the slot's in-flight fence signals.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    /// Acquire the next presentable image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    /// Write per-frame host-visible data owned by this slot.
    fn update_frame_data(&mut self, slot: usize, image: u32) -> Result<()>;
    /// Reset the slot's fence and command pool, then record the frame.
    fn reset_and_record(&mut self, slot: usize, image: u32) -> Result<()>;
    /// Submit to the graphics queue: wait image-available, signal
    /// render-finished and the slot's fence.
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome>;
    /// Tear down and rebuild the swap chain and all its dependents at `size`.
    /// `reasons` is everything that accumulated since the last rebuild.
    fn recreate_swapchain(&mut self, size: RenderSize, reasons: RecreateReasons) -> Result<()>;
}

/// Drives acquire, record, submit and present over `F` frame slots.
#[derive(Debug)]
pub struct FrameLoop {
    cursor: FrameCursor,
    slots: Vec<SlotTracker>,
    pending: RecreateReasons,
}

impl FrameLoop {
    pub fn new(frames_in_flight: usize) -> Self {
        let cursor = FrameCursor::new(frames_in_flight);
        let slots = (0..cursor.frames_in_flight())
            .map(SlotTracker::new)
            .collect();
        Self {
            cursor,
            slots,
            pending: RecreateReasons::empty(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor.current()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.cursor.frames_in_flight()
    }

    pub fn slot(&self, index: usize) -> &SlotTracker {
        &self.slots[index]
    }

    pub fn pending(&self) -> RecreateReasons {
        self.pending
    }

    pub fn request_recreate(&mut self, reasons: RecreateReasons) {
        self.pending |= reasons;
    }

    pub fn run_frame<B>(
        &mut self,
        backend: &mut B,
        window: &mut dyn FramebufferSource,
    ) -> Result<FrameStatus>
    where
        B: FrameBackend + ?Sized,
    {
        let slot = self.cursor.current();

        // 1) host waits until the device is done with this slot
        backend.wait_for_slot(slot)?;
        self.slots[slot].fence_signaled();

        // 2) acquire; a stale chain restarts the iteration on the same slot
        let image = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired { image, suboptimal } => {
                if suboptimal {
                    self.pending |= RecreateReasons::SUBOPTIMAL;
                }
                image
            }
            AcquireOutcome::OutOfDate => {
                self.pending |= RecreateReasons::OUT_OF_DATE;
                self.recreate(backend, window)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        // 3) per-slot uniforms; the fence wait above covers the device's last read
        backend.update_frame_data(slot, image)?;

        // 4-5) reset, record, submit
        self.slots[slot].begin_recording()?;
        backend.reset_and_record(slot, image)?;
        backend.submit(slot)?;
        self.slots[slot].mark_submitted()?;

        // 6) present
        match backend.present(slot, image)? {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => self.pending |= RecreateReasons::SUBOPTIMAL,
            PresentOutcome::OutOfDate => self.pending |= RecreateReasons::OUT_OF_DATE,
        }

        // 7) the submitted slot is in flight whether or not the rebuild succeeds
        self.cursor.advance();
        let recreated = !self.pending.is_empty() && self.recreate(backend, window)?;
        Ok(FrameStatus::Presented { recreated })
    }

    /// Rebuild the swap chain once the framebuffer has a drawable area.
    /// Returns `false` when the window asked to close while minimized; the
    /// pending reasons are kept in that case.
    pub fn recreate<B>(&mut self, backend: &mut B, window: &mut dyn FramebufferSource) -> Result<bool>
    where
        B: FrameBackend + ?Sized,
    {
        let Some(size) = wait_for_drawable(window) else {
            debug!("close requested while minimized; swap chain rebuild skipped");
            return Ok(false);
        };

        info!(
            "rebuilding swap chain at {}x{} ({:?})",
            size.width, size.height, self.pending
        );
        backend.recreate_swapchain(size, self.pending)?;
        self.pending = RecreateReasons::empty();
        Ok(true)
    }
}

fn wait_for_drawable(window: &mut dyn FramebufferSource) -> Option<RenderSize> {
    let mut size = window.framebuffer_size();
    while size.is_empty() {
        if window.close_requested() {
            return None;
        }
        window.wait_events();
        size = window.framebuffer_size();
    }
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Update(usize, u32),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate(RenderSize),
    }

    /// Fake device: a slot's fence is "pending" from submit until the host
    /// waits on it.
    struct MockBackend {
        calls: Vec<Call>,
        fence_pending: Vec<bool>,
        images: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        fail_recreate: bool,
    }

    impl MockBackend {
        fn new(frames: usize) -> Self {
            Self {
                calls: Vec::new(),
                fence_pending: vec![false; frames],
                images: 3,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_recreate: false,
            }
        }

        fn recreations(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::Recreate(_)))
                .count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            self.fence_pending[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(AcquireOutcome::Acquired {
                image,
                suboptimal: false,
            })
        }

        fn update_frame_data(&mut self, slot: usize, image: u32) -> Result<()> {
            self.calls.push(Call::Update(slot, image));
            Ok(())
        }

        fn reset_and_record(&mut self, slot: usize, image: u32) -> Result<()> {
            if self.fence_pending[slot] {
                bail!("slot {slot} recorded while its fence is pending");
            }
            self.calls.push(Call::Record(slot, image));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            self.fence_pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self, size: RenderSize, _reasons: RecreateReasons) -> Result<()> {
            if self.fail_recreate {
                bail!("surface lost");
            }
            self.calls.push(Call::Recreate(size));
            Ok(())
        }
    }

    struct MockWindow {
        sizes: VecDeque<RenderSize>,
        current: RenderSize,
        waits: usize,
        close_after_waits: Option<usize>,
    }

    impl MockWindow {
        fn sized(width: u32, height: u32) -> Self {
            Self::sequence(&[(width, height)])
        }

        fn sequence(sizes: &[(u32, u32)]) -> Self {
            let mut sizes: VecDeque<_> = sizes
                .iter()
                .map(|&(w, h)| RenderSize::new(w, h))
                .collect();
            let current = sizes.pop_front().unwrap_or_default();
            Self {
                sizes,
                current,
                waits: 0,
                close_after_waits: None,
            }
        }
    }

    impl FramebufferSource for MockWindow {
        fn framebuffer_size(&self) -> RenderSize {
            self.current
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(next) = self.sizes.pop_front() {
                self.current = next;
            }
        }

        fn close_requested(&self) -> bool {
            self.close_after_waits.is_some_and(|n| self.waits >= n)
        }
    }

    #[test]
    fn cursor_wraps_for_any_frame_count() {
        for frames in 1..=5 {
            let mut cursor = FrameCursor::new(frames);
            for step in 0..frames * 3 {
                assert_eq!(cursor.current(), step % frames);
                cursor.advance();
            }
        }
        assert_eq!(FrameCursor::new(0).frames_in_flight(), 1);
    }

    #[test]
    fn every_slot_is_waited_before_it_is_recorded_again() {
        for frames in 1..=4 {
            let mut frame_loop = FrameLoop::new(frames);
            let mut backend = MockBackend::new(frames);
            let mut window = MockWindow::sized(640, 480);

            for _ in 0..frames * 4 {
                let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
                assert_eq!(status, FrameStatus::Presented { recreated: false });
            }

            let recorded: Vec<usize> = backend
                .calls
                .iter()
                .filter_map(|c| match c {
                    Call::Record(slot, _) => Some(*slot),
                    _ => None,
                })
                .collect();
            let expected: Vec<usize> = (0..frames * 4).map(|i| i % frames).collect();
            assert_eq!(recorded, expected);

            // between two submits of the same slot there is always a wait on it
            for slot in 0..frames {
                let mut submitted = false;
                for call in &backend.calls {
                    match *call {
                        Call::Wait(s) if s == slot => submitted = false,
                        Call::Record(s, _) if s == slot => assert!(!submitted),
                        Call::Submit(s) if s == slot => submitted = true,
                        _ => {}
                    }
                }
            }
        }
    }

    #[test]
    fn rerecording_an_in_flight_slot_is_rejected() {
        let mut a = SlotTracker::new(0);
        let mut b = SlotTracker::new(1);

        a.begin_recording().unwrap();
        a.mark_submitted().unwrap();
        b.begin_recording().unwrap();
        b.mark_submitted().unwrap();

        assert_eq!(a.begin_recording(), Err(SlotError::InFlight(0)));
        assert_eq!(a.state(), SlotState::InFlight);

        a.fence_signaled();
        assert_eq!(a.begin_recording(), Ok(()));
        assert_eq!(b.state(), SlotState::InFlight);
    }

    #[test]
    fn submit_without_recording_is_rejected() {
        let mut slot = SlotTracker::new(3);
        assert_eq!(slot.mark_submitted(), Err(SlotError::NotRecording(3)));
    }

    #[test]
    fn acquire_out_of_date_rebuilds_without_advancing() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = MockWindow::sized(800, 600);

        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Skipped);
        assert_eq!(frame_loop.cursor(), 0);
        assert_eq!(backend.recreations(), 1);
        assert!(frame_loop.pending().is_empty());
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Submit(_))));

        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert!(backend.calls.contains(&Call::Submit(0)));
        assert_eq!(frame_loop.cursor(), 1);
    }

    #[test]
    fn present_out_of_date_rebuilds_and_still_advances() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        backend.present_script.push_back(PresentOutcome::OutOfDate);
        let mut window = MockWindow::sized(800, 600);

        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: true });
        assert_eq!(frame_loop.cursor(), 1);
        assert_eq!(backend.calls.last(), Some(&Call::Recreate(RenderSize::new(800, 600))));

        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert_eq!(frame_loop.cursor(), 0);
    }

    #[test]
    fn suboptimal_acquire_still_draws_then_rebuilds() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(AcquireOutcome::Acquired {
            image: 1,
            suboptimal: true,
        });
        let mut window = MockWindow::sized(800, 600);

        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: true });
        let present = backend
            .calls
            .iter()
            .position(|c| *c == Call::Present(0, 1))
            .unwrap();
        let rebuild = backend
            .calls
            .iter()
            .position(|c| matches!(c, Call::Recreate(_)))
            .unwrap();
        assert!(present < rebuild);
    }

    #[test]
    fn zero_sized_framebuffer_blocks_until_drawable() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = MockWindow::sequence(&[(0, 0), (800, 0), (0, 600), (800, 600)]);

        frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(window.waits, 3);
        assert_eq!(
            backend.calls.last(),
            Some(&Call::Recreate(RenderSize::new(800, 600)))
        );
    }

    #[test]
    fn close_while_minimized_skips_rebuild_and_keeps_flag() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = MockWindow::sequence(&[(0, 0)]);
        window.close_after_waits = Some(1);

        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Skipped);
        assert_eq!(backend.recreations(), 0);
        assert!(frame_loop.pending().contains(RecreateReasons::OUT_OF_DATE));
    }

    #[test]
    fn requested_flag_clears_only_after_successful_rebuild() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        let mut window = MockWindow::sized(1024, 768);

        frame_loop.request_recreate(RecreateReasons::SHADERS_CHANGED);
        backend.fail_recreate = true;
        assert!(frame_loop.run_frame(&mut backend, &mut window).is_err());
        assert!(frame_loop
            .pending()
            .contains(RecreateReasons::SHADERS_CHANGED));

        backend.fail_recreate = false;
        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: true });
        assert!(frame_loop.pending().is_empty());
    }

    #[test]
    fn failed_rebuild_after_submit_still_moves_off_the_slot() {
        let mut frame_loop = FrameLoop::new(2);
        let mut backend = MockBackend::new(2);
        backend.present_script.push_back(PresentOutcome::OutOfDate);
        backend.fail_recreate = true;
        let mut window = MockWindow::sized(800, 600);

        assert!(frame_loop.run_frame(&mut backend, &mut window).is_err());
        assert!(backend.calls.contains(&Call::Submit(0)));
        assert_eq!(frame_loop.cursor(), 1);
        assert_eq!(frame_loop.slot(0).state(), SlotState::InFlight);
        assert!(frame_loop.pending().contains(RecreateReasons::OUT_OF_DATE));

        // the next frame uses the other slot and retries the rebuild
        backend.fail_recreate = false;
        let status = frame_loop.run_frame(&mut backend, &mut window).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: true });
        assert!(backend.calls.contains(&Call::Record(1, 1)));
        assert_eq!(frame_loop.cursor(), 0);
    }
}
