// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod frame;

pub use frame::{
    AcquireOutcome, FrameBackend, FrameCursor, FrameLoop, FrameStatus, PresentOutcome,
    RecreateReasons, SlotError, SlotState, SlotTracker,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero area in either axis (minimized window).
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the frame loop needs from the windowing layer while it waits out a
/// zero-sized framebuffer.
pub trait FramebufferSource {
    fn framebuffer_size(&self) -> RenderSize;
    /// Block until at least one window event has been processed.
    fn wait_events(&mut self);
    fn close_requested(&self) -> bool;
}

pub trait Renderer {
    type Config;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: Self::Config,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Flag a swap chain rebuild for the next frame boundary.
    fn request_recreate(&mut self, reasons: RecreateReasons);
    fn draw_frame(&mut self, window: &mut dyn FramebufferSource) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn wait_idle(&self) -> Result<()>;
}
