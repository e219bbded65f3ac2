// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod watch;
mod window;

pub use watch::{matches_watched, ShaderWatch};
pub use window::{WindowDesc, WindowSystem};

pub use winit;
