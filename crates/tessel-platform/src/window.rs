// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

use tessel_render::{FramebufferSource, RenderSize};

#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// Event handler state. Creates the window on the first resume and records
/// what the frame loop needs to know.
struct Shell {
    attributes: WindowAttributes,
    window: Option<Window>,
    window_id: Option<WindowId>,
    create_error: Option<String>,
    resized: bool,
    close_requested: bool,
}

impl ApplicationHandler for Shell {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window_id.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                self.window_id = Some(window.id());
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window_id != Some(id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyQ),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                info!("Q pressed, exiting");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            _ => {}
        }
    }
}

/// The platform's windowing capability: one event loop and its window.
/// Events are pumped explicitly by the owner; dropping the handle closes the
/// window and releases the platform.
pub struct WindowSystem {
    window: Window,
    shell: Shell,
    event_loop: EventLoop<()>,
}

impl WindowSystem {
    pub fn new(desc: &WindowDesc) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("create event loop")?;
        let mut shell = Shell {
            attributes: Window::default_attributes()
                .with_title(desc.title.clone())
                .with_inner_size(PhysicalSize::new(desc.width.max(1), desc.height.max(1))),
            window: None,
            window_id: None,
            create_error: None,
            resized: false,
            close_requested: false,
        };

        // The window appears on the first resume, which the platform delivers
        // from inside a pump.
        let window = loop {
            let status = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut shell);
            if let Some(e) = shell.create_error.take() {
                bail!("create window: {e}");
            }
            if let Some(window) = shell.window.take() {
                break window;
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited ({code}) before a window was created");
            }
        };

        let size = window.inner_size();
        info!("window '{}' {}x{}", desc.title, size.width, size.height);
        Ok(Self {
            window,
            shell,
            event_loop,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Process pending events without blocking.
    pub fn pump(&mut self) {
        self.pump_with(Some(Duration::ZERO));
    }

    /// Whether a resize arrived since the last call.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.shell.resized)
    }

    fn pump_with(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(timeout, &mut self.shell) {
            self.shell.close_requested = true;
        }
    }
}

impl FramebufferSource for WindowSystem {
    fn framebuffer_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }

    fn wait_events(&mut self) {
        self.pump_with(None);
    }

    fn close_requested(&self) -> bool {
        self.shell.close_requested
    }
}
