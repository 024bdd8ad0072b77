//! Window, OpenGL context and the frame loop around a [`FrameHandler`].

pub mod error;
pub mod gl_context;
mod runner;

use prism_core::{AppConfig, InputState, Time};
use prism_renderer::{GlowDevice, RenderError};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::Window;

pub use error::WindowError;
pub use gl_context::GlWindowContext;

/// Everything a demo sees during one callback.
pub struct FrameContext<'a> {
    pub device: &'a mut GlowDevice,
    pub input: &'a InputState,
    pub time: &'a Time,
    pub window: &'a Window,
    /// Current framebuffer size in pixels.
    pub size: (u32, u32),
}

impl FrameContext<'_> {
    pub fn aspect_ratio(&self) -> f32 {
        self.size.0 as f32 / self.size.1.max(1) as f32
    }
}

pub trait FrameHandler {
    /// Runs once, after the GL context is current.
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError>;

    fn frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError>;

    fn resized(&mut self, _ctx: &mut FrameContext<'_>) {}

    fn teardown(&mut self, _device: &mut GlowDevice) {}
}

/// Opens the configured window and drives `handler` until the window closes
/// or a callback fails.
pub fn run<H: FrameHandler>(config: &AppConfig, handler: H) -> Result<(), WindowError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = runner::Runner::new(config.window.clone(), handler);
    event_loop.run_app(&mut runner)?;
    runner.into_result()
}

/// Window title with the frame rate appended.
pub fn fps_title(title: &str, fps: f32) -> String {
    format!("{title} | {fps:.0} fps")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_title_rounds() {
        assert_eq!(fps_title("Prism", 59.7), "Prism | 60 fps");
        assert_eq!(fps_title("glp", 0.0), "glp | 0 fps");
    }
}
