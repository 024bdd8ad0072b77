use std::time::Duration;

use glam::Vec2;
use prism_core::{InputState, KeyCode, Time, WindowConfig};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use crate::error::WindowError;
use crate::gl_context::GlWindowContext;
use crate::{FrameContext, FrameHandler, fps_title};

const TITLE_REFRESH: Duration = Duration::from_secs(1);

/// Holds the handler while waiting for the OS to hand over a window.
pub(crate) struct Runner<H> {
    config: WindowConfig,
    handler: H,
    gl: Option<GlWindowContext>,
    input: InputState,
    time: Time,
    since_title: Duration,
    error: Option<WindowError>,
}

impl<H: FrameHandler> Runner<H> {
    pub(crate) fn new(config: WindowConfig, handler: H) -> Self {
        Self {
            config,
            handler,
            gl: None,
            input: InputState::default(),
            time: Time::default(),
            since_title: Duration::ZERO,
            error: None,
        }
    }

    pub(crate) fn into_result(mut self) -> Result<(), WindowError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: WindowError) {
        log::error!("{err}");
        self.error = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(gl) = self.gl.as_mut() {
            self.handler.teardown(&mut gl.device);
        }
        self.gl = None;
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<(), WindowError> {
        let Some(gl) = self.gl.as_mut() else {
            return Ok(());
        };
        self.time.update();
        let size = gl.window.inner_size();
        let mut ctx = FrameContext {
            device: &mut gl.device,
            input: &self.input,
            time: &self.time,
            window: &gl.window,
            size: (size.width, size.height),
        };
        self.handler.frame(&mut ctx)?;
        gl.swap_buffers()?;
        self.input.end_frame();

        self.since_title += Duration::from_secs_f32(self.time.delta_seconds());
        if self.since_title >= TITLE_REFRESH {
            self.since_title = Duration::ZERO;
            gl.window.set_title(&fps_title(&self.config.title, self.time.fps()));
        }
        gl.window.request_redraw();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(gl) = self.gl.as_mut() else {
            return;
        };
        if !gl.resize(width, height) {
            return;
        }
        log::debug!("resized to {width}x{height}");
        let mut ctx = FrameContext {
            device: &mut gl.device,
            input: &self.input,
            time: &self.time,
            window: &gl.window,
            size: (width, height),
        };
        self.handler.resized(&mut ctx);
    }
}

impl<H: FrameHandler> ApplicationHandler for Runner<H> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gl.is_some() {
            return;
        }
        let mut gl = match GlWindowContext::create(event_loop, &self.config) {
            Ok(gl) => gl,
            Err(err) => return self.fail(event_loop, err),
        };

        let size = gl.window.inner_size();
        let mut ctx = FrameContext {
            device: &mut gl.device,
            input: &self.input,
            time: &self.time,
            window: &gl.window,
            size: (size.width, size.height),
        };
        let setup = self.handler.setup(&mut ctx);
        gl.window.request_redraw();
        self.gl = Some(gl);
        if let Err(err) = setup {
            self.fail(event_loop, err.into());
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gl) = &self.gl {
            gl.window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("window closed");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => match (code, state) {
                (KeyCode::Escape, ElementState::Pressed) => self.shutdown(event_loop),
                (_, ElementState::Pressed) => self.input.press_key(code),
                (_, ElementState::Released) => self.input.release_key(code),
            },
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => self.input.press_mouse(button),
                ElementState::Released => self.input.release_mouse(button),
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.input
                    .move_cursor(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 120.0,
                };
                self.input.scroll(amount);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err);
                }
            }
            _ => (),
        }
    }
}
