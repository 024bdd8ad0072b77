use std::num::NonZeroU32;

use glutin::config::{ConfigTemplateBuilder, GlConfig};
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, PossiblyCurrentContext, Version,
};
use glutin::display::{GetGlDisplay, GlDisplay};
use glutin::surface::{GlSurface, Surface, SwapInterval, WindowSurface};
use glutin_winit::{DisplayBuilder, GlWindow};
use prism_core::WindowConfig;
use prism_renderer::GlowDevice;
use raw_window_handle::HasWindowHandle;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use crate::error::WindowError;

pub const GL_VERSION: Version = Version::new(4, 3);

/// A window with a current OpenGL 4.3 core context and the device driving it.
pub struct GlWindowContext {
    pub window: Window,
    pub device: GlowDevice,
    surface: Surface<WindowSurface>,
    context: PossiblyCurrentContext,
}

impl GlWindowContext {
    pub fn create(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self, WindowError> {
        let attributes = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let template = ConfigTemplateBuilder::new().with_alpha_size(8).with_depth_size(24);

        let (window, gl_config) = DisplayBuilder::new()
            .with_window_attributes(Some(attributes.clone()))
            .build(event_loop, template, |configs| {
                // glutin only calls the picker with at least one candidate
                configs
                    .reduce(|best, c| if c.num_samples() > best.num_samples() { c } else { best })
                    .expect("display offered no GL configs")
            })
            .map_err(|e| WindowError::Display(e.to_string()))?;
        let window = match window {
            Some(window) => window,
            None => glutin_winit::finalize_window(event_loop, attributes, &gl_config)?,
        };

        let raw_handle = window.window_handle()?.as_raw();
        let display = gl_config.display();
        let context_attributes = ContextAttributesBuilder::new()
            .with_profile(GlProfile::Core)
            .with_context_api(ContextApi::OpenGl(Some(GL_VERSION)))
            .build(Some(raw_handle));
        let not_current = unsafe { display.create_context(&gl_config, &context_attributes)? };

        let surface_attributes = window.build_surface_attributes(Default::default())?;
        let surface = unsafe { display.create_window_surface(&gl_config, &surface_attributes)? };
        let context = not_current.make_current(&surface)?;

        let interval = if config.vsync {
            SwapInterval::Wait(NonZeroU32::MIN)
        } else {
            SwapInterval::DontWait
        };
        if let Err(err) = surface.set_swap_interval(&context, interval) {
            log::warn!("cannot set swap interval: {err}");
        }

        let gl = unsafe { glow::Context::from_loader_function_cstr(|name| display.get_proc_address(name)) };
        let size = window.inner_size();
        log::info!(
            "OpenGL context {}.{} core, {}x{}",
            GL_VERSION.major,
            GL_VERSION.minor,
            size.width,
            size.height
        );
        let device = GlowDevice::new(gl, size.width.max(1), size.height.max(1));

        Ok(Self {
            window,
            device,
            surface,
            context,
        })
    }

    /// Zero sizes (minimized windows) leave the surface untouched.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            return false;
        };
        self.surface.resize(&self.context, w, h);
        self.device.set_default_framebuffer_size(width, height);
        true
    }

    pub fn swap_buffers(&self) -> Result<(), WindowError> {
        self.surface.swap_buffers(&self.context)?;
        Ok(())
    }
}
