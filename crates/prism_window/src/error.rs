use prism_renderer::RenderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("window creation: {0}")]
    Os(#[from] winit::error::OsError),

    #[error("window handle: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    #[error("no usable GL display configuration: {0}")]
    Display(String),

    #[error("GL context: {0}")]
    Context(#[from] glutin::error::Error),

    #[error(transparent)]
    Render(#[from] RenderError),
}
