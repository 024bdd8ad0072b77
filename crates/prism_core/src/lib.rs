pub mod camera;
pub mod config;
pub mod input;
pub mod logging;
pub mod time;

pub use camera::{FirstPersonCamera, LookAtCamera, Projection, Turntable};
pub use config::{AppConfig, ConfigError, WindowConfig};
pub use input::{ButtonPhase, InputState, KeyCode, MouseButton};
pub use logging::LogScope;
pub use time::Time;
