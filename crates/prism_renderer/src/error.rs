use std::path::PathBuf;

use prism_assets::AssetError;
use thiserror::Error;

use crate::device::ShaderStage;

/// Setup-time failures. Per-frame misses (unknown uniform names) are logged, never returned.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot read shader source {path}: {source}")]
    ShaderSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot infer shader stage from {0} (expected .vert, .tc, .te, .geom or .frag)")]
    UnknownStage(PathBuf),

    #[error("{stage:?} shader {label} failed to compile:\n{log}")]
    Compile {
        stage: ShaderStage,
        label: String,
        log: String,
    },

    #[error("program [{labels}] failed to link:\n{log}")]
    Link { labels: String, log: String },

    #[error("framebuffer incomplete: {status}")]
    IncompleteFramebuffer { status: String },

    #[error("render target has no attachment named `{0}`")]
    MissingAttachment(String),

    #[error("program {program} declares no uniform block `{block}`")]
    UnknownUniformBlock { program: String, block: String },

    #[error("renderable `{0}` has no per-instance attributes and cannot be drawn instanced")]
    NotInstanceable(String),

    #[error("pass `{pass}` reads `{texture}` before any earlier step writes it")]
    PassOrder { pass: String, texture: String },

    #[error("pass `{pass}` samples its own render target")]
    FeedbackLoop { pass: String },

    #[error("device: {0}")]
    Device(String),

    #[error(transparent)]
    Asset(#[from] AssetError),
}
