//! Driver error decoding. Errors are polled at explicit checkpoints and
//! logged; they never abort a frame.

use crate::device::GraphicsDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlErrorCode {
    NoError,
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    InvalidFramebufferOperation,
    OutOfMemory,
    Unknown(u32),
}

impl GlErrorCode {
    pub fn from_raw(code: u32) -> Self {
        match code {
            glow::NO_ERROR => Self::NoError,
            glow::INVALID_ENUM => Self::InvalidEnum,
            glow::INVALID_VALUE => Self::InvalidValue,
            glow::INVALID_OPERATION => Self::InvalidOperation,
            glow::INVALID_FRAMEBUFFER_OPERATION => Self::InvalidFramebufferOperation,
            glow::OUT_OF_MEMORY => Self::OutOfMemory,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::NoError => glow::NO_ERROR,
            Self::InvalidEnum => glow::INVALID_ENUM,
            Self::InvalidValue => glow::INVALID_VALUE,
            Self::InvalidOperation => glow::INVALID_OPERATION,
            Self::InvalidFramebufferOperation => glow::INVALID_FRAMEBUFFER_OPERATION,
            Self::OutOfMemory => glow::OUT_OF_MEMORY,
            Self::Unknown(code) => code,
        }
    }

    /// Unknown codes decode to an empty string.
    pub fn name(self) -> &'static str {
        match self {
            Self::NoError => "GL_NO_ERROR",
            Self::InvalidEnum => "GL_INVALID_ENUM",
            Self::InvalidValue => "GL_INVALID_VALUE",
            Self::InvalidOperation => "GL_INVALID_OPERATION",
            Self::InvalidFramebufferOperation => "GL_INVALID_FRAMEBUFFER_OPERATION",
            Self::OutOfMemory => "GL_OUT_OF_MEMORY",
            Self::Unknown(_) => "",
        }
    }
}

pub fn decode_gl_error(code: u32) -> &'static str {
    GlErrorCode::from_raw(code).name()
}

/// glCheckFramebufferStatus result as its GL name.
pub fn framebuffer_status_name(status: u32) -> &'static str {
    match status {
        glow::FRAMEBUFFER_COMPLETE => "GL_FRAMEBUFFER_COMPLETE",
        glow::FRAMEBUFFER_UNDEFINED => "GL_FRAMEBUFFER_UNDEFINED",
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => "GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT",
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
            "GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT"
        }
        glow::FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER => "GL_FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER",
        glow::FRAMEBUFFER_INCOMPLETE_READ_BUFFER => "GL_FRAMEBUFFER_INCOMPLETE_READ_BUFFER",
        glow::FRAMEBUFFER_UNSUPPORTED => "GL_FRAMEBUFFER_UNSUPPORTED",
        glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => "GL_FRAMEBUFFER_INCOMPLETE_MULTISAMPLE",
        glow::FRAMEBUFFER_INCOMPLETE_LAYER_TARGETS => "GL_FRAMEBUFFER_INCOMPLETE_LAYER_TARGETS",
        _ => "unknown framebuffer status",
    }
}

/// Drains every pending error flag and logs it. Returns the decoded errors.
pub fn check_gl_error(device: &mut dyn GraphicsDevice, print_if_no_error: bool) -> Vec<GlErrorCode> {
    let mut errors = Vec::new();
    loop {
        let code = GlErrorCode::from_raw(device.poll_error());
        if code == GlErrorCode::NoError {
            break;
        }
        log::error!("GL error {:#06x} {}", code.raw(), code.name());
        errors.push(code);
        // a lost context keeps reporting; don't spin forever
        if errors.len() >= 16 {
            break;
        }
    }
    if errors.is_empty() && print_if_no_error {
        log::info!("{}", GlErrorCode::NoError.name());
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_and_unknown_codes() {
        assert_eq!(decode_gl_error(0x0501), "GL_INVALID_VALUE");
        assert_eq!(decode_gl_error(0x0500), "GL_INVALID_ENUM");
        assert_eq!(decode_gl_error(0x0502), "GL_INVALID_OPERATION");
        assert_eq!(decode_gl_error(0x0506), "GL_INVALID_FRAMEBUFFER_OPERATION");
        assert_eq!(decode_gl_error(0x0505), "GL_OUT_OF_MEMORY");
        assert_eq!(decode_gl_error(0), "GL_NO_ERROR");
        assert_eq!(decode_gl_error(0x1234), "");
    }

    #[test]
    fn test_framebuffer_status_names() {
        assert_eq!(
            framebuffer_status_name(glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT),
            "GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT"
        );
    }
}
