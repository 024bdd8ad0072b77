//! `log`/`env_logger` setup with indent/outdent scoping for nested setup phases.
//!
//! ```no_run
//! prism_core::logging::init("info");
//! let _scope = prism_core::logging::LogScope::enter("Setup: importing assets");
//! log::info!("loading cube.obj"); // printed one level deeper
//! ```

use std::cell::Cell;
use std::fmt::Display;
use std::io::Write;

use env_logger::Env;

const INDENT: &str = "  ";

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Installs the global logger. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless; the second call is ignored.
pub fn init(default_filter: &str) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:<5} {}] {}{}",
                record.level(),
                record.target(),
                indentation(depth()),
                record.args()
            )
        })
        .try_init();
}

pub fn indentation(depth: usize) -> String {
    INDENT.repeat(depth)
}

pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

pub fn indent() {
    DEPTH.with(|d| d.set(d.get() + 1));
}

pub fn outdent() {
    DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
}

/// Logs a heading and indents everything logged until it is dropped.
#[must_use = "the scope outdents as soon as it is dropped"]
pub struct LogScope {
    _private: (),
}

impl LogScope {
    pub fn enter(heading: impl Display) -> Self {
        log::info!("{heading}");
        indent();
        Self { _private: () }
    }
}

impl Drop for LogScope {
    fn drop(&mut self) {
        outdent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_nest_and_unwind() {
        let base = depth();
        {
            let _outer = LogScope::enter("outer");
            assert_eq!(depth(), base + 1);
            {
                let _inner = LogScope::enter("inner");
                assert_eq!(depth(), base + 2);
            }
            assert_eq!(depth(), base + 1);
        }
        assert_eq!(depth(), base);
    }

    #[test]
    fn test_outdent_never_underflows() {
        let base = depth();
        for _ in 0..base + 3 {
            outdent();
        }
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_indentation_width() {
        assert_eq!(indentation(0), "");
        assert_eq!(indentation(3), "      ");
    }
}
