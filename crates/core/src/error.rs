//! Error types shared by the lockstep crates.

use thiserror::Error;

/// Failure surfaced to a launcher.
#[derive(Error, Debug)]
pub enum Error {
    /// Device, queue, fence or swap chain failure from a backend.
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Window creation or handle access failed
    #[error("Window error: {0}")]
    Window(String),

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad launch options or sample settings
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<std::fs::File> {
            Ok(std::fs::File::open("/nonexistent/lockstep/shaders")?)
        }
        assert!(matches!(open(), Err(Error::Io(_))));
    }

    #[test]
    fn test_display_names_the_category() {
        let err = Error::Config("volume must be a multiple of 8".into());
        assert_eq!(err.to_string(), "Config error: volume must be a multiple of 8");
    }
}
