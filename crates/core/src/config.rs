//! Launch options parsed from the command line and environment.

use std::path::PathBuf;

/// Environment variable that overrides where compiled shaders are loaded from.
pub const SHADER_DIR_ENV: &str = "LOCKSTEP_SHADER_DIR";

/// Options every sample binary accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Force a software (CPU) adapter.
    pub warp: bool,
    /// Initial client width in pixels.
    pub width: u32,
    /// Initial client height in pixels.
    pub height: u32,
    /// Directory holding compiled shaders, if overridden.
    pub shader_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            warp: false,
            width: 1280,
            height: 720,
            shader_dir: None,
        }
    }
}

impl LaunchOptions {
    /// Parse options from process arguments (without the program name).
    ///
    /// `-warp` and `/warp` are matched case-insensitively, and any non-empty
    /// prefix of either spelling counts. Unrecognised arguments are ignored.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for arg in args {
            if is_warp_flag(arg.as_ref()) {
                options.warp = true;
            }
        }
        options
    }

    /// Parse from `std::env::args` and `LOCKSTEP_SHADER_DIR`.
    pub fn from_env() -> Self {
        let mut options = Self::from_args(std::env::args().skip(1));
        options.shader_dir = std::env::var_os(SHADER_DIR_ENV).map(PathBuf::from);
        options
    }

    /// Override the initial window size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Window title for a sample, marked when the software adapter is forced.
    pub fn decorate_title(&self, title: &str) -> String {
        if self.warp {
            format!("{title} (WARP)")
        } else {
            title.to_string()
        }
    }
}

fn is_warp_flag(arg: &str) -> bool {
    if arg.is_empty() {
        return false;
    }
    ["-warp", "/warp"].iter().any(|flag| {
        flag.len() >= arg.len() && flag[..arg.len()].eq_ignore_ascii_case(arg)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LaunchOptions::from_args(Vec::<String>::new());
        assert!(!options.warp);
        assert_eq!((options.width, options.height), (1280, 720));
    }

    #[test]
    fn test_warp_spellings() {
        for arg in ["-warp", "/warp", "-WARP", "/Warp", "-w", "/wa"] {
            assert!(LaunchOptions::from_args([arg]).warp, "{arg} should enable warp");
        }
    }

    #[test]
    fn test_warp_rejects_other_args() {
        for arg in ["", "-warpx", "warp", "--warp", "-x"] {
            assert!(!LaunchOptions::from_args([arg]).warp, "{arg} should not enable warp");
        }
    }

    #[test]
    fn test_decorate_title() {
        let plain = LaunchOptions::default();
        assert_eq!(plain.decorate_title("Cube"), "Cube");

        let warp = LaunchOptions::from_args(["-warp"]);
        assert_eq!(warp.decorate_title("Cube"), "Cube (WARP)");
    }

    #[test]
    fn test_with_size() {
        let options = LaunchOptions::default().with_size(640, 480);
        assert_eq!((options.width, options.height), (640, 480));
    }
}
