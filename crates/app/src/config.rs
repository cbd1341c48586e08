//! Startup configuration from command-line arguments and environment.

use tracing::warn;

use frameloop_core::{Error, Result};
use frameloop_renderer::{DEFAULT_BUFFER_COUNT, RendererSettings};
use frameloop_rhi::{ClearColor, ColorFormat};

/// Environment variable selecting the swap chain color format.
pub const COLOR_FORMAT_VAR: &str = "FRAMELOOP_COLOR_FORMAT";

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

/// Host configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub width: u32,
    pub height: u32,
    pub use_warp: bool,
    pub validation: bool,
    pub buffer_count: u32,
    pub color_format: ColorFormat,
    pub clear_color: ClearColor,
    pub vsync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            use_warp: false,
            validation: cfg!(debug_assertions),
            buffer_count: DEFAULT_BUFFER_COUNT,
            color_format: ColorFormat::default(),
            clear_color: ClearColor::default(),
            vsync: true,
        }
    }
}

impl Config {
    /// Reads the process arguments and environment.
    pub fn from_env() -> Self {
        Self::from_args(std::env::args().skip(1), |name| std::env::var(name).ok())
    }

    /// Builds a configuration from `args` (without the program name) and an
    /// environment lookup.
    ///
    /// Recognized flags are `-w`/`--width <int>`, `-h`/`--height <int>` and
    /// `-warp`/`--warp`. Unknown arguments are ignored, and invalid or
    /// missing values keep the default with a warning. A value that starts
    /// with `-` is read as the next flag, not as the dimension.
    pub fn from_args<I, E>(args: I, env: E) -> Self
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter().peekable();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-w" | "--width" => {
                    let value = args.next_if(|value| is_value(value));
                    if let Some(width) = dimension_arg(&arg, value) {
                        config.width = width;
                    }
                }
                "-h" | "--height" => {
                    let value = args.next_if(|value| is_value(value));
                    if let Some(height) = dimension_arg(&arg, value) {
                        config.height = height;
                    }
                }
                "-warp" | "--warp" => config.use_warp = true,
                _ => {}
            }
        }

        if let Some(value) = env(COLOR_FORMAT_VAR) {
            match value.parse::<ColorFormat>() {
                Ok(format) => config.color_format = format,
                Err(e) => warn!("Ignoring {}: {}", COLOR_FORMAT_VAR, e),
            }
        }

        config
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            use_warp: self.use_warp,
            validation: self.validation,
            buffer_count: self.buffer_count,
            color_format: self.color_format,
            clear_color: self.clear_color,
            vsync: self.vsync,
        }
    }
}

fn is_value(arg: &str) -> bool {
    !arg.starts_with('-')
}

fn dimension_arg(flag: &str, value: Option<String>) -> Option<u32> {
    match parse_dimension(flag, value.as_deref()) {
        Ok(dimension) => Some(dimension),
        Err(e) => {
            warn!("{}, using default", e);
            None
        }
    }
}

/// Parses a positive window dimension.
fn parse_dimension(flag: &str, value: Option<&str>) -> Result<u32> {
    let value = value.ok_or_else(|| Error::Config(format!("{} expects a value", flag)))?;
    match value.trim().parse::<u32>() {
        Ok(dimension) if dimension > 0 => Ok(dimension),
        _ => Err(Error::Config(format!(
            "invalid value '{}' for {}",
            value, flag
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::from_args(args.iter().map(|s| s.to_string()), |_| None)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert!(!config.use_warp);
        assert!(config.vsync);
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.color_format, ColorFormat::Srgb);
    }

    #[test]
    fn test_size_and_warp_flags() {
        let config = parse(&["--width", "1920", "-h", "1080", "-warp"]);
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert!(config.use_warp);

        assert!(parse(&["--warp"]).use_warp);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = parse(&["-w", "wide", "--height", "0"]);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);

        assert_eq!(parse(&["-w"]).width, 1280);
    }

    #[test]
    fn test_missing_value_leaves_next_flag() {
        let config = parse(&["-w", "--warp"]);
        assert_eq!(config.width, 1280);
        assert!(config.use_warp);

        let config = parse(&["--height", "-w", "640"]);
        assert_eq!(config.height, 720);
        assert_eq!(config.width, 640);
    }

    #[test]
    fn test_unknown_arguments_ignored() {
        let config = parse(&["--fullscreen", "-x", "-w", "800"]);
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 720);
    }

    #[test]
    fn test_color_format_from_environment() {
        let config = Config::from_args(Vec::new(), |name| {
            (name == COLOR_FORMAT_VAR).then(|| "unorm".to_string())
        });
        assert_eq!(config.color_format, ColorFormat::Unorm);

        let config = Config::from_args(Vec::new(), |_| Some("bgr10".to_string()));
        assert_eq!(config.color_format, ColorFormat::Srgb);
    }

    #[test]
    fn test_parse_dimension_errors() {
        assert!(matches!(
            parse_dimension("-w", None),
            Err(Error::Config(_))
        ));
        assert_eq!(parse_dimension("-w", Some(" 640 ")).unwrap(), 640);
    }

    #[test]
    fn test_renderer_settings_carry_config() {
        let config = parse(&["--warp"]);
        let settings = config.renderer_settings();
        assert!(settings.use_warp);
        assert_eq!(settings.buffer_count, config.buffer_count);
        assert_eq!(settings.clear_color, config.clear_color);
    }
}
