//! Command line configuration for the viewer.

use anyhow::{bail, Context};
use std::path::PathBuf;

/// Viewer settings (from CLI or defaults).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames_in_flight: usize,
    /// Render a shadow pass and copy its depth before the main pass.
    pub shadows: bool,
    pub vsync: bool,
    pub validation: bool,
    /// `-h/--help` was given; nothing else should run.
    pub help: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("apps/vkstage-viewer/shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("apps/vkstage-viewer/shaders/triangle.frag.spv"),
            width: 1280,
            height: 720,
            frames_in_flight: 2,
            shadows: false,
            vsync: false,
            validation: cfg!(debug_assertions),
            help: false,
        }
    }
}

impl ViewerConfig {
    /// Parse viewer options from the process arguments.
    pub fn from_args() -> anyhow::Result<Self> {
        Self::parse_args(std::env::args().skip(1))
    }

    /// Parse viewer options, not including the program name.
    pub fn parse_args<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("{arg} expects a value"))
            };
            match arg.as_str() {
                "--vertex" => config.vertex_shader = value()?.into(),
                "--fragment" => config.fragment_shader = value()?.into(),
                "--width" => config.width = parse_number(&arg, &value()?)?,
                "--height" => config.height = parse_number(&arg, &value()?)?,
                "--frames-in-flight" => {
                    config.frames_in_flight = parse_number(&arg, &value()?)?;
                }
                "--shadows" => config.shadows = true,
                "--vsync" => config.vsync = true,
                "--validation" => config.validation = true,
                "--no-validation" => config.validation = false,
                "-h" | "--help" => config.help = true,
                other => bail!("unknown option {other}"),
            }
        }

        if config.width == 0 || config.height == 0 {
            bail!("window size must be non-zero, got {}x{}", config.width, config.height);
        }
        if config.frames_in_flight == 0 {
            bail!("--frames-in-flight must be at least 1");
        }
        Ok(config)
    }
}

fn parse_number<T>(flag: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value {value:?} for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ViewerConfig> {
        ViewerConfig::parse_args(args.iter().map(ToString::to_string))
    }

    #[test]
    fn no_arguments_gives_defaults() {
        assert_eq!(parse(&[]).unwrap(), ViewerConfig::default());
    }

    #[test]
    fn all_options() {
        let config = parse(&[
            "--vertex",
            "a.vert.spv",
            "--fragment",
            "a.frag.spv",
            "--width",
            "640",
            "--height",
            "480",
            "--frames-in-flight",
            "3",
            "--shadows",
            "--vsync",
            "--validation",
        ])
        .unwrap();

        assert_eq!(config.vertex_shader, PathBuf::from("a.vert.spv"));
        assert_eq!(config.fragment_shader, PathBuf::from("a.frag.spv"));
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.shadows && config.vsync && config.validation);
        assert!(!config.help);
    }

    #[test]
    fn help_flag() {
        assert!(parse(&["-h"]).unwrap().help);
        assert!(parse(&["--vsync", "--help"]).unwrap().help);
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(parse(&["--width"]).is_err());
        assert!(parse(&["--width", "wide"]).is_err());
        assert!(parse(&["--height", "0"]).is_err());
        assert!(parse(&["--frames-in-flight", "0"]).is_err());
        assert!(parse(&["--fullscreen"]).is_err());
    }

    #[test]
    fn validation_can_be_turned_off() {
        assert!(!parse(&["--no-validation"]).unwrap().validation);
    }
}
