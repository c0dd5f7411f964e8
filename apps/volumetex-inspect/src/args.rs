//! Command line options.

use anyhow::{bail, Context, Result};
use volumetex_texture::{GradientStrategy, TextureBuildConfig};

use crate::shapes::Shape;

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectArgs {
    pub dims: [usize; 3],
    pub shape: Shape,
    pub output: String,
    pub config: TextureBuildConfig,
    pub help: bool,
}

impl Default for InspectArgs {
    fn default() -> Self {
        Self {
            dims: [64, 64, 64],
            shape: Shape::Sphere,
            output: "volume".to_string(),
            config: TextureBuildConfig::from_env(),
            help: false,
        }
    }
}

impl InspectArgs {
    pub fn from_args() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args, Self::default())
    }

    /// Parse `args` (including the program name) on top of `defaults`.
    pub fn parse_args(args: &[String], defaults: Self) -> Result<Self> {
        let mut parsed = defaults;

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(String::as_str)
                    .with_context(|| format!("{flag} expects a value"))
            };
            match flag {
                "-d" | "--dims" => parsed.dims = parse_dims(value()?)?,
                "-s" | "--shape" => parsed.shape = value()?.parse().map_err(anyhow::Error::msg)?,
                "-o" | "--output" => parsed.output = value()?.to_string(),
                "-g" | "--gradient" => {
                    let strategy: GradientStrategy =
                        value()?.parse().map_err(anyhow::Error::msg)?;
                    parsed.config.gradient = strategy;
                }
                "--full-float" => parsed.config.force_full_float = true,
                "--budget-mb" => {
                    let mb: usize = value()?.parse().context("--budget-mb expects megabytes")?;
                    parsed.config.scratch_budget_bytes = Some(mb.saturating_mul(1024 * 1024));
                }
                "--max-dim" => {
                    parsed.config.max_dimension =
                        value()?.parse().context("--max-dim expects a number")?;
                }
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown option '{other}' (see --help)"),
            }
            i += 1;
        }

        Ok(parsed)
    }
}

/// Parse `N` or `XxYxZ`.
fn parse_dims(value: &str) -> Result<[usize; 3]> {
    let parts: Vec<usize> = value
        .split('x')
        .map(|part| part.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid dimensions '{value}'"))?;

    match parts.as_slice() {
        [n] if *n > 0 => Ok([*n; 3]),
        [x, y, z] if *x > 0 && *y > 0 && *z > 0 => Ok([*x, *y, *z]),
        _ => bail!("dimensions must be N or XxYxZ with positive values, got '{value}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<InspectArgs> {
        let args: Vec<String> = std::iter::once("volumetex-inspect")
            .chain(args.iter().copied())
            .map(String::from)
            .collect();
        let defaults = InspectArgs {
            config: TextureBuildConfig::default(),
            ..InspectArgs::default()
        };
        InspectArgs::parse_args(&args, defaults)
    }

    #[test]
    fn defaults_without_flags() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.dims, [64, 64, 64]);
        assert_eq!(args.shape, Shape::Sphere);
        assert!(!args.help);
    }

    #[test]
    fn all_flags() {
        let args = parse(&[
            "--dims",
            "16x8x4",
            "--shape",
            "torus",
            "-o",
            "out/preview",
            "--gradient",
            "sobel",
            "--full-float",
            "--budget-mb",
            "2",
            "--max-dim",
            "128",
        ])
        .unwrap();
        assert_eq!(args.dims, [16, 8, 4]);
        assert_eq!(args.shape, Shape::Torus);
        assert_eq!(args.output, "out/preview");
        assert_eq!(args.config.gradient, GradientStrategy::Sobel);
        assert!(args.config.force_full_float);
        assert_eq!(args.config.scratch_budget_bytes, Some(2 * 1024 * 1024));
        assert_eq!(args.config.max_dimension, 128);
    }

    #[test]
    fn cubic_dims_shorthand() {
        assert_eq!(parse(&["-d", "32"]).unwrap().dims, [32, 32, 32]);
    }

    #[test]
    fn huge_budget_saturates() {
        let huge = usize::MAX.to_string();
        let parsed = parse(&["--budget-mb", huge.as_str()]).unwrap();
        assert_eq!(parsed.config.scratch_budget_bytes, Some(usize::MAX));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--dims", "0"]).is_err());
        assert!(parse(&["--dims", "4x4"]).is_err());
        assert!(parse(&["--shape"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }
}
