use clap::Parser;
use std::path::{Path, PathBuf};

use crate::template::Value;
use crate::utils::config::PackagePaths;

/// Streaming template preprocessor: expand tags in every matched file and mirror the results
/// into an output tree.
#[derive(Clone, Debug, Parser)]
#[command(name = "stencil")]
#[command(
    about = "Transform files matched by PATTERNS; without --output everything goes to stdout."
)]
pub struct Cli {
    /// Glob patterns relative to the input directory. Default with --input: `*` (`**/*` with -R).
    #[arg(value_name = "PATTERNS")]
    pub patterns: Vec<String>,

    /// Input directory patterns are relative to. Default: working directory.
    #[arg(long, short = 'i', value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output directory. Outputs mirror their input paths under it.
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Working directory for relative paths and `.stencil.toml`.
    #[arg(long, short = 'C', value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Expand matched directories recursively.
    #[arg(long, short = 'R', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub recursive: Option<bool>,

    /// Allow the output directory to be the input directory.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub overwrite: Option<bool>,

    /// Run the whole pipeline without creating or writing anything.
    #[arg(long, short = 's', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub simulate: Option<bool>,

    /// Write the list of written files. Default FILE: `<out>/<basename(out)>.manifest`; stdout without --output.
    #[arg(long, short = 'm', value_name = "FILE", num_args = 0..=1)]
    pub manifest: Option<Option<PathBuf>>,

    /// Define: NAME=VALUE, chained A=B=VALUE, or bare NAME (true). Later entries win.
    #[arg(long = "define", short = 'd', value_name = "NAME[=VALUE]")]
    pub defines: Vec<String>,

    /// Run-time variable: NAME=VALUE. Never shadows a define.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Use the process environment (and `.env`) as the lowest-priority defines.
    #[arg(long, short = 'e', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub env: Option<bool>,

    /// Media ranges to transform (e.g. `text/*`, `*/json`). Others are copied verbatim.
    #[arg(long = "transform", short = 't', value_name = "TYPE", num_args = 1..)]
    pub transform: Vec<String>,

    /// Max simultaneous read sessions.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub max_reads: Option<usize>,

    /// Max simultaneous write sessions.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub max_writes: Option<usize>,

    /// Max simultaneous pattern expansions.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub max_expansions: Option<usize>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Only print errors.
    #[arg(long, short = 'q', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub quiet: Option<bool>,
}

impl Cli {
    /// Manifest destination when requested: `Some(None)` means stdout.
    pub fn manifest_path(&self, output_dir: Option<&Path>) -> Option<Option<PathBuf>> {
        let requested = self.manifest.as_ref()?;
        Some(match (requested, output_dir) {
            (Some(p), _) => Some(p.clone()),
            (None, Some(out)) => Some(PackagePaths::get().default_manifest_path(out)),
            (None, None) => None,
        })
    }
}

/// Parse one `-d` argument. `A=B=v` assigns `v` to A and B; bare `NAME` is `true`; values
/// `true`/`false` are booleans.
pub fn parse_define(raw: &str) -> Vec<(String, Value)> {
    let mut parts: Vec<&str> = raw.split('=').collect();
    let value = match parts.len() {
        1 => Value::Bool(true),
        _ => parts.pop().map(Value::from_cli).unwrap_or(Value::Null),
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| (n.to_string(), value.clone()))
        .collect()
}

/// Parse `NAME=VALUE` pairs; entries without `=` are skipped with a warning.
pub fn parse_vars(raw: &[String]) -> Vec<(String, Value)> {
    raw.iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Some((name.trim().to_string(), Value::from_cli(value)))
            }
            _ => {
                log::warn!("Ignoring variable `{entry}` (expected NAME=VALUE)");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_forms() {
        assert_eq!(parse_define("DEBUG"), vec![("DEBUG".into(), Value::Bool(true))]);
        assert_eq!(
            parse_define("A=B=x"),
            vec![("A".into(), Value::from("x")), ("B".into(), Value::from("x"))]
        );
        assert_eq!(parse_define("ON=false"), vec![("ON".into(), Value::Bool(false))]);
        assert_eq!(parse_define("EMPTY="), vec![("EMPTY".into(), Value::from(""))]);
    }

    #[test]
    fn manifest_flag_shapes() {
        let cli = Cli::parse_from(["stencil", "-o", "dist", "-m", "*.txt"]);
        assert_eq!(cli.manifest, Some(Some(PathBuf::from("*.txt"))));

        let cli = Cli::parse_from(["stencil", "*.txt", "-o", "dist", "--manifest"]);
        assert_eq!(
            cli.manifest_path(Some(Path::new("dist"))),
            Some(Some(PathBuf::from("dist/dist.manifest")))
        );
        assert_eq!(cli.manifest_path(None), Some(None));

        let cli = Cli::parse_from(["stencil", "*.txt"]);
        assert_eq!(cli.manifest_path(None), None);
    }

    #[test]
    fn repeated_defines_keep_order() {
        let cli = Cli::parse_from(["stencil", "-d", "A=1", "-d", "A=2", "x"]);
        assert_eq!(cli.defines, vec!["A=1", "A=2"]);
        assert_eq!(cli.patterns, vec!["x"]);
    }
}
