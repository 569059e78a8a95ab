//! Load `.stencil.toml` from a directory (CLI only). The library takes everything through `Opts`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::Opts;
use crate::template::Value;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StencilToml {
    #[serde(default)]
    settings: SettingsSection,
    /// Define overrides, applied before `-d` on the command line.
    #[serde(default)]
    defines: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    input: Option<String>,
    output: Option<String>,
    patterns: Option<Vec<String>>,
    recursive: Option<bool>,
    overwrite: Option<bool>,
    simulate: Option<bool>,
    verbose: Option<bool>,
    quiet: Option<bool>,
    env: Option<bool>,
    manifest: Option<String>,
    transform: Option<Vec<String>>,
    chunk_size: Option<usize>,
    high_water_mark: Option<usize>,
    max_expansions: Option<usize>,
    max_classifications: Option<usize>,
    max_reads: Option<usize>,
    max_directories: Option<usize>,
    max_writes: Option<usize>,
}

/// Settings that drive the CLI but are not part of `Opts`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CliFileSettings {
    pub verbose: Option<bool>,
    pub quiet: Option<bool>,
    pub env: Option<bool>,
    pub manifest: Option<PathBuf>,
}

/// Load `.stencil.toml` from `dir` if present. Returns None if the file is missing or invalid.
pub(crate) fn load_stencil_toml(dir: &Path) -> Option<StencilToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_stencil_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

pub(crate) fn parse_stencil_toml(s: &str) -> Result<StencilToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$opts_field = v;
        }
    };
    ($sec:expr, $opts:expr, $sec_field:ident => $group:ident . $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$group.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
/// Relative paths in the file resolve against `dir`.
pub(crate) fn apply_file_to_opts(file: &StencilToml, dir: &Path, opts: &mut Opts) -> CliFileSettings {
    let sec = &file.settings;
    if let Some(ref p) = sec.input {
        opts.input_dir = Some(dir.join(p));
    }
    if let Some(ref p) = sec.output {
        opts.output_dir = Some(dir.join(p));
    }
    if let Some(ref v) = sec.patterns {
        opts.patterns = v.clone();
    }
    if let Some(ref v) = sec.transform {
        opts.transform_types = v.clone();
    }
    apply_file_opt!(sec, opts, recursive => recursive);
    apply_file_opt!(sec, opts, overwrite => overwrite);
    apply_file_opt!(sec, opts, simulate => simulate);
    apply_file_opt!(sec, opts, chunk_size => chunk_size);
    apply_file_opt!(sec, opts, high_water_mark => high_water_mark);
    apply_file_opt!(sec, opts, max_expansions => caps.expansions);
    apply_file_opt!(sec, opts, max_classifications => caps.classifications);
    apply_file_opt!(sec, opts, max_reads => caps.reads);
    apply_file_opt!(sec, opts, max_directories => caps.directories);
    apply_file_opt!(sec, opts, max_writes => caps.writes);

    opts.defines.extend(
        file.defines
            .iter()
            .map(|(k, v)| (k.clone(), toml_to_value(v))),
    );

    CliFileSettings {
        verbose: sec.verbose,
        quiet: sec.quiet,
        env: sec.env,
        manifest: sec.manifest.as_ref().map(|m| dir.join(m)),
    }
}

fn toml_to_value(v: &toml::Value) -> Value {
    match v {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Number(*i as f64),
        toml::Value::Float(f) => Value::Number(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::Str(d.to_string()),
        toml::Value::Array(items) => Value::List(items.iter().map(toml_to_value).collect()),
        toml::Value::Table(t) => Value::Map(
            t.iter()
                .map(|(k, v)| (k.clone(), toml_to_value(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_and_defines_apply() {
        let file = parse_stencil_toml(
            r#"
            [settings]
            input = "src"
            output = "dist"
            recursive = true
            max_reads = 2
            verbose = true
            manifest = "dist/site.manifest"

            [defines]
            VERSION = "1.2"
            DEBUG = false
            PORTS = [80, 443]
            "#,
        )
        .unwrap();
        let mut opts = Opts::default();
        let cli = apply_file_to_opts(&file, Path::new("/proj"), &mut opts);

        assert_eq!(opts.input_dir, Some(PathBuf::from("/proj/src")));
        assert_eq!(opts.output_dir, Some(PathBuf::from("/proj/dist")));
        assert!(opts.recursive);
        assert_eq!(opts.caps.reads, 2);
        assert_eq!(cli.verbose, Some(true));
        assert_eq!(cli.manifest, Some(PathBuf::from("/proj/dist/site.manifest")));
        assert!(opts.defines.contains(&("DEBUG".to_string(), Value::Bool(false))));
        assert!(opts.defines.contains(&(
            "PORTS".to_string(),
            Value::List(vec![Value::Number(80.0), Value::Number(443.0)])
        )));
    }

    #[test]
    fn absent_fields_keep_defaults() {
        let file = parse_stencil_toml("").unwrap();
        let mut opts = Opts::default();
        apply_file_to_opts(&file, Path::new("."), &mut opts);
        assert_eq!(opts.caps, crate::PoolCaps::default());
        assert!(opts.output_dir.is_none());
    }
}
