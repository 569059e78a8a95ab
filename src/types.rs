//! Public and internal types for the stencil API and pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::template::{ValidationCode, Value};
use crate::utils::config::{DEFAULT_TRANSFORM_PATTERNS, PoolCaps, StreamConsts};

/// A file found by pattern expansion, tagged with the pattern and base directory that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    /// Absolute path of the file.
    pub path: PathBuf,
    pub pattern: String,
    pub base: PathBuf,
}

/// Content type decided for one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub path: ResolvedPath,
    pub content_type: String,
}

/// Configuration errors: raised before any I/O starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no patterns to expand (give patterns or an input directory)")]
    EmptyPatterns,
    #[error("output directory {} is the input directory; pass --overwrite to allow this", .0.display())]
    UnsafeOutput(PathBuf),
}

/// Maps an input path to its output path.
pub type RewriteFn = Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>;

/// Decides from a content type whether a file is transformed (true) or copied verbatim.
pub type EligibleFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Typed notices for an observer of a run (see [`crate::pipeline::Orchestrator::set_observer`]).
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    ReadStart {
        path: PathBuf,
        content_type: String,
    },
    ReadEnd {
        path: PathBuf,
    },
    WriteStart {
        path: PathBuf,
        output: PathBuf,
    },
    /// One transformed fragment handed to the writer.
    Write {
        path: PathBuf,
        bytes: usize,
        validation: ValidationCode,
    },
    WriteEnd {
        path: PathBuf,
        output: PathBuf,
    },
    Error {
        path: Option<PathBuf>,
        message: String,
    },
}

/// Final status of one run.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// Files touched (every file that got per-file template state, passthrough and empty included).
    pub files: usize,
    pub elapsed: Duration,
    /// Output paths actually written, sorted, relative to the manifest root.
    pub written: Vec<PathBuf>,
    /// Output directory, or input root when writing to the sink.
    pub manifest_root: PathBuf,
    pub errors: usize,
    pub last_error: Option<String>,
    pub cancelled: bool,
    /// Pool caps in force for the run (after fd-limit and sink clamping).
    pub caps: PoolCaps,
    /// Most tasks each pool held in flight at once.
    pub peaks: PoolCaps,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.errors == 0
    }

    /// Manifest text: one written path per line, `/`-separated.
    pub fn manifest(&self) -> String {
        self.written
            .iter()
            .map(|p| crate::engine::tools::path_to_manifest_string(p))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Options for one run. Hooks (rewrite rule, eligibility predicate, sink) live on the
/// orchestrator so this stays plain data.
#[derive(Clone)]
pub struct Opts {
    /// Glob-style patterns, relative to the input directory (or `cwd` without one).
    pub patterns: Vec<String>,
    /// Working directory that relative paths resolve against.
    pub cwd: PathBuf,
    /// Input directory. With no patterns it implies `*` (or `**/*` with `recursive`).
    pub input_dir: Option<PathBuf>,
    /// Output directory. `None` writes everything to one ordered sink (stdout by default).
    pub output_dir: Option<PathBuf>,
    /// Expand matched directories recursively.
    pub recursive: bool,
    /// Allow the output directory to equal the input directory.
    pub overwrite: bool,
    /// Run the whole pipeline without touching the filesystem.
    pub simulate: bool,
    /// Lowest-priority defines (e.g. process environment).
    pub env_defines: Vec<(String, Value)>,
    /// Overrides merged over the synthesized defines; later entries win.
    pub defines: Vec<(String, Value)>,
    /// Run-time variables (never shadow a define).
    pub vars: Vec<(String, Value)>,
    /// Media ranges eligible for transformation (`text/*`, `*/json`, ...).
    pub transform_types: Vec<String>,
    pub caps: PoolCaps,
    /// Bytes per read chunk.
    pub chunk_size: usize,
    /// Pending bytes at which a write session asks its reader to pause.
    pub high_water_mark: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            cwd: PathBuf::from("."),
            input_dir: None,
            output_dir: None,
            recursive: false,
            overwrite: false,
            simulate: false,
            env_defines: Vec::new(),
            defines: Vec::new(),
            vars: Vec::new(),
            transform_types: DEFAULT_TRANSFORM_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            caps: PoolCaps::default(),
            chunk_size: StreamConsts::READ_CHUNK_SIZE,
            high_water_mark: StreamConsts::WRITE_HIGH_WATER_MARK,
        }
    }
}

impl fmt::Debug for Opts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opts")
            .field("patterns", &self.patterns)
            .field("cwd", &self.cwd)
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("recursive", &self.recursive)
            .field("overwrite", &self.overwrite)
            .field("simulate", &self.simulate)
            .field("defines", &self.defines.len())
            .field("env_defines", &self.env_defines.len())
            .field("vars", &self.vars.len())
            .field("transform_types", &self.transform_types)
            .field("caps", &self.caps)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
