//! Application configuration constants.
//! Pool caps, chunk sizes, and package-derived names in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    manifest_extension: &'static str,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                manifest_extension: "manifest",
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Name of the optional per-directory config file (e.g. `.stencil.toml`).
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    pub fn manifest_extension(&self) -> &str {
        self.manifest_extension
    }

    /// Default manifest file for an output directory: `<out>/<basename(out)>.manifest`.
    pub fn default_manifest_path(&self, output_dir: &std::path::Path) -> std::path::PathBuf {
        let stem = output_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.pkg_name.to_string());
        output_dir.join(format!("{stem}.{}", self.manifest_extension))
    }
}

// ---- Resource pools ----

/// Concurrency caps for the five bounded resource pools.
/// Each pool has its own FIFO wait queue; see [`crate::pipeline::Pool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolCaps {
    /// Simultaneous pattern expansions.
    pub expansions: usize,
    /// Simultaneous content-type classifications.
    pub classifications: usize,
    /// Simultaneously open read sessions.
    pub reads: usize,
    /// Simultaneous directory materializations.
    pub directories: usize,
    /// Simultaneously open write sessions.
    pub writes: usize,
}

impl Default for PoolCaps {
    fn default() -> Self {
        Self {
            expansions: Self::EXPANSIONS,
            classifications: Self::CLASSIFICATIONS,
            reads: Self::READS,
            directories: Self::DIRECTORIES,
            writes: Self::WRITES,
        }
    }
}

impl PoolCaps {
    pub const EXPANSIONS: usize = 8;
    pub const CLASSIFICATIONS: usize = 4;
    pub const READS: usize = 4;
    pub const DIRECTORIES: usize = 8;
    pub const WRITES: usize = 4;

    /// Every cap forced to at least 1 so no pool can stall with queued work.
    pub fn normalized(self) -> Self {
        Self {
            expansions: self.expansions.max(1),
            classifications: self.classifications.max(1),
            reads: self.reads.max(1),
            directories: self.directories.max(1),
            writes: self.writes.max(1),
        }
    }
}

// ---- Streaming ----

/// Byte stream tuning for read and write sessions.
pub struct StreamConsts;

impl StreamConsts {
    /// Size of each chunk emitted by a read session (bytes). 64 KiB.
    pub const READ_CHUNK_SIZE: usize = 64 * 1024;
    /// Pending bytes at which a write session reports backpressure. 256 KiB.
    pub const WRITE_HIGH_WATER_MARK: usize = 256 * 1024;
    /// How long the orchestrator waits for an event before re-checking the cancel flag.
    pub const CANCEL_POLL_MS: u64 = 200;
}

// ---- Classification ----

/// Content type used when classification fails or finds nothing better.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes sniffed from the head of a file when the extension gives no answer.
pub const SNIFF_LEN: usize = 512;

/// Media ranges eligible for transformation; everything else is copied verbatim.
pub const DEFAULT_TRANSFORM_PATTERNS: &[&str] =
    &["text/*", "*/json", "*/javascript", "*/word", "*/xml"];

// ---- Discovery ----

/// Pattern used for recursive expansion of matched directories.
pub const RECURSIVE_PATTERN: &str = "**/*";

/// Pattern used when only an input directory is given (non-recursive).
pub const SINGLE_LEVEL_PATTERN: &str = "*";
