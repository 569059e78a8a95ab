//! Stencil: streaming template preprocessor.
//!
//! Patterns are expanded into files, each file is classified, read in chunks, run through a
//! chunk-boundary-safe template engine, and written to a mirrored output tree (or one ordered
//! sink). Every stage runs under its own bounded pool.

pub mod engine;
pub mod pipeline;
pub mod template;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use pipeline::{Orchestrator, SinkFactory};
pub use template::{TemplateError, ValidationCode, Value};
pub use utils::config::PoolCaps;

use log::debug;

/// Result alias used by public stencil API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: run one transformation with default hooks (stdout sink, default rewrite
/// rule, eligibility from `opts.transform_types`).
///
/// Configuration errors ([`ConfigError`]) are returned before any I/O. Per-file failures do not
/// abort the run; they are counted in the returned [`RunReport`].
pub fn run(opts: &Opts) -> Result<RunReport> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
    Orchestrator::new().run(opts)
}
