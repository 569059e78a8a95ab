//! Engine module: command line, progress display and path tools

pub mod arg_parser;
pub mod cli;
pub mod progress;
pub mod tools;

// Re-export commonly used functions
pub use arg_parser::{Cli, parse_define, parse_vars};
pub use cli::handle_run;
pub use tools::{default_rewrite, identity_rewrite, path_relative_to, path_to_manifest_string};
