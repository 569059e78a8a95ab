pub mod config;
pub mod fd_limit;
pub mod logger;
pub(crate) mod stencil_toml;
pub mod tempfiles;

pub use config::*;
pub use fd_limit::{FDS_PER_SESSION, clamp_caps_to_fd_limit, max_open_fds, max_sessions_by_fd_limit};
pub use logger::setup_logging;
