//! Pipeline components: bounded pools, pattern expansion, classification, chunked read and
//! write sessions, and the orchestrator that routes events between them.

pub mod classify;
pub mod context;
pub mod events;
pub mod expand;
pub mod orchestrator;
pub mod paths;
pub mod queue;
pub mod reader;
pub mod walk;
pub mod writer;

pub use classify::{ContentClassifier, MimePatterns, classify_path};
pub use context::{RunContext, RunPlan, plan_run};
pub use events::{Event, ExpandEvent, ReadEvent, WriteEvent};
pub use expand::{ExpandRequest, Expansion, PatternExpander, expand_pattern};
pub use orchestrator::Orchestrator;
pub use paths::PathRewriteMap;
pub use queue::{Pool, TaskQueue};
pub use reader::{ChunkedReader, ReadControl, ReadRequest};
pub use walk::{WalkOutcome, run_walk_loop, to_outcome_walkdir, walk_recursive};
pub use writer::{ChunkedWriter, SinkFactory, WriteSignal, WriteTarget};
