//! Run planning and per-run context: validated paths and caps, plus the components and
//! per-file state one run owns.

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::engine::tools::resolve_dir;
use crate::template::{TemplateState, Vars};
use crate::utils::config::{PoolCaps, RECURSIVE_PATTERN, SINGLE_LEVEL_PATTERN};
use crate::utils::fd_limit::clamp_caps_to_fd_limit;
use crate::{ConfigError, Opts};

use super::classify::ContentClassifier;
use super::events::Event;
use super::expand::PatternExpander;
use super::reader::ChunkedReader;
use super::writer::ChunkedWriter;

/// Validated settings for one run.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub patterns: Vec<String>,
    /// Base directory patterns expand against.
    pub input_root: PathBuf,
    pub output_root: Option<PathBuf>,
    /// Subtrees never forwarded (output directory nested in the input tree).
    pub exclude: Vec<PathBuf>,
    pub caps: PoolCaps,
    /// Root that manifest paths are relative to.
    pub manifest_root: PathBuf,
}

/// Check `opts` and resolve every path. Fails before any I/O on an empty pattern set or an
/// output directory that is the input directory without `overwrite`.
pub fn plan_run(opts: &Opts) -> Result<RunPlan, ConfigError> {
    let cwd = match std::env::current_dir() {
        Ok(dir) => resolve_dir(&dir, &opts.cwd),
        Err(_) => opts.cwd.clone(),
    };
    let input_root = opts
        .input_dir
        .as_deref()
        .map(|d| resolve_dir(&cwd, d))
        .unwrap_or_else(|| cwd.clone());

    let mut seen = HashSet::new();
    let mut patterns: Vec<String> = opts
        .patterns
        .iter()
        .filter(|p| !p.trim().is_empty() && seen.insert(p.as_str()))
        .cloned()
        .collect();
    if patterns.is_empty() {
        if opts.input_dir.is_none() {
            return Err(ConfigError::EmptyPatterns);
        }
        let default = match opts.recursive {
            true => RECURSIVE_PATTERN,
            false => SINGLE_LEVEL_PATTERN,
        };
        patterns.push(default.to_string());
    }

    let output_root = opts.output_dir.as_deref().map(|d| resolve_dir(&cwd, d));
    if let Some(out) = &output_root
        && *out == input_root
        && !opts.overwrite
    {
        return Err(ConfigError::UnsafeOutput(out.clone()));
    }

    let exclude = match &output_root {
        Some(out) if out.starts_with(&input_root) && *out != input_root => vec![out.clone()],
        _ => Vec::new(),
    };

    let mut caps = clamp_caps_to_fd_limit(opts.caps);
    if output_root.is_none() && caps.reads != 1 {
        debug!("Writing to one sink: read sessions limited to 1");
        caps.reads = 1;
    }

    Ok(RunPlan {
        patterns,
        manifest_root: output_root.clone().unwrap_or_else(|| input_root.clone()),
        input_root,
        output_root,
        exclude,
        caps,
    })
}

/// Everything one run owns. Dropped at the end of the run, which resets the orchestrator.
pub struct RunContext {
    pub plan: RunPlan,
    pub expander: PatternExpander,
    pub classifier: ContentClassifier,
    pub reader: ChunkedReader,
    pub writer: ChunkedWriter,
    /// Per-input template state, created on first data and dropped when the output closes.
    pub states: HashMap<PathBuf, TemplateState>,
    /// Inputs whose pipeline was abandoned after an error.
    pub failed: HashSet<PathBuf>,
    pub vars: Vars,
    pub started: Instant,
    pub run_started: DateTime<Local>,
    pub files: usize,
    pub errors: usize,
    pub last_error: Option<String>,
    pub cancelled: bool,
}

impl RunContext {
    pub fn new(
        plan: RunPlan,
        opts: &Opts,
        writer: ChunkedWriter,
        events: &Sender<Event>,
    ) -> Self {
        let expander = PatternExpander::new(
            plan.caps.expansions,
            opts.recursive,
            plan.exclude.clone(),
            events.clone(),
        );
        let classifier = ContentClassifier::new(plan.caps.classifications, events.clone());
        let reader = ChunkedReader::new(plan.caps.reads, opts.chunk_size, events.clone());
        Self {
            plan,
            expander,
            classifier,
            reader,
            writer,
            states: HashMap::new(),
            failed: HashSet::new(),
            vars: opts.vars.iter().cloned().collect(),
            started: Instant::now(),
            run_started: Local::now(),
            files: 0,
            errors: 0,
            last_error: None,
            cancelled: false,
        }
    }

    /// No stage has active or queued work.
    pub fn is_idle(&self) -> bool {
        self.expander.total()
            + self.classifier.total()
            + self.reader.total()
            + self.writer.total()
            == 0
    }

    /// Written outputs relative to the manifest root, sorted.
    pub fn written_relative(&self) -> Vec<PathBuf> {
        let root: &Path = &self.plan.manifest_root;
        self.writer
            .written()
            .map(|p| p.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| p.clone()))
            .collect()
    }
}
