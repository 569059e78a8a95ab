//! Pattern expansion under the expansion pool.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use glob::{MatchOptions, Pattern};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::ResolvedPath;
use crate::engine::tools::should_include;
use crate::utils::config::RECURSIVE_PATTERN;

use super::events::{Event, ExpandEvent};
use super::queue::Pool;
use super::walk::walk_recursive;

/// One pattern to expand relative to `base`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpandRequest {
    pub pattern: String,
    pub base: PathBuf,
}

/// Matches for one pattern.
#[derive(Debug, Default)]
pub struct Expansion {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    /// Entries that could not be read: (path if known, message).
    pub skipped: Vec<(Option<PathBuf>, String)>,
}

/// Expand one pattern synchronously. `**/*` walks `base`; anything else goes through `glob`
/// with leading dots required to match literally.
pub fn expand_pattern(pattern: &str, base: &Path, exclude: &[PathBuf]) -> Result<Expansion> {
    if pattern == RECURSIVE_PATTERN {
        if !base.is_dir() {
            anyhow::bail!("{} is not a directory", base.display());
        }
        return Ok(walk_recursive(base, exclude));
    }

    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        let escaped_base = Pattern::escape(&base.to_string_lossy());
        format!("{}/{}", escaped_base.trim_end_matches('/'), pattern)
    };
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let paths = glob::glob_with(&full, options).with_context(|| format!("pattern `{pattern}`"))?;

    let mut expansion = Expansion::default();
    for entry in paths {
        match entry {
            Ok(path) => {
                if path.is_dir() {
                    if !exclude.iter().any(|d| path == *d) {
                        expansion.dirs.push(path);
                    }
                } else if should_include(&path, exclude) {
                    expansion.files.push(path);
                }
            }
            Err(err) => expansion
                .skipped
                .push((Some(err.path().to_path_buf()), err.error().to_string())),
        }
    }
    Ok(expansion)
}

/// Turns patterns into resolved file paths, at most `cap` expansions at a time.
pub struct PatternExpander {
    pool: Pool<ExpandRequest>,
    recursive: bool,
    exclude: Vec<PathBuf>,
    seen_patterns: HashSet<(String, PathBuf)>,
    forwarded: HashSet<PathBuf>,
    events: Sender<Event>,
}

impl PatternExpander {
    pub fn new(cap: usize, recursive: bool, exclude: Vec<PathBuf>, events: Sender<Event>) -> Self {
        Self {
            pool: Pool::new("expand", cap),
            recursive,
            exclude,
            seen_patterns: HashSet::new(),
            forwarded: HashSet::new(),
            events,
        }
    }

    /// Queue every distinct pattern for expansion under `base`.
    pub fn expand(&mut self, patterns: &[String], base: &Path) {
        for pattern in patterns {
            self.submit(ExpandRequest {
                pattern: pattern.clone(),
                base: base.to_path_buf(),
            });
        }
    }

    fn submit(&mut self, req: ExpandRequest) {
        if !self
            .seen_patterns
            .insert((req.pattern.clone(), req.base.clone()))
        {
            debug!("Duplicate pattern {} in {}", req.pattern, req.base.display());
            return;
        }
        if let Some(req) = self.pool.admit(req) {
            self.spawn(req);
        }
    }

    fn spawn(&self, req: ExpandRequest) {
        let events = self.events.clone();
        let exclude = self.exclude.clone();
        rayon::spawn(move || {
            let result = expand_pattern(&req.pattern, &req.base, &exclude);
            let _ = events.send(Event::Expand(ExpandEvent {
                request: req,
                result,
            }));
        });
    }

    /// Handle a finished expansion: free its slot, queue nested expansions for directories,
    /// and return files not forwarded before. `accept_new` is false once the run is cancelled.
    pub fn on_expanded(
        &mut self,
        event: ExpandEvent,
        accept_new: bool,
    ) -> Result<Vec<ResolvedPath>> {
        if let Some(next) = self.pool.release() {
            self.spawn(next);
        }
        let ExpandEvent { request, result } = event;
        let expansion = result?;

        for (path, msg) in &expansion.skipped {
            match path {
                Some(p) => warn!("Skipping {}: {}", p.display(), msg),
                None => warn!("Skipping entry under {}: {}", request.base.display(), msg),
            }
        }
        if !accept_new {
            return Ok(Vec::new());
        }

        if self.recursive && request.pattern != RECURSIVE_PATTERN {
            for dir in expansion.dirs {
                self.submit(ExpandRequest {
                    pattern: RECURSIVE_PATTERN.to_string(),
                    base: dir,
                });
            }
        }

        let mut files = Vec::with_capacity(expansion.files.len());
        for path in expansion.files {
            if self.forwarded.insert(path.clone()) {
                files.push(ResolvedPath {
                    path,
                    pattern: request.pattern.clone(),
                    base: request.base.clone(),
                });
            }
        }
        Ok(files)
    }

    /// Drop queued expansions (running ones finish and report).
    pub fn clear(&mut self) -> usize {
        self.pool.clear()
    }

    pub fn total(&self) -> usize {
        self.pool.total()
    }

    pub fn peak(&self) -> usize {
        self.pool.peak()
    }
}
