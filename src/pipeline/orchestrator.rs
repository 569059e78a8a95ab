//! Main orchestrator: routes worker events between the expand, classify, read, transform and
//! write stages of one run.
//!
//! Patterns → expansion pool → classification pool → read pool → per-file template state →
//! write pool. Every pool and session table lives here on one thread; workers only send
//! [`Event`]s back, so no stage state is shared across threads.

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, warn};
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::engine::tools::{default_rewrite, identity_rewrite};
use crate::template::{Defines, FileFacts, TemplateState, Vars, grammar_for_path, synthesized};
use crate::utils::config::{DEFAULT_CONTENT_TYPE, PoolCaps, StreamConsts};
use crate::{Classification, EligibleFn, Notice, Opts, RewriteFn, RunReport};

use super::classify::MimePatterns;
use super::context::{RunContext, plan_run};
use super::events::{Event, ExpandEvent, ReadEvent};
use super::reader::ReadRequest;
use super::writer::{ChunkedWriter, SinkFactory, WriteSignal, WriteTarget};

type Observer = Box<dyn FnMut(&Notice) + Send>;

/// Drives runs. Reusable: each [`Orchestrator::run`] starts from clean per-run state.
pub struct Orchestrator {
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    cancel: Arc<AtomicBool>,
    observer: Option<Observer>,
    rewrite: Option<RewriteFn>,
    eligible: Option<EligibleFn>,
    sink: SinkFactory,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            events_tx,
            events_rx,
            cancel: Arc::new(AtomicBool::new(false)),
            observer: None,
            rewrite: None,
            eligible: None,
            sink: Arc::new(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>),
        }
    }

    /// Replace the input → output path rule (default: swap the input root for the output root).
    pub fn with_rewrite(mut self, rule: RewriteFn) -> Self {
        self.rewrite = Some(rule);
        self
    }

    /// Replace the content-type test that decides which files are transformed.
    pub fn with_eligibility(mut self, eligible: EligibleFn) -> Self {
        self.eligible = Some(eligible);
        self
    }

    /// Replace the sink used when no output directory is set (default: stdout).
    pub fn with_sink(mut self, sink: SinkFactory) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn FnMut(&Notice) + Send>) {
        self.observer = Some(observer);
    }

    /// Flag that cancels the current run when set (e.g. from a Ctrl+C handler). Cleared at the
    /// start of every run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the pipeline to completion (or cancellation). Configuration errors return `Err`
    /// before any I/O; per-file errors are counted in the report.
    pub fn run(&mut self, opts: &Opts) -> Result<RunReport> {
        let plan = plan_run(opts)?;
        self.cancel.store(false, Ordering::SeqCst);
        // Events from an earlier cancelled run.
        while self.events_rx.try_recv().is_ok() {}

        let (target, default_rule) = match &plan.output_root {
            Some(root) => (
                WriteTarget::Directory {
                    root: root.clone(),
                    simulate: opts.simulate,
                },
                default_rewrite(plan.input_root.clone(), root.clone()),
            ),
            None => (WriteTarget::Sink(Arc::clone(&self.sink)), identity_rewrite()),
        };
        let rule = self.rewrite.clone().unwrap_or(default_rule);
        let writer = ChunkedWriter::new(
            target,
            rule,
            plan.caps.directories,
            plan.caps.writes,
            opts.high_water_mark,
            self.events_tx.clone(),
        );
        let eligible: EligibleFn = match &self.eligible {
            Some(f) => Arc::clone(f),
            None => {
                let types = MimePatterns::new(&opts.transform_types);
                Arc::new(move |ct: &str| types.matches(ct))
            }
        };

        debug!(
            "Run plan: {} pattern(s) under {}, caps {:?}",
            plan.patterns.len(),
            plan.input_root.display(),
            plan.caps
        );
        if opts.simulate {
            info!("Simulating: nothing will be written");
        }

        let mut ctx = RunContext::new(plan, opts, writer, &self.events_tx);
        let patterns = ctx.plan.patterns.clone();
        let base = ctx.plan.input_root.clone();
        ctx.expander.expand(&patterns, &base);

        let poll = Duration::from_millis(StreamConsts::CANCEL_POLL_MS);
        while !ctx.is_idle() {
            self.check_cancel(&mut ctx);
            match self.events_rx.recv_timeout(poll) {
                Ok(event) => self.dispatch(&mut ctx, opts, &eligible, event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.check_cancel(&mut ctx);
        ctx.writer.shutdown();

        if !ctx.states.is_empty() {
            debug!("{} template states left at run end", ctx.states.len());
            ctx.states.clear();
        }
        let peaks = PoolCaps {
            expansions: ctx.expander.peak(),
            classifications: ctx.classifier.peak(),
            reads: ctx.reader.peak(),
            directories: ctx.writer.peak_dirs(),
            writes: ctx.writer.peak_open(),
        };
        debug!("Peaks: {peaks:?} (caps {:?})", ctx.plan.caps);

        Ok(RunReport {
            files: ctx.files,
            elapsed: ctx.started.elapsed(),
            written: ctx.written_relative(),
            manifest_root: ctx.plan.manifest_root.clone(),
            errors: ctx.errors,
            last_error: ctx.last_error.take(),
            cancelled: ctx.cancelled,
            caps: ctx.plan.caps,
            peaks,
        })
    }

    /// Stop admitting work once the cancel flag is set; open reads stop, writes drain.
    fn check_cancel(&mut self, ctx: &mut RunContext) {
        if ctx.cancelled || !self.cancel.load(Ordering::SeqCst) {
            return;
        }
        ctx.cancelled = true;
        let dropped = ctx.expander.clear() + ctx.classifier.clear() + ctx.reader.cancel_all();
        warn!("Cancelled: {dropped} queued task(s) dropped, finishing open writes");
    }

    fn dispatch(&mut self, ctx: &mut RunContext, opts: &Opts, eligible: &EligibleFn, event: Event) {
        match event {
            Event::Expand(ev) => self.on_expanded(ctx, ev),
            Event::Classify(c) => self.on_classified(ctx, c),
            Event::Read(ev) => self.on_read(ctx, opts, eligible, ev),
            Event::Write(ev) => {
                for signal in ctx.writer.handle(ev) {
                    self.on_write_signal(ctx, signal);
                }
            }
        }
    }

    fn on_expanded(&mut self, ctx: &mut RunContext, event: ExpandEvent) {
        let accept = !ctx.cancelled;
        match ctx.expander.on_expanded(event, accept) {
            Ok(files) => {
                for file in files {
                    ctx.classifier.classify(file);
                }
            }
            Err(e) => self.record_error(ctx, None, format!("{e:#}")),
        }
    }

    fn on_classified(&mut self, ctx: &mut RunContext, c: Classification) {
        ctx.classifier.on_classified();
        if ctx.cancelled {
            return;
        }
        debug!("{} → {}", c.path.path.display(), c.content_type);
        ctx.reader.open(ReadRequest {
            path: c.path.path,
            content_type: c.content_type,
        });
    }

    fn on_read(
        &mut self,
        ctx: &mut RunContext,
        opts: &Opts,
        eligible: &EligibleFn,
        ev: ReadEvent,
    ) {
        match ev {
            ReadEvent::Opened { path } => {
                let content_type = ctx
                    .reader
                    .content_type(&path)
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                self.notify(Notice::ReadStart { path, content_type });
            }
            ReadEvent::Data { path, bytes } => {
                if !ctx.reader.on_data(&path) || ctx.failed.contains(&path) {
                    return;
                }
                let state = state_for(ctx, opts, eligible, &path);
                let fragment = match state.feed(&bytes) {
                    Ok(f) => f,
                    Err(e) => return self.abandon(ctx, &path, e),
                };
                self.notify(Notice::Write {
                    path: path.clone(),
                    bytes: fragment.bytes.len(),
                    validation: fragment.code,
                });
                match ctx.writer.write(&path, fragment.bytes) {
                    Ok(true) => ctx.reader.resume(&path),
                    Ok(false) => ctx.reader.pause(&path),
                    Err(e) => self.abandon(ctx, &path, e),
                }
            }
            ReadEvent::Ended { path } => {
                self.notify(Notice::ReadEnd { path: path.clone() });
                if !ctx.failed.contains(&path) {
                    self.finish_file(ctx, opts, eligible, &path);
                }
                ctx.reader.destroy(&path);
            }
            ReadEvent::Failed { path, error } => {
                self.record_error(ctx, Some(&path), format!("{error:#}"));
                ctx.failed.insert(path.clone());
                if !ctx.writer.end(&path) {
                    ctx.states.remove(&path);
                }
                ctx.reader.destroy(&path);
            }
            ReadEvent::Closed { path } => {
                // Cancelled: close what was written so far, without flushing withheld bytes.
                if !ctx.writer.end(&path) {
                    ctx.states.remove(&path);
                }
                ctx.reader.destroy(&path);
            }
        }
    }

    /// Flush the withheld tail and close the output. Files that never produced data still get
    /// one (empty) write so their output exists.
    fn finish_file(
        &mut self,
        ctx: &mut RunContext,
        opts: &Opts,
        eligible: &EligibleFn,
        path: &Path,
    ) {
        let tail = match state_for(ctx, opts, eligible, path).finish() {
            Ok(tail) => tail,
            Err(e) => return self.abandon(ctx, path, e),
        };
        if !tail.is_empty() || !ctx.writer.has_session(path) {
            self.notify(Notice::Write {
                path: path.to_path_buf(),
                bytes: tail.len(),
                validation: ctx
                    .states
                    .get(path)
                    .map(TemplateState::last_code)
                    .unwrap_or_default(),
            });
            if let Err(e) = ctx.writer.write(path, tail) {
                return self.abandon(ctx, path, e);
            }
        }
        ctx.writer.end(path);
    }

    fn on_write_signal(&mut self, ctx: &mut RunContext, signal: WriteSignal) {
        match signal {
            WriteSignal::Started { unfiltered, output } => self.notify(Notice::WriteStart {
                path: unfiltered,
                output,
            }),
            WriteSignal::Drain { unfiltered } => ctx.reader.resume(&unfiltered),
            WriteSignal::Closed { unfiltered, output } => {
                ctx.states.remove(&unfiltered);
                self.notify(Notice::WriteEnd {
                    path: unfiltered,
                    output,
                });
            }
            WriteSignal::Failed {
                unfiltered,
                output,
                error,
            } => {
                let msg = format!("{} ({error:#})", output.display());
                self.record_error(ctx, Some(&unfiltered), msg);
                ctx.states.remove(&unfiltered);
                ctx.failed.insert(unfiltered.clone());
                ctx.reader.cancel(&unfiltered);
            }
        }
    }

    /// Give up on one input after a transform or write error; the rest of the run continues.
    fn abandon(&mut self, ctx: &mut RunContext, path: &Path, error: impl Display) {
        self.record_error(ctx, Some(path), format!("{error:#}"));
        ctx.failed.insert(path.to_path_buf());
        ctx.reader.cancel(path);
        if !ctx.writer.end(path) {
            ctx.states.remove(path);
        }
    }

    fn record_error(&mut self, ctx: &mut RunContext, path: Option<&Path>, message: String) {
        ctx.errors += 1;
        match path {
            Some(p) => warn!("{}: {}", p.display(), message),
            None => warn!("{message}"),
        }
        ctx.last_error = Some(message.clone());
        self.notify(Notice::Error {
            path: path.map(Path::to_path_buf),
            message,
        });
    }

    fn notify(&mut self, notice: Notice) {
        log_notice(&notice);
        if let Some(observer) = self.observer.as_mut() {
            observer(&notice);
        }
    }
}

/// Template state for `path`, created on first use. Creation counts the file and fixes its
/// 1-based index.
fn state_for<'a>(
    ctx: &'a mut RunContext,
    opts: &Opts,
    eligible: &EligibleFn,
    path: &Path,
) -> &'a mut TemplateState {
    let RunContext {
        states,
        files,
        reader,
        vars,
        started,
        run_started,
        ..
    } = ctx;
    states.entry(path.to_path_buf()).or_insert_with(|| {
        *files += 1;
        let facts = FileFacts {
            path,
            content_type: reader.content_type(path).unwrap_or(DEFAULT_CONTENT_TYPE),
            index: *files,
            run_started: *run_started,
            elapsed: started.elapsed(),
        };
        new_state(&facts, opts, eligible, vars)
    })
}

fn new_state(
    facts: &FileFacts<'_>,
    opts: &Opts,
    eligible: &EligibleFn,
    vars: &Vars,
) -> TemplateState {
    let path = facts.path;
    if !eligible(facts.content_type) {
        return TemplateState::passthrough(path);
    }
    let defines = Defines::merged(
        opts.env_defines
            .iter()
            .cloned()
            .chain(synthesized(facts))
            .chain(opts.defines.iter().cloned()),
    );
    TemplateState::new(path, grammar_for_path(path), defines, vars.clone())
}

fn log_notice(notice: &Notice) {
    let show = |p: &PathBuf| p.display().to_string();
    match notice {
        Notice::ReadStart { path, content_type } => {
            debug!("read start {} ({content_type})", show(path))
        }
        Notice::ReadEnd { path } => debug!("read end {}", show(path)),
        Notice::WriteStart { output, .. } => debug!("write start {}", show(output)),
        Notice::Write {
            path,
            bytes,
            validation,
        } => debug!("write {} bytes for {} ({validation:?})", bytes, show(path)),
        Notice::WriteEnd { output, .. } => debug!("write end {}", show(output)),
        Notice::Error { .. } => {}
    }
}
