//! Chunked write sessions: directory materialization pool, write-session pool, pending buffers
//! for sessions that are not open yet, and drain signalling.

use anyhow::{Context, Error, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::RewriteFn;

use super::events::{Event, WriteEvent};
use super::paths::PathRewriteMap;
use super::queue::Pool;

/// Builds the shared sink used when there is no output directory.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn Write + Send> + Send + Sync>;

/// Where output bytes go.
#[derive(Clone)]
pub enum WriteTarget {
    /// One file per input under `root`. With `simulate` nothing touches the filesystem.
    Directory { root: PathBuf, simulate: bool },
    /// Every file into one ordered sink that stays open for the whole run.
    Sink(SinkFactory),
}

/// Commands to a session thread (or to the shared sink thread).
pub enum WriteCommand {
    Data { output: PathBuf, bytes: Vec<u8> },
    Close { output: PathBuf },
}

/// What the orchestrator must react to after a write event.
pub enum WriteSignal {
    Started { unfiltered: PathBuf, output: PathBuf },
    /// The writer can take more bytes for this input.
    Drain { unfiltered: PathBuf },
    Closed { unfiltered: PathBuf, output: PathBuf },
    Failed {
        unfiltered: PathBuf,
        output: PathBuf,
        error: Error,
    },
}

enum Stage {
    AwaitingDir,
    AwaitingSlot,
    Open(Sender<WriteCommand>),
}

struct WriteSession {
    stage: Stage,
    /// Bytes that arrived before the session opened.
    buffer: Vec<u8>,
    /// Bytes sent to the session thread and not yet flushed.
    pending_bytes: usize,
    awaiting_drain: bool,
    close_requested: bool,
}

struct SinkWorker {
    commands: Sender<WriteCommand>,
    handle: JoinHandle<()>,
}

pub struct ChunkedWriter {
    simulate: bool,
    rewrite: PathRewriteMap,
    dirs: Pool<PathBuf>,
    slots: Pool<PathBuf>,
    sessions: HashMap<PathBuf, WriteSession>,
    written: BTreeSet<PathBuf>,
    sink: Option<SinkWorker>,
    high_water: usize,
    events: Sender<Event>,
}

impl ChunkedWriter {
    pub fn new(
        target: WriteTarget,
        rule: RewriteFn,
        dir_cap: usize,
        write_cap: usize,
        high_water: usize,
        events: Sender<Event>,
    ) -> Self {
        let (simulate, sink) = match target {
            WriteTarget::Directory { simulate, .. } => (simulate, None),
            WriteTarget::Sink(factory) => {
                let (tx, rx) = unbounded();
                let out = factory();
                let ev = events.clone();
                let handle = thread::spawn(move || sink_worker(out, rx, ev));
                (
                    false,
                    Some(SinkWorker {
                        commands: tx,
                        handle,
                    }),
                )
            }
        };
        Self {
            simulate,
            rewrite: PathRewriteMap::new(rule),
            dirs: Pool::new("mkdir", dir_cap),
            slots: Pool::new("write", write_cap),
            sessions: HashMap::new(),
            written: BTreeSet::new(),
            sink,
            high_water: high_water.max(1),
            events,
        }
    }

    /// Queue `bytes` for the output of `unfiltered`. Returns `Ok(true)` when the caller may keep
    /// writing, `Ok(false)` when it must wait for a drain signal. Only one write may be made
    /// for a path before its session opens.
    pub fn write(&mut self, unfiltered: &Path, bytes: Vec<u8>) -> Result<bool> {
        let output = self.rewrite.filter(unfiltered)?;
        let high_water = self.high_water;

        if let Some(s) = self.sessions.get_mut(&output) {
            return Ok(match &s.stage {
                Stage::Open(tx) => {
                    s.pending_bytes += bytes.len();
                    let _ = tx.send(WriteCommand::Data {
                        output: output.clone(),
                        bytes,
                    });
                    if s.pending_bytes >= high_water {
                        s.awaiting_drain = true;
                        false
                    } else {
                        true
                    }
                }
                Stage::AwaitingDir | Stage::AwaitingSlot => {
                    s.buffer.extend_from_slice(&bytes);
                    s.awaiting_drain = true;
                    false
                }
            });
        }

        if let Some(sink) = &self.sink {
            let tx = sink.commands.clone();
            let pending_bytes = bytes.len();
            let _ = tx.send(WriteCommand::Data {
                output: output.clone(),
                bytes,
            });
            let awaiting_drain = pending_bytes >= high_water;
            self.sessions.insert(
                output.clone(),
                WriteSession {
                    stage: Stage::Open(tx),
                    buffer: Vec::new(),
                    pending_bytes,
                    awaiting_drain,
                    close_requested: false,
                },
            );
            let _ = self
                .events
                .send(Event::Write(WriteEvent::Opened { output }));
            return Ok(!awaiting_drain);
        }

        self.sessions.insert(
            output.clone(),
            WriteSession {
                stage: Stage::AwaitingDir,
                buffer: bytes,
                pending_bytes: 0,
                awaiting_drain: true,
                close_requested: false,
            },
        );
        if let Some(output) = self.dirs.admit(output) {
            self.spawn_mkdir(output);
        }
        Ok(false)
    }

    /// Close the output of `unfiltered` once everything queued for it is written.
    /// Returns false when no session exists. The shared sink is never closed; its session is
    /// released instead.
    pub fn end(&mut self, unfiltered: &Path) -> bool {
        let Some(output) = self.rewrite.filtered(unfiltered).map(Path::to_path_buf) else {
            return false;
        };
        let Some(s) = self.sessions.get_mut(&output) else {
            return false;
        };
        if !s.close_requested {
            s.close_requested = true;
            if let Stage::Open(tx) = &s.stage {
                let _ = tx.send(WriteCommand::Close { output });
            }
        }
        true
    }

    /// True when a session (open or not) exists for `unfiltered`.
    pub fn has_session(&self, unfiltered: &Path) -> bool {
        self.rewrite
            .filtered(unfiltered)
            .is_some_and(|o| self.sessions.contains_key(o))
    }

    pub fn handle(&mut self, event: WriteEvent) -> Vec<WriteSignal> {
        match event {
            WriteEvent::DirReady { output, result } => {
                if let Some(next) = self.dirs.release() {
                    self.spawn_mkdir(next);
                }
                match result {
                    Err(error) => self.fail(output, error, false),
                    Ok(()) => {
                        if let Some(s) = self.sessions.get_mut(&output) {
                            s.stage = Stage::AwaitingSlot;
                            if let Some(output) = self.slots.admit(output) {
                                self.open_session(output);
                            }
                        }
                        Vec::new()
                    }
                }
            }
            WriteEvent::Opened { output } => {
                if !self.sessions.contains_key(&output) {
                    return Vec::new();
                }
                vec![WriteSignal::Started {
                    unfiltered: self.unfiltered_of(&output),
                    output,
                }]
            }
            WriteEvent::Flushed { output, bytes } => {
                let Some(s) = self.sessions.get_mut(&output) else {
                    return Vec::new();
                };
                s.pending_bytes = s.pending_bytes.saturating_sub(bytes);
                let drain = s.awaiting_drain && s.pending_bytes == 0;
                if drain {
                    s.awaiting_drain = false;
                }
                let signals = if drain {
                    vec![WriteSignal::Drain {
                        unfiltered: self.unfiltered_of(&output),
                    }]
                } else {
                    Vec::new()
                };
                self.written.insert(output);
                signals
            }
            WriteEvent::Closed { output } => {
                if self.sessions.remove(&output).is_none() {
                    return Vec::new();
                }
                self.release_slot();
                vec![WriteSignal::Closed {
                    unfiltered: self.unfiltered_of(&output),
                    output,
                }]
            }
            WriteEvent::Failed { output, error } => self.fail(output, error, true),
        }
    }

    fn fail(&mut self, output: PathBuf, error: Error, holds_slot: bool) -> Vec<WriteSignal> {
        let Some(s) = self.sessions.remove(&output) else {
            return Vec::new();
        };
        if holds_slot && matches!(s.stage, Stage::Open(_)) {
            self.release_slot();
        }
        if !s.buffer.is_empty() {
            debug!(
                "Discarding {} buffered bytes for {}",
                s.buffer.len(),
                output.display()
            );
        }
        vec![WriteSignal::Failed {
            unfiltered: self.unfiltered_of(&output),
            output,
            error,
        }]
    }

    /// Input that produced `output`. Sessions only exist for mapped outputs.
    fn unfiltered_of(&self, output: &Path) -> PathBuf {
        self.rewrite
            .unfiltered(output)
            .unwrap_or(output)
            .to_path_buf()
    }

    fn release_slot(&mut self) {
        if self.sink.is_some() {
            return;
        }
        if let Some(next) = self.slots.release() {
            self.open_session(next);
        }
    }

    fn spawn_mkdir(&self, output: PathBuf) {
        let events = self.events.clone();
        let simulate = self.simulate;
        rayon::spawn(move || {
            let result = match output.parent() {
                Some(dir) if !simulate && !dir.as_os_str().is_empty() => {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("create directory {}", dir.display()))
                }
                _ => Ok(()),
            };
            let _ = events.send(Event::Write(WriteEvent::DirReady { output, result }));
        });
    }

    /// Start the session thread for `output` in a slot it already holds, flushing its buffer.
    fn open_session(&mut self, output: PathBuf) {
        let Some(s) = self.sessions.get_mut(&output) else {
            self.release_slot();
            return;
        };
        let (tx, rx) = unbounded();
        let buffer = std::mem::take(&mut s.buffer);
        s.pending_bytes += buffer.len();
        let _ = tx.send(WriteCommand::Data {
            output: output.clone(),
            bytes: buffer,
        });
        if s.close_requested {
            let _ = tx.send(WriteCommand::Close {
                output: output.clone(),
            });
        }
        s.stage = Stage::Open(tx);

        let events = self.events.clone();
        let simulate = self.simulate;
        thread::spawn(move || write_session(output, simulate, rx, events));
    }

    /// Output paths that received at least one accepted write, sorted.
    pub fn written(&self) -> impl Iterator<Item = &PathBuf> {
        self.written.iter()
    }

    /// Sessions not yet closed (opening, open, or waiting for a directory or slot).
    pub fn total(&self) -> usize {
        self.sessions.len()
    }

    /// Most write sessions open at once.
    pub fn peak_open(&self) -> usize {
        self.slots.peak()
    }

    /// Most directory jobs running at once.
    pub fn peak_dirs(&self) -> usize {
        self.dirs.peak()
    }

    /// Stop the shared sink thread (if any) after flushing it.
    pub fn shutdown(&mut self) {
        if let Some(SinkWorker { commands, handle }) = self.sink.take() {
            drop(commands);
            self.sessions.clear();
            if handle.join().is_err() {
                log::error!("sink thread panicked");
            }
        }
    }
}

/// Session thread for one output file.
fn write_session(
    output: PathBuf,
    simulate: bool,
    commands: Receiver<WriteCommand>,
    events: Sender<Event>,
) {
    let send = |ev: WriteEvent| {
        let _ = events.send(Event::Write(ev));
    };
    let mut out: Box<dyn Write> = if simulate {
        Box::new(io::sink())
    } else {
        match File::create(&output) {
            Ok(f) => Box::new(BufWriter::new(f)),
            Err(e) => {
                let error = Error::new(e).context(format!("create {}", output.display()));
                send(WriteEvent::Failed { output, error });
                return;
            }
        }
    };
    send(WriteEvent::Opened {
        output: output.clone(),
    });

    for cmd in commands.iter() {
        match cmd {
            WriteCommand::Data { bytes, .. } => {
                if let Err(e) = out.write_all(&bytes) {
                    let error = Error::new(e).context(format!("write {}", output.display()));
                    send(WriteEvent::Failed { output, error });
                    return;
                }
                send(WriteEvent::Flushed {
                    output: output.clone(),
                    bytes: bytes.len(),
                });
            }
            WriteCommand::Close { .. } => break,
        }
    }

    match out.flush() {
        Ok(()) => send(WriteEvent::Closed { output }),
        Err(e) => {
            let error = Error::new(e).context(format!("flush {}", output.display()));
            send(WriteEvent::Failed { output, error });
        }
    }
}

/// Shared sink thread. `Close` releases one output's session; the sink itself stays open
/// until every sender is dropped.
fn sink_worker(
    mut out: Box<dyn Write + Send>,
    commands: Receiver<WriteCommand>,
    events: Sender<Event>,
) {
    let send = |ev: WriteEvent| {
        let _ = events.send(Event::Write(ev));
    };
    let mut failed: HashSet<PathBuf> = HashSet::new();
    for cmd in commands.iter() {
        match cmd {
            WriteCommand::Data { output, bytes } => {
                if failed.contains(&output) {
                    continue;
                }
                match out.write_all(&bytes) {
                    Ok(()) => send(WriteEvent::Flushed {
                        output,
                        bytes: bytes.len(),
                    }),
                    Err(e) => {
                        failed.insert(output.clone());
                        send(WriteEvent::Failed {
                            output,
                            error: Error::new(e).context("write to output sink"),
                        });
                    }
                }
            }
            WriteCommand::Close { output } => {
                if failed.remove(&output) {
                    continue;
                }
                match out.flush() {
                    Ok(()) => send(WriteEvent::Closed { output }),
                    Err(e) => send(WriteEvent::Failed {
                        output,
                        error: Error::new(e).context("flush output sink"),
                    }),
                }
            }
        }
    }
    let _ = out.flush();
}
