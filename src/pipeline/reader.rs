//! Chunked read sessions under the read pool.
//!
//! Each open session is a thread that reads one chunk, reports it, then parks until the
//! orchestrator resumes it. That single outstanding chunk is the pause point for backpressure.

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::thread;

use super::events::{Event, ReadEvent};
use super::queue::Pool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadControl {
    Resume,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: PathBuf,
    pub content_type: String,
}

#[derive(Debug)]
struct ReadSession {
    content_type: String,
    control: Sender<ReadControl>,
    paused: bool,
    /// A chunk was delivered and the thread is parked waiting for Resume/Cancel.
    awaiting_resume: bool,
    cancelled: bool,
}

pub struct ChunkedReader {
    pool: Pool<ReadRequest>,
    sessions: HashMap<PathBuf, ReadSession>,
    chunk_size: usize,
    events: Sender<Event>,
}

impl ChunkedReader {
    pub fn new(cap: usize, chunk_size: usize, events: Sender<Event>) -> Self {
        Self {
            pool: Pool::new("read", cap),
            sessions: HashMap::new(),
            chunk_size: chunk_size.max(1),
            events,
        }
    }

    /// Open a session for `req`, or queue it when the pool is full.
    pub fn open(&mut self, req: ReadRequest) {
        if let Some(req) = self.pool.admit(req) {
            self.start(req);
        }
    }

    fn start(&mut self, req: ReadRequest) {
        let (control_tx, control_rx) = unbounded();
        self.sessions.insert(
            req.path.clone(),
            ReadSession {
                content_type: req.content_type,
                control: control_tx,
                paused: false,
                awaiting_resume: false,
                cancelled: false,
            },
        );
        let events = self.events.clone();
        let chunk_size = self.chunk_size;
        let path = req.path;
        thread::spawn(move || read_session(path, chunk_size, control_rx, events));
    }

    pub fn content_type(&self, path: &Path) -> Option<&str> {
        self.sessions.get(path).map(|s| s.content_type.as_str())
    }

    /// Record that a chunk arrived. Returns false when the data must be ignored
    /// (session unknown or cancelled).
    pub fn on_data(&mut self, path: &Path) -> bool {
        match self.sessions.get_mut(path) {
            Some(s) if !s.cancelled => {
                s.awaiting_resume = true;
                true
            }
            _ => false,
        }
    }

    pub fn pause(&mut self, path: &Path) {
        if let Some(s) = self.sessions.get_mut(path) {
            s.paused = true;
        }
    }

    /// Let the session read its next chunk. No-op unless it is parked on a delivered chunk.
    pub fn resume(&mut self, path: &Path) {
        if let Some(s) = self.sessions.get_mut(path) {
            if s.paused {
                debug!("{} resumed", path.display());
                s.paused = false;
            }
            if s.awaiting_resume && !s.cancelled {
                s.awaiting_resume = false;
                let _ = s.control.send(ReadControl::Resume);
            }
        }
    }

    /// Ask one session to stop; it reports `Closed` (or its natural terminal event).
    pub fn cancel(&mut self, path: &Path) {
        if let Some(s) = self.sessions.get_mut(path)
            && !s.cancelled
        {
            s.cancelled = true;
            let _ = s.control.send(ReadControl::Cancel);
        }
    }

    /// Drop queued opens and cancel every open session. Returns how many queued opens were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.pool.clear();
        let paths: Vec<PathBuf> = self.sessions.keys().cloned().collect();
        for path in paths {
            self.cancel(&path);
        }
        dropped
    }

    /// Tear down a session after its terminal event. Idempotent: returns false if it was already
    /// gone.
    /// The freed slot goes straight to the next queued open.
    pub fn destroy(&mut self, path: &Path) -> bool {
        if self.sessions.remove(path).is_none() {
            return false;
        }
        if let Some(next) = self.pool.release() {
            self.start(next);
        }
        true
    }

    pub fn total(&self) -> usize {
        self.pool.total()
    }

    pub fn peak(&self) -> usize {
        self.pool.peak()
    }
}

fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match file.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Session thread body: open, then read/report/park until end, error or cancel.
fn read_session(
    path: PathBuf,
    chunk_size: usize,
    control: Receiver<ReadControl>,
    events: Sender<Event>,
) {
    let send = |ev: ReadEvent| events.send(Event::Read(ev)).is_ok();

    let mut file = match File::open(&path).with_context(|| format!("open {}", path.display())) {
        Ok(f) => f,
        Err(error) => {
            send(ReadEvent::Failed { path, error });
            return;
        }
    };
    if !send(ReadEvent::Opened { path: path.clone() }) {
        return;
    }

    let mut buf = vec![0u8; chunk_size];
    loop {
        match read_chunk(&mut file, &mut buf) {
            Ok(0) => {
                send(ReadEvent::Ended { path });
                return;
            }
            Ok(n) => {
                let data = ReadEvent::Data {
                    path: path.clone(),
                    bytes: buf[..n].to_vec(),
                };
                if !send(data) {
                    return;
                }
            }
            Err(e) => {
                let error = anyhow::Error::new(e).context(format!("read {}", path.display()));
                send(ReadEvent::Failed { path, error });
                return;
            }
        }
        match control.recv() {
            Ok(ReadControl::Resume) => {}
            Ok(ReadControl::Cancel) | Err(_) => {
                debug!("Read of {} cancelled", path.display());
                send(ReadEvent::Closed { path });
                return;
            }
        }
    }
}
