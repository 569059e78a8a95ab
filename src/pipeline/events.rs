//! Typed messages from pipeline workers back to the orchestrator.
//!
//! Workers (rayon jobs and session threads) only ever send; the orchestrator is the single
//! receiver and owns every pool and session table.

use anyhow::Error;
use std::path::PathBuf;

use crate::Classification;

use super::expand::{ExpandRequest, Expansion};

pub enum Event {
    Expand(ExpandEvent),
    Classify(Classification),
    Read(ReadEvent),
    Write(WriteEvent),
}

/// One pattern finished expanding.
pub struct ExpandEvent {
    pub request: ExpandRequest,
    pub result: Result<Expansion, Error>,
}

pub enum ReadEvent {
    Opened { path: PathBuf },
    /// Next chunk in file order. The session waits for a resume before reading on.
    Data { path: PathBuf, bytes: Vec<u8> },
    Ended { path: PathBuf },
    Failed { path: PathBuf, error: Error },
    /// Stopped by cancellation before end of file.
    Closed { path: PathBuf },
}

/// Keyed by output path.
pub enum WriteEvent {
    DirReady {
        output: PathBuf,
        result: Result<(), Error>,
    },
    Opened {
        output: PathBuf,
    },
    /// `bytes` from one data command were accepted by the sink.
    Flushed {
        output: PathBuf,
        bytes: usize,
    },
    Closed {
        output: PathBuf,
    },
    Failed {
        output: PathBuf,
        error: Error,
    },
}
