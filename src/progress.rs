//! Progress events of long-running jobs
//!
//! A job pushes [`ProgressEvent`]s into a [`ProgressSink`]. Consumers see
//! any number of `log`/`progress` frames followed by exactly one `done` or
//! `error` frame.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::record::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Crawl,
    Products,
}

/// Aggregate counters of a finished scrape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub pages_crawled: usize,
    pub products_found: usize,
    pub products_done: usize,
    pub products_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<Stats>,
}

/// One frame of the progress stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Log {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        phase: Phase,
        pages_done: usize,
        frontier_size: usize,
        products_found: usize,
        products_done: usize,
        products_total: usize,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        file_url: String,
        rel_path: String,
        stats: RunStats,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    /// `done` and `error` end the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }
}

/// Receiver side of the progress stream
pub trait ProgressSink {
    fn emit(&mut self, event: ProgressEvent);
}

impl ProgressSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

/// A hung-up receiver only means nobody is watching; the job keeps going.
impl ProgressSink for Sender<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) {
        if self.send(event).is_err() {
            tracing::trace!("progress receiver dropped");
        }
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for &mut S {
    fn emit(&mut self, event: ProgressEvent) {
        (**self).emit(event);
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&mut self, _event: ProgressEvent) {}
}

/// Writes one JSON object per line and flushes after each frame
#[derive(Debug)]
pub struct NdjsonSink<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressSink for NdjsonSink<W> {
    fn emit(&mut self, event: ProgressEvent) {
        let written = serde_json::to_writer(&mut self.writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write progress frame");
        }
    }
}

/// Shared stop flag, checked by a job before every fetch
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
