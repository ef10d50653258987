//! Reindex progress tracking.
//!
//! A bulk reindex publishes a [`ReindexProgress`] snapshot that any caller
//! can poll while the run is in flight. Only one run may hold the tracker
//! at a time. Human-readable lines go to **stderr** so stdout remains
//! parseable for scripts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use crate::error::IndexError;

/// Point-in-time view of the current (or last) reindex run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReindexProgress {
    pub running: bool,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReindexProgress {
    /// `"reindex  running  12 / 1,024 documents (1 failed)"`
    pub fn render(&self) -> String {
        let state = if self.running { "running" } else { "idle" };
        let mut line = format!(
            "reindex  {}  {} / {} documents",
            state,
            format_number(self.processed),
            format_number(self.total)
        );
        if self.failed > 0 {
            line.push_str(&format!(" ({} failed)", format_number(self.failed)));
        }
        line
    }
}

#[derive(Default)]
pub struct ReindexTracker {
    state: Mutex<ReindexProgress>,
}

impl ReindexTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReindexProgress> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the tracker for a new run of `total` documents.
    pub fn begin(&self, total: u64) -> Result<(), IndexError> {
        let mut state = self.lock();
        if state.running {
            return Err(IndexError::AlreadyRunning);
        }
        *state = ReindexProgress {
            running: true,
            total,
            started_at: Some(Utc::now()),
            ..ReindexProgress::default()
        };
        Ok(())
    }

    pub fn record(&self, ok: bool) {
        let mut state = self.lock();
        state.processed += 1;
        if ok {
            state.succeeded += 1;
        } else {
            state.failed += 1;
        }
    }

    pub fn finish(&self) -> ReindexProgress {
        let mut state = self.lock();
        state.running = false;
        state.finished_at = Some(Utc::now());
        state.clone()
    }

    pub fn snapshot(&self) -> ReindexProgress {
        self.lock().clone()
    }
}

/// Write one progress line to stderr.
pub fn report_stderr(progress: &ReindexProgress) {
    let line = format!("{}\n", progress.render());
    let _ = std::io::stderr().lock().write_all(line.as_bytes());
    let _ = std::io::stderr().lock().flush();
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}
