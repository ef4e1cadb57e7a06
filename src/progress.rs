//! Sync progress reporting.
//!
//! `lens sync` reports which phase a repository is in and how many file
//! contents are left to fetch. Progress goes to **stderr** so stdout stays
//! parseable for scripts.

use std::io::{IsTerminal, Write};
use std::sync::Arc;

/// A single progress event for one repository sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Listing the tree on the hosting platform. Total unknown.
    Listing { repository: String },
    /// `n` of `total` content fetches finished (successfully or not).
    Fetching {
        repository: String,
        n: u64,
        total: u64,
    },
    /// Writing and publishing the new generation.
    Committing { repository: String, files: u64 },
}

/// Receives progress events from the ingestor.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: `sync acme/web  fetching  120 / 1,024 files`.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Listing { repository } => {
                format!("sync {}  listing tree...\n", repository)
            }
            SyncProgressEvent::Fetching {
                repository,
                n,
                total,
            } => format!(
                "sync {}  fetching  {} / {} files\n",
                repository,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Committing { repository, files } => format!(
                "sync {}  committing  {} files\n",
                repository,
                format_number(*files)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn event_json(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Listing { repository } => serde_json::json!({
                "event": "progress",
                "repository": repository,
                "phase": "listing"
            }),
            SyncProgressEvent::Fetching {
                repository,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "repository": repository,
                "phase": "fetching",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Committing { repository, files } => serde_json::json!({
                "event": "progress",
                "repository": repository,
                "phase": "committing",
                "files": files
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_event_shape() {
        let value = JsonProgress::event_json(&SyncProgressEvent::Fetching {
            repository: "acme/web".into(),
            n: 3,
            total: 10,
        });
        assert_eq!(value["phase"], "fetching");
        assert_eq!(value["repository"], "acme/web");
        assert_eq!(value["n"], 3);
        assert_eq!(value["total"], 10);
    }
}
