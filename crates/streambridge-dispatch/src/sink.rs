//! File sink: JSON history of dispatched payloads.
//!
//! Every payload the pipeline produces is appended here with its delivery
//! outcome, and the history is trimmed to `output.max_lines`. The file is
//! a single JSON array, rewritten on each append; at the expected event
//! rates this is well under one write per second.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use streambridge_core::{ConfigHandle, OutboundPayload};

/// One line of history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEntry {
    pub timestamp: DateTime<Utc>,
    pub payload: OutboundPayload,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct OutputWriter {
    config: Arc<ConfigHandle>,
    entries: Mutex<Vec<OutputEntry>>,
}

impl OutputWriter {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self {
            config,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Load existing history so restarts do not truncate it.
    pub fn load_existing(&self) {
        let output = self.config.load().output.clone();
        if !output.enabled || !output.file_path.exists() {
            return;
        }

        match std::fs::read_to_string(&output.file_path)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_str::<Vec<OutputEntry>>(&raw).map_err(|e| e.to_string())
            }) {
            Ok(mut entries) => {
                if entries.len() > output.max_lines {
                    entries.drain(..entries.len() - output.max_lines);
                }
                tracing::info!(
                    entries = entries.len(),
                    file_path = %output.file_path.display(),
                    "loaded existing output history"
                );
                *self.entries.lock() = entries;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load existing output history");
            }
        }
    }

    /// Append one entry and write the trimmed history through to disk.
    pub fn write_payload(&self, payload: OutboundPayload, success: bool, error: Option<String>) {
        let output = self.config.load().output.clone();
        if !output.enabled {
            return;
        }

        let snapshot = {
            let mut entries = self.entries.lock();
            entries.push(OutputEntry {
                timestamp: Utc::now(),
                payload,
                success,
                error,
            });
            if entries.len() > output.max_lines {
                let excess = entries.len() - output.max_lines;
                entries.drain(..excess);
            }
            entries.clone()
        };

        match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => {
                if let Err(err) = std::fs::write(&output.file_path, data) {
                    tracing::warn!(
                        file_path = %output.file_path.display(),
                        error = %err,
                        "failed to write output history"
                    );
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize output history"),
        }
    }

    /// Most recent entries, newest last.
    pub fn recent(&self, limit: usize) -> Vec<OutputEntry> {
        let entries = self.entries.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streambridge_core::Config;

    fn handle_with_output(dir: &std::path::Path, max_lines: usize) -> Arc<ConfigHandle> {
        let mut config = Config::default();
        config.output.file_path = dir.join("output.json");
        config.output.max_lines = max_lines;
        ConfigHandle::new(config)
    }

    fn payload(n: u32) -> OutboundPayload {
        OutboundPayload::seed(&format!("streamer{n}"), "", &n.to_string(), vec![])
    }

    #[test]
    fn entries_written_through_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let handle = handle_with_output(dir.path(), 100);

        let writer = OutputWriter::new(Arc::clone(&handle));
        writer.write_payload(payload(1), true, None);
        writer.write_payload(payload(2), false, Some("HTTP 500".into()));

        let reloaded = OutputWriter::new(handle);
        reloaded.load_existing();
        let recent = reloaded.recent(10);

        assert_eq!(recent.len(), 2);
        assert!(recent[0].success);
        assert!(!recent[1].success);
        assert_eq!(recent[1].error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn history_trimmed_to_max_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(handle_with_output(dir.path(), 3));

        for n in 0..5 {
            writer.write_payload(payload(n), true, None);
        }

        let recent = writer.recent(10);
        assert_eq!(recent.len(), 3);
        // The oldest two were trimmed.
        assert_eq!(recent[0].payload.streamer_id, "2");
        assert_eq!(recent[2].payload.streamer_id, "4");
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.enabled = false;
        config.output.file_path = dir.path().join("output.json");
        let writer = OutputWriter::new(ConfigHandle::new(config));

        writer.write_payload(payload(1), true, None);

        assert!(!dir.path().join("output.json").exists());
        assert!(writer.recent(10).is_empty());
    }
}
