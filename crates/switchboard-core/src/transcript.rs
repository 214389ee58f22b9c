//! Append-only JSONL transcript store.
//!
//! One `{session_id}.jsonl` file per session, discoverable under a project
//! root (either directly in the root or one directory level below it, the
//! way per-project transcript trees are laid out). The store is read-only
//! from this layer's point of view: the backend owns writing.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::agent::event::AgentEvent;

#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locator and reader for persisted session transcripts.
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    /// The root is resolved once at process start and passed in; the store
    /// never consults the environment itself.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the transcript file for a session id, if one exists.
    pub fn locate(&self, session_id: &str) -> Option<PathBuf> {
        if !is_plain_component(session_id) {
            log::warn!("refusing transcript lookup for suspicious id: {session_id}");
            return None;
        }

        let file_name = format!("{session_id}.jsonl");
        let direct = self.root.join(&file_name);
        if direct.is_file() {
            return Some(direct);
        }

        let entries = fs::read_dir(&self.root).ok()?;
        for entry in entries.flatten() {
            let candidate = entry.path().join(&file_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Read all events from a transcript file.
    ///
    /// A truncated or otherwise malformed record is skipped with a warning
    /// instead of failing the whole read; a process that died mid-write
    /// leaves exactly such a trailing line behind.
    pub fn read(&self, path: &Path) -> Result<Vec<AgentEvent>, TranscriptError> {
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    log::warn!(
                        "skipping malformed transcript record {}:{}: {e}",
                        path.display(),
                        line_no + 1
                    );
                }
            }
        }

        Ok(events)
    }

    /// Locate and read in one step; `None` when the transcript is missing
    /// or unreadable (the caller degrades, it never fails).
    pub fn load(&self, session_id: &str) -> Option<Vec<AgentEvent>> {
        let path = self.locate(session_id)?;
        match self.read(&path) {
            Ok(events) => Some(events),
            Err(e) => {
                log::warn!("failed to read transcript for {session_id}: {e}");
                None
            }
        }
    }

    /// All session ids with a transcript under the root.
    pub fn list(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return ids;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Ok(nested) = fs::read_dir(&path) {
                    for nested_entry in nested.flatten() {
                        push_if_transcript(&mut ids, &nested_entry.path());
                    }
                }
            } else {
                push_if_transcript(&mut ids, &path);
            }
        }

        ids.sort();
        ids
    }
}

fn push_if_transcript(ids: &mut Vec<String>, path: &Path) {
    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            ids.push(stem.to_string());
        }
    }
}

fn is_plain_component(id: &str) -> bool {
    !id.is_empty() && !id.contains('/') && !id.contains('\\') && id != "." && id != ".."
}
