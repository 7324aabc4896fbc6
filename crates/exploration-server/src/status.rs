//! Optional JSON status file describing the running server.
//!
//! Rewritten atomically whenever the session state, the connected client or
//! the session count changes, so an external supervisor can poll it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use serde::Serialize;

use crate::protocol::SessionState;

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub port: u16,
    pub pid: u32,
    /// Absent while no client is connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub sessions_served: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub started_at: u64,
    pub shutting_down: bool,
}

impl ServerStatus {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            pid: std::process::id(),
            state: None,
            client: None,
            sessions_served: 0,
            bytes_in: 0,
            bytes_out: 0,
            started_at: now_millis(),
            shutting_down: false,
        }
    }
}

#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    status: ServerStatus,
    written: Option<ServerStatus>,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            path: path.into(),
            status: ServerStatus::new(port),
            written: None,
        }
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    /// Apply `change` and flush if anything differs from the last write.
    /// Write failures are logged and otherwise ignored.
    pub fn update(&mut self, change: impl FnOnce(&mut ServerStatus)) {
        change(&mut self.status);
        if self.written.as_ref() == Some(&self.status) {
            return;
        }
        match atomic_write_json(&self.path, &self.status) {
            Ok(()) => self.written = Some(self.status.clone()),
            Err(err) => warn!("failed to write status file {}: {}", self.path.display(), err),
        }
    }
}

/// Atomic JSON write: write to temp file then rename.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string(value).map_err(io::Error::other)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json)?;
    fs::rename(&tmp_path, path)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
