//! Handoff to the external session logger.
//!
//! A logger is launched with a session id and an output file, runs on its own,
//! and is asked to stop with a cooperative interrupt. Nothing else flows
//! between the two processes.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::models::SessionId;

mod process;

pub use process::ProcessLauncher;

/// A launched logger that can be asked to stop once.
pub trait LoggerProcess: Send + fmt::Debug {
    fn pid(&self) -> Option<u32>;

    /// Sends the stop request and returns without waiting for the exit.
    fn interrupt(self: Box<Self>) -> Result<()>;
}

pub trait LoggerLauncher: Send + Sync {
    /// Directory that receives one output file per session.
    fn logs_dir(&self) -> &Path;

    fn launch(&self, session_id: &str, output_path: &Path) -> Result<Box<dyn LoggerProcess>>;

    /// `<logs_dir>/session_<id>.csv`, creating `logs_dir` when missing.
    fn output_path(&self, session_id: &str) -> Result<PathBuf> {
        let logs_dir = self.logs_dir();
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("failed to create log directory {}", logs_dir.display()))?;
        Ok(logs_dir.join(output_file_name(session_id)))
    }
}

/// Session ids come from the store; anything outside `[A-Za-z0-9_-]` is
/// replaced so the id can never escape `logs_dir`.
pub fn output_file_name(session_id: &str) -> String {
    let safe: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("session_{safe}.csv")
}

/// Correlates an active session with the logger launched for it.
#[derive(Debug)]
pub struct LoggerHandle {
    session_id: SessionId,
    output_path: PathBuf,
    process: Box<dyn LoggerProcess>,
}

impl LoggerHandle {
    pub fn new(
        session_id: SessionId,
        output_path: PathBuf,
        process: Box<dyn LoggerProcess>,
    ) -> Self {
        Self {
            session_id,
            output_path,
            process,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Consumes the handle; after this the controller no longer tracks the logger.
    pub fn interrupt(self) -> Result<()> {
        self.process.interrupt()
    }
}
