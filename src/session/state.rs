use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logger::LoggerHandle;
use crate::models::{RatingId, SessionId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Ready,
    Active,
}

#[derive(Debug)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub rating_id: RatingId,
    pub started_at: DateTime<Utc>,
    /// `None` when the logger failed to launch; the record is still open.
    pub logger: Option<LoggerHandle>,
}

/// Idle until a rating is saved, Ready between sessions, Active while a
/// session record is open.
#[derive(Debug, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    Ready {
        rating_id: RatingId,
    },
    Active(ActiveSession),
}

impl ControllerState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            ControllerState::Idle => SessionPhase::Idle,
            ControllerState::Ready { .. } => SessionPhase::Ready,
            ControllerState::Active(_) => SessionPhase::Active,
        }
    }

    /// Wording used in precondition errors.
    pub fn describe(&self) -> &'static str {
        match self {
            ControllerState::Idle => "no readiness rating has been saved",
            ControllerState::Ready { .. } => "no session is active",
            ControllerState::Active(_) => "a session is active",
        }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let phase = self.phase();
        match self {
            ControllerState::Idle => ControllerSnapshot {
                phase,
                ..ControllerSnapshot::default()
            },
            ControllerState::Ready { rating_id } => ControllerSnapshot {
                phase,
                rating_id: Some(*rating_id),
                ..ControllerSnapshot::default()
            },
            ControllerState::Active(active) => ControllerSnapshot {
                phase,
                rating_id: Some(active.rating_id),
                session_id: Some(active.session_id.clone()),
                started_at: Some(active.started_at),
                logger_pid: active.logger.as_ref().and_then(LoggerHandle::pid),
                output_path: active
                    .logger
                    .as_ref()
                    .map(|logger| logger.output_path().to_path_buf()),
                logger_attached: active.logger.is_some(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub phase: SessionPhase,
    pub rating_id: Option<RatingId>,
    pub session_id: Option<SessionId>,
    pub started_at: Option<DateTime<Utc>>,
    pub logger_pid: Option<u32>,
    pub output_path: Option<PathBuf>,
    pub logger_attached: bool,
}

impl Default for ControllerSnapshot {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            rating_id: None,
            session_id: None,
            started_at: None,
            logger_pid: None,
            output_path: None,
            logger_attached: false,
        }
    }
}
