use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RatingId;

pub type SessionId = String;

pub const DEFAULT_DEVICE: &str = "computer";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSession {
    pub started_at: DateTime<Utc>,
    pub rating_id: Option<RatingId>,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rating_id: Option<RatingId>,
    pub device: String,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}
