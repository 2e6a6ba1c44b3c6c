//! Daily readiness rating models.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RatingId = i64;

pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 10;

/// The six subjective scores captured by the daily check-in.
///
/// Scores are plain integers so values coming from a console or a remote row
/// can be represented before they are validated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingScores {
    pub fatigue: i64,
    pub motivation: i64,
    pub focus: i64,
    pub mood: i64,
    pub stress: i64,
    pub sleep_quality: i64,
}

impl RatingScores {
    pub fn fields(&self) -> [(&'static str, i64); 6] {
        [
            ("fatigue", self.fatigue),
            ("motivation", self.motivation),
            ("focus", self.focus),
            ("mood", self.mood),
            ("stress", self.stress),
            ("sleep_quality", self.sleep_quality),
        ]
    }

    /// Rejects any score outside `SCORE_MIN..=SCORE_MAX`, naming the first offender.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.fields() {
            if !(SCORE_MIN..=SCORE_MAX).contains(&value) {
                bail!("{name} must be between {SCORE_MIN} and {SCORE_MAX}, got {value}");
            }
        }
        Ok(())
    }
}

impl Default for RatingScores {
    fn default() -> Self {
        Self {
            fatigue: 5,
            motivation: 5,
            focus: 5,
            mood: 5,
            stress: 5,
            sleep_quality: 5,
        }
    }
}

/// Input for an upsert keyed by `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRating {
    pub date: NaiveDate,
    pub scores: RatingScores,
    pub note: Option<String>,
}

/// A stored rating row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadinessRating {
    pub id: RatingId,
    pub date: NaiveDate,
    pub scores: RatingScores,
    pub note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        Ok(date) => Ok(date),
        Err(err) => bail!("malformed date '{value}' (expected YYYY-MM-DD): {err}"),
    }
}
