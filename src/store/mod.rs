//! Persistence seam for ratings and session records.
//!
//! The controller only sees [`RatingsStore`]; the local SQLite [`Database`]
//! and the hosted [`SupabaseStore`] both implement it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{NewRating, NewSession, RatingId, ReadinessRating, Session};

mod sqlite;
pub mod supabase;

pub use supabase::SupabaseStore;

#[async_trait]
pub trait RatingsStore: Send + Sync {
    /// Human readable backend name for logs and status output.
    fn describe(&self) -> String;

    async fn upsert_rating(&self, rating: &NewRating) -> Result<RatingId>;

    async fn get_rating(&self, date: NaiveDate) -> Result<Option<ReadinessRating>>;

    /// Creates an open session; the store assigns the id.
    async fn insert_session(&self, session: &NewSession) -> Result<Session>;

    /// Sets the end timestamp. Fails when no session has `session_id`.
    async fn close_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<Session>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn list_open_sessions(&self) -> Result<Vec<Session>>;

    async fn sleep_score(&self, day: NaiveDate) -> Result<Option<i64>>;
}
