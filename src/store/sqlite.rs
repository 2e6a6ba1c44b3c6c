use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::Database;
use crate::models::{NewRating, NewSession, RatingId, ReadinessRating, Session};

use super::RatingsStore;

#[async_trait]
impl RatingsStore for Database {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path().display())
    }

    async fn upsert_rating(&self, rating: &NewRating) -> Result<RatingId> {
        Database::upsert_rating(self, rating).await
    }

    async fn get_rating(&self, date: NaiveDate) -> Result<Option<ReadinessRating>> {
        Database::get_rating(self, date).await
    }

    async fn insert_session(&self, session: &NewSession) -> Result<Session> {
        Database::insert_session(self, session).await
    }

    async fn close_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<Session> {
        Database::close_session(self, session_id, ended_at).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Database::get_session(self, session_id).await
    }

    async fn list_open_sessions(&self) -> Result<Vec<Session>> {
        Database::list_open_sessions(self).await
    }

    async fn sleep_score(&self, day: NaiveDate) -> Result<Option<i64>> {
        Database::sleep_score(self, day).await
    }
}
