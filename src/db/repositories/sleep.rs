use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use crate::db::{helpers::format_day, Database};

impl Database {
    /// Sleep score synced for `day`, if any.
    pub async fn sleep_score(&self, day: NaiveDate) -> Result<Option<i64>> {
        self.execute(move |conn| {
            let score = conn
                .query_row(
                    "SELECT sleep_score FROM oura_daily_sleep WHERE day = ?1",
                    params![format_day(day)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(score)
        })
        .await
    }
}
