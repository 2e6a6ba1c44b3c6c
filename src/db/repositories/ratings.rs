use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{format_day, normalize_note, parse_day, parse_datetime},
    Database,
};
use crate::models::{NewRating, RatingId, RatingScores, ReadinessRating};

fn row_to_rating(row: &Row) -> Result<ReadinessRating> {
    let date: String = row.get("date")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(ReadinessRating {
        id: row.get("id")?,
        date: parse_day(&date, "date")?,
        scores: RatingScores {
            fatigue: row.get("fatigue")?,
            motivation: row.get("motivation")?,
            focus: row.get("focus")?,
            mood: row.get("mood")?,
            stress: row.get("stress")?,
            sleep_quality: row.get("sleep_quality")?,
        },
        note: row.get("comment")?,
        updated_at: Some(parse_datetime(&updated_at, "updated_at")?),
    })
}

impl Database {
    /// Insert or replace the rating for `rating.date`. The row id survives
    /// replacement, so sessions referencing it stay valid.
    pub async fn upsert_rating(&self, rating: &NewRating) -> Result<RatingId> {
        let record = rating.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let scores = record.scores;
            let id = conn
                .query_row(
                    "INSERT INTO subjective_daily_ratings
                        (date, fatigue, motivation, focus, mood, stress, sleep_quality, comment, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                     ON CONFLICT(date) DO UPDATE SET
                        fatigue = excluded.fatigue,
                        motivation = excluded.motivation,
                        focus = excluded.focus,
                        mood = excluded.mood,
                        stress = excluded.stress,
                        sleep_quality = excluded.sleep_quality,
                        comment = excluded.comment,
                        updated_at = excluded.updated_at
                     RETURNING id",
                    params![
                        format_day(record.date),
                        scores.fatigue,
                        scores.motivation,
                        scores.focus,
                        scores.mood,
                        scores.stress,
                        scores.sleep_quality,
                        normalize_note(record.note.as_deref()),
                        now,
                    ],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to upsert rating for {}", record.date))?;
            Ok(id)
        })
        .await
    }

    pub async fn get_rating(&self, date: NaiveDate) -> Result<Option<ReadinessRating>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, date, fatigue, motivation, focus, mood, stress, sleep_quality, comment, updated_at
                 FROM subjective_daily_ratings
                 WHERE date = ?1",
            )?;

            let rating = stmt
                .query_row(params![format_day(date)], |row| Ok(row_to_rating(row)))
                .optional()?
                .transpose()?;
            Ok(rating)
        })
        .await
    }
}
