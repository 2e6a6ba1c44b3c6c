use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime},
    Database,
};
use crate::models::{NewSession, Session};

const SESSION_COLUMNS: &str = "id, session_start, session_end, form_id, device";

fn row_to_session(row: &Row) -> Result<Session> {
    let started_at: String = row.get("session_start")?;
    let ended_at: Option<String> = row.get("session_end")?;

    Ok(Session {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "session_start")?,
        ended_at: parse_optional_datetime(ended_at, "session_end")?,
        rating_id: row.get("form_id")?,
        device: row.get("device")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &NewSession) -> Result<Session> {
        let record = session.clone();
        self.execute(move |conn| {
            let session = Session {
                id: Uuid::new_v4().to_string(),
                started_at: record.started_at,
                ended_at: None,
                rating_id: record.rating_id,
                device: record.device,
            };
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO sessions (id, session_start, session_end, form_id, device, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?5)",
                params![
                    session.id,
                    session.started_at.to_rfc3339(),
                    session.rating_id,
                    session.device,
                    now,
                ],
            )?;
            Ok(session)
        })
        .await
    }

    pub async fn close_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Session> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET session_end = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![ended_at.to_rfc3339(), Utc::now().to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session {session_id} not found"));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let session = stmt.query_row(params![session_id], |row| Ok(row_to_session(row)))??;
            Ok(session)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    pub async fn list_open_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 WHERE session_end IS NULL
                 ORDER BY session_start DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }
}
