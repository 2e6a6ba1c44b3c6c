//! Hosted store backed by Supabase's PostgREST API.
//!
//! Tables mirror the local schema: `subjective_daily_ratings` (unique on
//! `date`), `sessions` and the externally synced `oura_daily_sleep`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client, RequestBuilder, Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::helpers::{format_day, normalize_note};
use crate::models::{
    parse_date, NewRating, NewSession, RatingId, RatingScores, ReadinessRating, Session,
};

use super::RatingsStore;

const RATINGS_TABLE: &str = "subjective_daily_ratings";
const SESSIONS_TABLE: &str = "sessions";
const SLEEP_TABLE: &str = "oura_daily_sleep";

const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";
const PREFER_RETURN: &str = "return=representation";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RatingRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    date: String,
    fatigue: i64,
    motivation: i64,
    focus: i64,
    mood: i64,
    stress: i64,
    sleep_quality: i64,
    #[serde(default)]
    comment: Option<String>,
}

impl RatingRow {
    fn from_new(rating: &NewRating) -> Self {
        let scores = rating.scores;
        Self {
            id: None,
            date: format_day(rating.date),
            fatigue: scores.fatigue,
            motivation: scores.motivation,
            focus: scores.focus,
            mood: scores.mood,
            stress: scores.stress,
            sleep_quality: scores.sleep_quality,
            comment: normalize_note(rating.note.as_deref()),
        }
    }

    fn into_rating(self) -> Result<ReadinessRating> {
        let id = self
            .id
            .ok_or_else(|| anyhow!("rating row for {} has no id", self.date))?;
        Ok(ReadinessRating {
            id,
            date: parse_date(&self.date)?,
            scores: RatingScores {
                fatigue: self.fatigue,
                motivation: self.motivation,
                focus: self.focus,
                mood: self.mood,
                stress: self.stress,
                sleep_quality: self.sleep_quality,
            },
            note: self.comment,
            updated_at: None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct NewSessionRow<'a> {
    session_start: String,
    form_id: Option<RatingId>,
    device: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionRow {
    id: Value,
    session_start: String,
    #[serde(default)]
    session_end: Option<String>,
    #[serde(default)]
    form_id: Option<RatingId>,
    #[serde(default)]
    device: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let id = match self.id {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            other => bail!("unexpected session id {other}"),
        };
        Ok(Session {
            id,
            started_at: parse_remote_timestamp(&self.session_start)?,
            ended_at: self
                .session_end
                .as_deref()
                .map(parse_remote_timestamp)
                .transpose()?,
            rating_id: self.form_id,
            device: self.device.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SleepRow {
    sleep_score: Option<i64>,
}

/// `timestamptz` columns come back with an offset; plain `timestamp`
/// columns do not and are read as UTC.
fn parse_remote_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid timestamp '{value}'"))
}

async fn check_response(resp: Response) -> Result<Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("supabase returned {}: {}", status.as_u16(), body.trim());
    }
    Ok(resp)
}

fn first_row<T>(rows: Vec<T>, what: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| anyhow!("supabase returned no rows for {what}"))
}

pub struct SupabaseStore {
    client: Client,
    base_url: String,
}

impl SupabaseStore {
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() || api_key.trim().is_empty() {
            bail!("supabase url and key are both required");
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).context("supabase key is not a valid header value")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .context("supabase key is not a valid header value")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: url.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Upserts on the `date` key and asks for the stored row back.
    fn upsert_rating_request(&self, rating: &NewRating) -> RequestBuilder {
        self.client
            .post(self.table_url(RATINGS_TABLE))
            .query(&[("on_conflict", "date")])
            .header("Prefer", PREFER_UPSERT)
            .json(&[RatingRow::from_new(rating)])
    }

    fn insert_session_request(&self, session: &NewSession) -> RequestBuilder {
        let row = NewSessionRow {
            session_start: session.started_at.to_rfc3339(),
            form_id: session.rating_id,
            device: &session.device,
        };
        self.client
            .post(self.table_url(SESSIONS_TABLE))
            .header("Prefer", PREFER_RETURN)
            .json(&[row])
    }

    fn close_session_request(&self, session_id: &str, ended_at: DateTime<Utc>) -> RequestBuilder {
        self.client
            .patch(self.table_url(SESSIONS_TABLE))
            .query(&[("id", format!("eq.{session_id}"))])
            .header("Prefer", PREFER_RETURN)
            .json(&serde_json::json!({ "session_end": ended_at.to_rfc3339() }))
    }

    async fn fetch<T>(&self, request: RequestBuilder, what: &str) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!("supabase request: {what}");
        let resp = request
            .send()
            .await
            .with_context(|| format!("supabase request failed: {what}"))?;
        let resp = check_response(resp).await?;
        resp.json::<Vec<T>>()
            .await
            .with_context(|| format!("failed to decode supabase response: {what}"))
    }
}

#[async_trait]
impl RatingsStore for SupabaseStore {
    fn describe(&self) -> String {
        format!("supabase:{}", self.base_url)
    }

    async fn upsert_rating(&self, rating: &NewRating) -> Result<RatingId> {
        let request = self.upsert_rating_request(rating);
        let rows: Vec<RatingRow> = self.fetch(request, "upsert rating").await?;
        first_row(rows, "upsert rating")?
            .id
            .ok_or_else(|| anyhow!("upserted rating has no id"))
    }

    async fn get_rating(&self, date: NaiveDate) -> Result<Option<ReadinessRating>> {
        let request = self.client.get(self.table_url(RATINGS_TABLE)).query(&[
            ("select", "*".to_string()),
            ("date", format!("eq.{}", format_day(date))),
        ]);
        let rows: Vec<RatingRow> = self.fetch(request, "get rating").await?;
        rows.into_iter().next().map(RatingRow::into_rating).transpose()
    }

    async fn insert_session(&self, session: &NewSession) -> Result<Session> {
        let request = self.insert_session_request(session);
        let rows: Vec<SessionRow> = self.fetch(request, "insert session").await?;
        first_row(rows, "insert session")?.into_session()
    }

    async fn close_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<Session> {
        let request = self.close_session_request(session_id, ended_at);
        let rows: Vec<SessionRow> = self.fetch(request, "close session").await?;
        first_row(rows, &format!("session {session_id}"))?.into_session()
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let request = self.client.get(self.table_url(SESSIONS_TABLE)).query(&[
            ("select", "*".to_string()),
            ("id", format!("eq.{session_id}")),
        ]);
        let rows: Vec<SessionRow> = self.fetch(request, "get session").await?;
        rows.into_iter().next().map(SessionRow::into_session).transpose()
    }

    async fn list_open_sessions(&self) -> Result<Vec<Session>> {
        let request = self.client.get(self.table_url(SESSIONS_TABLE)).query(&[
            ("select", "*"),
            ("session_end", "is.null"),
            ("order", "session_start.desc"),
        ]);
        let rows: Vec<SessionRow> = self.fetch(request, "list open sessions").await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    async fn sleep_score(&self, day: NaiveDate) -> Result<Option<i64>> {
        let request = self.client.get(self.table_url(SLEEP_TABLE)).query(&[
            ("select", "sleep_score".to_string()),
            ("day", format!("eq.{}", format_day(day))),
        ]);
        let rows: Vec<SleepRow> = self.fetch(request, "sleep score").await?;
        Ok(rows.into_iter().next().and_then(|row| row.sleep_score))
    }
}
