use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::{
    error::{ControllerError, ControllerResult},
    logger::{LoggerHandle, LoggerLauncher},
    models::{NewRating, NewSession, RatingId, RatingScores, Session, SessionId},
    store::RatingsStore,
};

use super::state::{ActiveSession, ControllerSnapshot, ControllerState};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Drives the rating → session → stop cycle and keeps the session record and
/// its logger process correlated by session id.
///
/// The state lock is held for the whole of each operation, so calls made
/// through clones of the same controller are applied one at a time.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<ControllerState>>,
    store: Arc<dyn RatingsStore>,
    launcher: Arc<dyn LoggerLauncher>,
    device: String,
    clock: Clock,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn RatingsStore>,
        launcher: Arc<dyn LoggerLauncher>,
        device: impl Into<String>,
    ) -> Self {
        Self::with_clock(store, launcher, device, Arc::new(Utc::now))
    }

    pub fn with_clock(
        store: Arc<dyn RatingsStore>,
        launcher: Arc<dyn LoggerLauncher>,
        device: impl Into<String>,
        clock: Clock,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState::default())),
            store,
            launcher,
            device: device.into(),
            clock,
        }
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn save_rating(
        &self,
        date: NaiveDate,
        scores: RatingScores,
        note: Option<String>,
    ) -> ControllerResult<RatingId> {
        let mut state = self.state.lock().await;
        if let ControllerState::Active(_) = &*state {
            return Err(ControllerError::precondition(
                "save a rating",
                state.describe(),
            ));
        }

        scores.validate().map_err(ControllerError::validation)?;

        let rating = NewRating { date, scores, note };
        let rating_id = self.store.upsert_rating(&rating).await.map_err(|err| {
            error!("Failed to save rating for {date}: {err:#}");
            ControllerError::store(err)
        })?;

        *state = ControllerState::Ready { rating_id };
        info!("Saved rating {rating_id} for {date}");
        Ok(rating_id)
    }

    /// Opens a session record, then launches its logger.
    ///
    /// When the launch fails the record stays open and the controller is
    /// Active without a logger; the error tells the operator to stop the
    /// session by hand.
    pub async fn start_session(&self, rating_id: RatingId) -> ControllerResult<SessionId> {
        let mut state = self.state.lock().await;
        let saved_rating_id = match &*state {
            ControllerState::Ready { rating_id } => *rating_id,
            other => {
                return Err(ControllerError::precondition(
                    "start a session",
                    other.describe(),
                ))
            }
        };
        if rating_id != saved_rating_id {
            return Err(ControllerError::Validation(format!(
                "rating {rating_id} is not the saved readiness rating ({saved_rating_id})"
            )));
        }

        let new_session = NewSession {
            started_at: (self.clock)(),
            rating_id: Some(rating_id),
            device: self.device.clone(),
        };
        let session = self
            .store
            .insert_session(&new_session)
            .await
            .map_err(|err| {
                error!("Failed to create session record: {err:#}");
                ControllerError::store(err)
            })?;
        let session_id = session.id.clone();

        let launched = self.launch_logger(&session_id);
        let (logger, result) = match launched {
            Ok(handle) => (Some(handle), Ok(session_id.clone())),
            Err(err) => {
                warn!(
                    "Session {session_id} is open in the store but its logger did not start; stop it manually: {err:#}"
                );
                let reason =
                    format!("{err:#} (the session is still open; stop it to close the record)");
                (
                    None,
                    Err(ControllerError::ProcessSpawn {
                        session_id: session_id.clone(),
                        reason,
                    }),
                )
            }
        };

        *state = ControllerState::Active(ActiveSession {
            session_id,
            rating_id,
            started_at: session.started_at,
            logger,
        });
        info!("Session {} started at {}", session.id, session.started_at);
        result
    }

    fn launch_logger(&self, session_id: &str) -> anyhow::Result<LoggerHandle> {
        let output_path = self.launcher.output_path(session_id)?;
        let process = self.launcher.launch(session_id, &output_path)?;
        Ok(LoggerHandle::new(session_id.to_string(), output_path, process))
    }

    /// Closes the active record, interrupts its logger without waiting, and
    /// returns to Ready.
    ///
    /// A store failure leaves everything Active so the stop can be retried.
    /// Once the record is closed the controller is Ready even if the
    /// interrupt fails; that failure is still returned.
    pub async fn stop_session(&self) -> ControllerResult<Session> {
        let mut state = self.state.lock().await;
        let (session_id, rating_id, started_at) = match &*state {
            ControllerState::Active(active) => (
                active.session_id.clone(),
                active.rating_id,
                active.started_at,
            ),
            other => {
                return Err(ControllerError::precondition(
                    "stop a session",
                    other.describe(),
                ))
            }
        };

        let ended_at = end_timestamp(started_at, (self.clock)());
        let session = self
            .store
            .close_session(&session_id, ended_at)
            .await
            .map_err(|err| {
                error!("Failed to close session {session_id}: {err:#}");
                ControllerError::store(err)
            })?;

        let logger = match &mut *state {
            ControllerState::Active(active) => active.logger.take(),
            _ => None,
        };
        if let Some(handle) = &logger {
            debug_assert_eq!(handle.session_id(), session_id);
        }
        *state = ControllerState::Ready { rating_id };
        info!("Session {session_id} stopped at {ended_at}");

        match logger {
            Some(handle) => handle.interrupt().map_err(|err| {
                warn!("Logger for session {session_id} could not be interrupted: {err:#}");
                ControllerError::ProcessSignal {
                    session_id: session_id.clone(),
                    reason: format!("{err:#}"),
                }
            })?,
            None => warn!("No logger was attached to session {session_id}"),
        }

        Ok(session)
    }

    pub async fn sleep_score(&self, day: NaiveDate) -> ControllerResult<Option<i64>> {
        self.store
            .sleep_score(day)
            .await
            .map_err(ControllerError::store)
    }

    pub fn store_description(&self) -> String {
        self.store.describe()
    }
}

/// End timestamps are strictly after the start even if the clock stepped back.
fn end_timestamp(started_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > started_at {
        now
    } else {
        started_at + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
    };

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        db::Database, logger::LoggerProcess, models::ReadinessRating, session::SessionPhase,
    };

    #[derive(Debug)]
    struct FakeProcess {
        pid: u32,
        interrupts: Arc<AtomicUsize>,
        fail_interrupt: bool,
    }

    impl LoggerProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn interrupt(self: Box<Self>) -> Result<()> {
            if self.fail_interrupt {
                bail!("process {} already exited", self.pid);
            }
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeLauncher {
        logs_dir: PathBuf,
        launches: StdMutex<Vec<(String, PathBuf)>>,
        interrupts: Arc<AtomicUsize>,
        fail_launch: AtomicBool,
        fail_interrupt: AtomicBool,
    }

    impl FakeLauncher {
        fn new(logs_dir: PathBuf) -> Self {
            Self {
                logs_dir,
                launches: StdMutex::new(Vec::new()),
                interrupts: Arc::new(AtomicUsize::new(0)),
                fail_launch: AtomicBool::new(false),
                fail_interrupt: AtomicBool::new(false),
            }
        }

        fn launches(&self) -> Vec<(String, PathBuf)> {
            self.launches.lock().unwrap().clone()
        }

        fn interrupts(&self) -> usize {
            self.interrupts.load(Ordering::SeqCst)
        }
    }

    impl LoggerLauncher for FakeLauncher {
        fn logs_dir(&self) -> &Path {
            &self.logs_dir
        }

        fn launch(&self, session_id: &str, output_path: &Path) -> Result<Box<dyn LoggerProcess>> {
            if self.fail_launch.load(Ordering::SeqCst) {
                bail!("logger executable not found");
            }
            let mut launches = self.launches.lock().unwrap();
            launches.push((session_id.to_string(), output_path.to_path_buf()));
            Ok(Box::new(FakeProcess {
                pid: 1000 + launches.len() as u32,
                interrupts: self.interrupts.clone(),
                fail_interrupt: self.fail_interrupt.load(Ordering::SeqCst),
            }))
        }
    }

    /// SQLite store whose calls can be made to fail one kind at a time.
    struct FlakyStore {
        db: Database,
        fail_upsert: AtomicBool,
        fail_insert: AtomicBool,
        fail_close: AtomicBool,
    }

    impl FlakyStore {
        fn new(db: Database) -> Self {
            Self {
                db,
                fail_upsert: AtomicBool::new(false),
                fail_insert: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
            }
        }
    }

    fn unavailable() -> anyhow::Error {
        anyhow!("connection refused")
    }

    #[async_trait]
    impl RatingsStore for FlakyStore {
        fn describe(&self) -> String {
            "flaky".into()
        }

        async fn upsert_rating(&self, rating: &NewRating) -> Result<RatingId> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.db.upsert_rating(rating).await
        }

        async fn get_rating(&self, date: NaiveDate) -> Result<Option<ReadinessRating>> {
            self.db.get_rating(date).await
        }

        async fn insert_session(&self, session: &NewSession) -> Result<Session> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.db.insert_session(session).await
        }

        async fn close_session(
            &self,
            session_id: &str,
            ended_at: DateTime<Utc>,
        ) -> Result<Session> {
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.db.close_session(session_id, ended_at).await
        }

        async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
            self.db.get_session(session_id).await
        }

        async fn list_open_sessions(&self) -> Result<Vec<Session>> {
            self.db.list_open_sessions().await
        }

        async fn sleep_score(&self, day: NaiveDate) -> Result<Option<i64>> {
            self.db.sleep_score(day).await
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<FlakyStore>,
        launcher: Arc<FakeLauncher>,
        now: Arc<StdMutex<DateTime<Utc>>>,
        controller: SessionController,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::new(dir.path().join("brainplaner.sqlite3")).unwrap();
            let store = Arc::new(FlakyStore::new(db));
            let launcher = Arc::new(FakeLauncher::new(dir.path().join("data").join("logs")));
            let now = Arc::new(StdMutex::new(
                DateTime::parse_from_rfc3339("2024-05-01T09:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ));
            let clock_now = now.clone();
            let controller = SessionController::with_clock(
                store.clone(),
                launcher.clone(),
                "computer",
                Arc::new(move || *clock_now.lock().unwrap()),
            );
            Self {
                _dir: dir,
                store,
                launcher,
                now,
                controller,
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now = *now + by;
        }

        async fn ready(&self) -> RatingId {
            self.controller
                .save_rating(day(), scenario_scores(), None)
                .await
                .unwrap()
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn scenario_scores() -> RatingScores {
        RatingScores {
            fatigue: 3,
            motivation: 7,
            focus: 6,
            mood: 8,
            stress: 2,
            sleep_quality: 9,
        }
    }

    #[tokio::test]
    async fn rating_session_and_stop_scenario() {
        let h = Harness::new();

        let rating_id = h
            .controller
            .save_rating(day(), scenario_scores(), Some("after a long walk".into()))
            .await
            .unwrap();
        let stored = h.store.get_rating(day()).await.unwrap().unwrap();
        assert_eq!(stored.id, rating_id);
        assert_eq!(stored.scores, scenario_scores());
        assert_eq!(stored.note.as_deref(), Some("after a long walk"));

        let session_id = h.controller.start_session(rating_id).await.unwrap();
        let open = h.store.list_open_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, session_id);
        assert_eq!(open[0].rating_id, Some(rating_id));
        assert_eq!(open[0].device, "computer");

        let launches = h.launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, session_id);
        assert_eq!(
            launches[0].1,
            h.launcher.logs_dir.join(format!("session_{session_id}.csv"))
        );

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert!(snapshot.logger_attached);
        assert_eq!(snapshot.session_id.as_deref(), Some(session_id.as_str()));

        h.advance(Duration::minutes(10));
        let closed = h.controller.stop_session().await.unwrap();
        let ended_at = closed.ended_at.unwrap();
        assert_eq!(ended_at - closed.started_at, Duration::minutes(10));
        assert_eq!(h.launcher.interrupts(), 1);

        let reloaded = h.store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(reloaded.ended_at, Some(ended_at));

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.rating_id, Some(rating_id));
        assert!(!snapshot.logger_attached);
    }

    #[tokio::test]
    async fn start_requires_a_saved_rating() {
        let h = Harness::new();

        let err = h.controller.start_session(1).await.unwrap_err();
        assert!(err.is_precondition(), "{err}");
        assert!(h.launcher.launches().is_empty());
        assert!(h.store.list_open_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_with_a_different_rating_is_rejected() {
        let h = Harness::new();
        let rating_id = h.ready().await;

        let err = h.controller.start_session(rating_id + 100).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)), "{err}");
        assert!(h.launcher.launches().is_empty());
        assert!(h.store.list_open_sessions().await.unwrap().is_empty());

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.rating_id, Some(rating_id));
    }

    #[tokio::test]
    async fn start_while_active_is_rejected() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.controller.start_session(rating_id).await.unwrap();

        let err = h.controller.start_session(rating_id).await.unwrap_err();
        assert!(err.is_precondition(), "{err}");
        assert_eq!(h.launcher.launches().len(), 1);
        assert_eq!(h.store.list_open_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_stop_is_a_precondition_error() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.controller.start_session(rating_id).await.unwrap();
        h.controller.stop_session().await.unwrap();

        let err = h.controller.stop_session().await.unwrap_err();
        assert!(err.is_precondition(), "{err}");
        assert_eq!(h.launcher.interrupts(), 1);
    }

    #[tokio::test]
    async fn stop_without_a_session_is_rejected_while_idle() {
        let h = Harness::new();
        let err = h.controller.stop_session().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Precondition {
                state: "no readiness rating has been saved",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_an_open_session_that_can_be_stopped() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.launcher.fail_launch.store(true, Ordering::SeqCst);

        let err = h.controller.start_session(rating_id).await.unwrap_err();
        let session_id = match err {
            ControllerError::ProcessSpawn { session_id, .. } => session_id,
            other => panic!("unexpected error {other}"),
        };

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert!(!snapshot.logger_attached);
        assert_eq!(snapshot.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(h.store.list_open_sessions().await.unwrap().len(), 1);

        h.advance(Duration::seconds(30));
        let closed = h.controller.stop_session().await.unwrap();
        assert_eq!(closed.id, session_id);
        assert!(closed.ended_at.is_some());
        assert!(h.store.list_open_sessions().await.unwrap().is_empty());
        assert_eq!(h.launcher.interrupts(), 0);
    }

    #[tokio::test]
    async fn invalid_scores_keep_the_controller_idle() {
        let h = Harness::new();
        let scores = RatingScores {
            focus: 11,
            ..scenario_scores()
        };

        let err = h.controller.save_rating(day(), scores, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)), "{err}");
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Idle);
        assert!(h.store.get_rating(day()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failure_on_save_keeps_the_controller_idle() {
        let h = Harness::new();
        h.store.fail_upsert.store(true, Ordering::SeqCst);

        let err = h
            .controller
            .save_rating(day(), scenario_scores(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::StoreUnavailable(_)), "{err}");
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn record_failure_on_start_launches_nothing() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.store.fail_insert.store(true, Ordering::SeqCst);

        let err = h.controller.start_session(rating_id).await.unwrap_err();
        assert!(matches!(err, ControllerError::StoreUnavailable(_)), "{err}");
        assert!(h.launcher.launches().is_empty());
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Ready);
    }

    #[tokio::test]
    async fn record_failure_on_stop_keeps_the_session_active() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.controller.start_session(rating_id).await.unwrap();
        h.store.fail_close.store(true, Ordering::SeqCst);

        let err = h.controller.stop_session().await.unwrap_err();
        assert!(matches!(err, ControllerError::StoreUnavailable(_)), "{err}");
        assert_eq!(h.launcher.interrupts(), 0);
        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert!(snapshot.logger_attached);

        h.store.fail_close.store(false, Ordering::SeqCst);
        h.controller.stop_session().await.unwrap();
        assert_eq!(h.launcher.interrupts(), 1);
    }

    #[tokio::test]
    async fn signal_failure_is_reported_after_the_record_is_closed() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.launcher.fail_interrupt.store(true, Ordering::SeqCst);
        let session_id = h.controller.start_session(rating_id).await.unwrap();

        let err = h.controller.stop_session().await.unwrap_err();
        assert!(matches!(err, ControllerError::ProcessSignal { .. }), "{err}");
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Ready);
        let session = h.store.get_session(&session_id).await.unwrap().unwrap();
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    async fn saving_a_rating_during_a_session_is_rejected() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.controller.start_session(rating_id).await.unwrap();

        let err = h
            .controller
            .save_rating(day(), RatingScores::default(), None)
            .await
            .unwrap_err();
        assert!(err.is_precondition(), "{err}");
        let stored = h.store.get_rating(day()).await.unwrap().unwrap();
        assert_eq!(stored.scores, scenario_scores());
    }

    #[tokio::test]
    async fn resaving_while_ready_keeps_the_same_rating_id() {
        let h = Harness::new();
        let first = h.ready().await;
        let second = h
            .controller
            .save_rating(day(), RatingScores::default(), Some("revised".into()))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(h.controller.snapshot().await.rating_id, Some(first));
    }

    #[tokio::test]
    async fn stop_uses_a_later_end_even_when_the_clock_does_not_move() {
        let h = Harness::new();
        let rating_id = h.ready().await;
        h.controller.start_session(rating_id).await.unwrap();

        let closed = h.controller.stop_session().await.unwrap();
        assert!(closed.ended_at.unwrap() > closed.started_at);
    }

    #[test]
    fn end_timestamp_never_precedes_start() {
        let start = Utc::now();
        assert_eq!(
            end_timestamp(start, start - Duration::seconds(5)),
            start + Duration::milliseconds(1)
        );
        let later = start + Duration::seconds(5);
        assert_eq!(end_timestamp(start, later), later);
    }
}
