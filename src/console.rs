//! Line-oriented operator console hosting the session controller.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use log::warn;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    error::ControllerError,
    models::{parse_date, RatingScores},
    session::{SessionController, SessionPhase},
};

const HELP: &str = "\
Commands:
  rate [YYYY-MM-DD] <fatigue> <motivation> <focus> <mood> <stress> <sleep_quality> [note...]
      scores are 0-10 (fatigue: 0=fresh 10=exhausted, stress: 0=relaxed 10=stressed)
  start               start a focus session for the saved rating
  stop                stop the active focus session
  status              show the current session state
  sleep [YYYY-MM-DD]  show the synced sleep score (default: yesterday)
  help                show this help
  quit                leave the console";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Rate {
        date: Option<NaiveDate>,
        scores: RatingScores,
        note: Option<String>,
    },
    Start,
    Stop,
    Status,
    Sleep(Option<NaiveDate>),
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(String),
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, ControllerError> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(ConsoleCommand::Empty);
    };
    let rest: Vec<&str> = tokens.collect();

    match verb.to_ascii_lowercase().as_str() {
        "rate" | "save" => parse_rate(&rest),
        "start" => Ok(ConsoleCommand::Start),
        "stop" => Ok(ConsoleCommand::Stop),
        "status" => Ok(ConsoleCommand::Status),
        "sleep" => match rest.first() {
            Some(day) => parse_date(day)
                .map(|day| ConsoleCommand::Sleep(Some(day)))
                .map_err(ControllerError::validation),
            None => Ok(ConsoleCommand::Sleep(None)),
        },
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(ControllerError::Validation(format!(
            "unknown command '{other}' (try 'help')"
        ))),
    }
}

/// A leading token with an inner `-` is a date; `-1` stays a (bad) score.
fn parse_rate(args: &[&str]) -> Result<ConsoleCommand, ControllerError> {
    let (date, args) = match args.first() {
        Some(first) if first.find('-').is_some_and(|idx| idx > 0) => (
            Some(parse_date(first).map_err(ControllerError::validation)?),
            &args[1..],
        ),
        _ => (None, args),
    };

    if args.len() < 6 {
        return Err(ControllerError::Validation(format!(
            "expected six scores (fatigue motivation focus mood stress sleep_quality), got {}",
            args.len()
        )));
    }

    let mut values = [0i64; 6];
    for (slot, raw) in values.iter_mut().zip(args) {
        *slot = raw.parse().map_err(|_| {
            ControllerError::Validation(format!("score '{raw}' is not a whole number"))
        })?;
    }
    let [fatigue, motivation, focus, mood, stress, sleep_quality] = values;

    let note = args[6..].join(" ");
    Ok(ConsoleCommand::Rate {
        date,
        scores: RatingScores {
            fatigue,
            motivation,
            focus,
            mood,
            stress,
            sleep_quality,
        },
        note: Some(note).filter(|note| !note.is_empty()),
    })
}

pub async fn execute(
    controller: &SessionController,
    command: ConsoleCommand,
    today: NaiveDate,
) -> Outcome {
    let reply = match command {
        ConsoleCommand::Empty => return Outcome::Reply(String::new()),
        ConsoleCommand::Quit => return Outcome::Quit,
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Rate { date, scores, note } => {
            let date = date.unwrap_or(today);
            match controller.save_rating(date, scores, note).await {
                Ok(_) => format!(
                    "✅ Readiness for {date} saved successfully! You can now start your session."
                ),
                Err(err) => format!("❌ Failed to save readiness: {err}"),
            }
        }
        ConsoleCommand::Start => match controller.snapshot().await.rating_id {
            None => {
                "Please complete and save your readiness check-in before starting.".to_string()
            }
            Some(rating_id) => match controller.start_session(rating_id).await {
                Ok(session_id) => format!("🧠 Session {session_id} started"),
                Err(err @ ControllerError::ProcessSpawn { .. }) => format!(
                    "⚠️ {err}\n   The session record is open without a logger. Run 'stop' to close it."
                ),
                Err(err) => format!("❌ Failed to start session: {err}"),
            },
        },
        ConsoleCommand::Stop => match controller.stop_session().await {
            Ok(session) => match session.ended_at {
                Some(ended_at) => format!("✅ Session {} stopped at {ended_at}", session.id),
                None => format!("✅ Session {} stopped", session.id),
            },
            Err(err @ ControllerError::ProcessSignal { .. }) => {
                format!("⚠️ Session closed, but {err}")
            }
            Err(err) => format!("❌ Failed to stop session: {err}"),
        },
        ConsoleCommand::Status => render_status(controller).await,
        ConsoleCommand::Sleep(day) => {
            let day = day.unwrap_or_else(|| today.pred_opt().unwrap_or(today));
            render_sleep(controller, day).await
        }
    };
    Outcome::Reply(reply)
}

async fn render_status(controller: &SessionController) -> String {
    let snapshot = controller.snapshot().await;
    match snapshot.phase {
        SessionPhase::Idle => "Idle: no readiness rating saved yet.".to_string(),
        SessionPhase::Ready => format!(
            "Ready: rating {} saved, no active session.",
            snapshot.rating_id.unwrap_or_default()
        ),
        SessionPhase::Active => {
            let session_id = snapshot.session_id.unwrap_or_default();
            let started = snapshot
                .started_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default();
            let logger = match (snapshot.logger_pid, snapshot.output_path) {
                (Some(pid), Some(path)) => format!("logger pid {pid} writing {}", path.display()),
                _ if snapshot.logger_attached => "logger attached".to_string(),
                _ => "no logger attached (stop the session to close it)".to_string(),
            };
            format!("Active: session {session_id} since {started}, {logger}.")
        }
    }
}

async fn render_sleep(controller: &SessionController, day: NaiveDate) -> String {
    match controller.sleep_score(day).await {
        Ok(Some(score)) => format!("Oura sleep score for {day}: {score}"),
        Ok(None) => "Oura data not available.".to_string(),
        Err(err) => {
            warn!("Sleep score lookup failed: {err}");
            "Oura data not available.".to_string()
        }
    }
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run(controller: SessionController) -> Result<()> {
    let today = Local::now().date_naive();
    println!("🧠 Brainplaner – Readiness & Focus Session");
    println!("Date: {today}  (store: {})", controller.store_description());
    if let Some(yesterday) = today.pred_opt() {
        println!("{}", render_sleep(&controller, yesterday).await);
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let today = Local::now().date_naive();
        let outcome = match parse_command(&line) {
            Ok(command) => execute(&controller, command, today).await,
            Err(err) => Outcome::Reply(format!("❌ {err}")),
        };
        match outcome {
            Outcome::Quit => break,
            Outcome::Reply(reply) if reply.is_empty() => {}
            Outcome::Reply(reply) => println!("{reply}"),
        }
    }

    let snapshot = controller.snapshot().await;
    if let (SessionPhase::Active, Some(session_id)) = (snapshot.phase, snapshot.session_id) {
        warn!("Leaving with session {session_id} still open; its logger keeps running unmanaged");
        println!("⚠️ Session {session_id} is still open and its logger keeps running.");
    }
    Ok(())
}
