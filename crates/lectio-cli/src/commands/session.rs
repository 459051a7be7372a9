//! Reading session log commands.

use clap::Subcommand;
use lectio_core::storage::{Config, SessionInput, Store};
use lectio_core::streak;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Append a reading session and refresh the student's aggregates
    Log {
        /// Student ID
        student_id: String,
        /// Minutes read
        #[arg(long)]
        minutes: u32,
        /// Calendar day (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Book reference
        #[arg(long)]
        book: Option<String>,
        /// Target duration in minutes; defaults to the completion threshold
        #[arg(long)]
        target: Option<u32>,
    },
    /// List a student's sessions
    List {
        /// Student ID
        student_id: String,
    },
}

pub fn run(action: SessionAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open()?;
    let config = Config::load()?;
    let today = chrono::Local::now().date_naive();

    match action {
        SessionAction::Log {
            student_id,
            minutes,
            date,
            book,
            target,
        } => {
            let date = match date {
                Some(raw) => raw.parse()?,
                None => today,
            };
            let threshold = config.reading.completion_threshold_min;
            let input = SessionInput {
                date,
                duration_min: minutes,
                book_id: book,
                started_at: chrono::Utc::now(),
                target_duration_min: target.unwrap_or(threshold),
            };
            let session_id = store.record_session(&student_id, &input, threshold)?;
            println!("Session recorded: {session_id}");

            // Keep the cached aggregates consistent with the log.
            let summary = streak::recompute_student(&store, &student_id, today)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        SessionAction::List { student_id } => {
            let sessions = store.list_sessions(&student_id)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
    }
    Ok(())
}
