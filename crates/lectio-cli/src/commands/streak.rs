//! Streak recomputation commands.

use clap::Subcommand;
use lectio_core::storage::{Config, Store};
use lectio_core::streak;

#[derive(Subcommand)]
pub enum StreakAction {
    /// Re-derive one student's aggregates from their session log
    Recompute {
        /// Student ID
        student_id: String,
    },
    /// Re-derive aggregates for every student
    MigrateAll,
}

pub fn run(action: StreakAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open()?;
    let config = Config::load()?;
    let today = chrono::Local::now().date_naive();

    match action {
        StreakAction::Recompute { student_id } => {
            let summary = streak::recompute_student(&store, &student_id, today)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        StreakAction::MigrateAll => {
            let report = streak::migrate_all_students(&store, today, config.bulk.concurrency)?;
            println!("{}", report.message());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
