//! Family battle health scan, repair and drift commands.

use clap::Subcommand;
use lectio_core::battle::{repair, scanner};
use lectio_core::storage::{Config, Store};

#[derive(Subcommand)]
pub enum BattleAction {
    /// Scan every family record against the issue taxonomy (read-only)
    Scan,
    /// Repair families; with no ids, repairs everything the scan flags
    Repair {
        /// Family ids to repair
        ids: Vec<String>,
    },
    /// Render the repair script without executing anything
    Script {
        /// Family ids to include; with no ids, everything the scan flags
        ids: Vec<String>,
    },
    /// Report students whose battle opt-in disagrees with their family
    Drift,
}

pub fn run(action: BattleAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open()?;
    let config = Config::load()?;
    let concurrency = config.bulk.concurrency;

    match action {
        BattleAction::Scan => {
            let report = scanner::scan_all(&store, concurrency)?;
            println!("{}", report.message());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        BattleAction::Repair { ids } => {
            let ids = resolve_ids(&store, ids, concurrency)?;
            let report = repair::repair_families(&store, &ids, &config.operator.name, concurrency)?;
            println!("{}", report.message());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        BattleAction::Script { ids } => {
            let ids = resolve_ids(&store, ids, concurrency)?;
            let script =
                repair::generate_repair_script(&store, &ids, &config.operator.name, concurrency)?;
            println!("{script}");
        }
        BattleAction::Drift => {
            let drift = scanner::scan_enrollment_drift(&store)?;
            if drift.is_empty() {
                println!("No enrollment drift found.");
            } else {
                println!("{} student(s) with enrollment drift (report-only):", drift.len());
            }
            println!("{}", serde_json::to_string_pretty(&drift)?);
        }
    }
    Ok(())
}

fn resolve_ids(
    store: &Store,
    ids: Vec<String>,
    concurrency: usize,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    if ids.is_empty() {
        Ok(scanner::scan_all(store, concurrency)?.family_ids())
    } else {
        Ok(ids)
    }
}
