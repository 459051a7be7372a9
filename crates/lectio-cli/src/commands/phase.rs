//! Program phase lifecycle commands.

use clap::Subcommand;
use lectio_core::phase::{PhaseMachine, ProgramPhase};
use lectio_core::storage::Store;

#[derive(Subcommand)]
pub enum PhaseAction {
    /// Current phase and academic year
    Show,
    /// Move to the next phase on the yearly cycle
    Transition {
        /// Target phase (SETUP, TEACHER_SELECTION, ACTIVE, VOTING, RESULTS)
        target: String,
    },
    /// Manual override: park the program in CLOSED
    Close,
    /// Manual override: leave CLOSED and restart at SETUP
    Reopen,
    /// Year rollover: RESULTS -> SETUP -> TEACHER_SELECTION, clearing
    /// per-year student data
    Rollover,
}

pub fn run(action: PhaseAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open()?;
    let machine = PhaseMachine::new(&store);

    match action {
        PhaseAction::Show => {
            let state = machine.current()?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        PhaseAction::Transition { target } => {
            let target = ProgramPhase::parse(&target)
                .ok_or_else(|| format!("unknown phase '{target}'"))?;
            let outcome = machine.transition(target)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        PhaseAction::Close => {
            let outcome = machine.force_close()?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        PhaseAction::Reopen => {
            let outcome = machine.reopen()?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        PhaseAction::Rollover => {
            let report = machine.rollover()?;
            println!("{}", report.message());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
