//! Academic-year phase state machine.
//!
//! The program config record is the one piece of true global mutable
//! state in the system. Nothing writes the phase field directly; the
//! only mutators are [`PhaseMachine::transition`] (which validates the
//! requested edge against the allowed-transition table), the manual
//! close/reopen overrides, and [`PhaseMachine::rollover`] -- the
//! combined year-end action that gates the bulk clearing of per-year
//! student data.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::bulk::{BulkReport, UnitError};
use crate::error::{PhaseError, Result, ValidationError};
use crate::storage::Store;

/// Stage of the program within its yearly lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramPhase {
    Setup,
    TeacherSelection,
    Active,
    Voting,
    Results,
    /// Exceptional idle state, entered and left only via the manual
    /// override operations.
    Closed,
}

impl ProgramPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramPhase::Setup => "SETUP",
            ProgramPhase::TeacherSelection => "TEACHER_SELECTION",
            ProgramPhase::Active => "ACTIVE",
            ProgramPhase::Voting => "VOTING",
            ProgramPhase::Results => "RESULTS",
            ProgramPhase::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SETUP" => Some(ProgramPhase::Setup),
            "TEACHER_SELECTION" => Some(ProgramPhase::TeacherSelection),
            "ACTIVE" => Some(ProgramPhase::Active),
            "VOTING" => Some(ProgramPhase::Voting),
            "RESULTS" => Some(ProgramPhase::Results),
            "CLOSED" => Some(ProgramPhase::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProgramPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Academic-year label in "YYYY-YY" form, e.g. "2025-26".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcademicYear(String);

impl AcademicYear {
    pub fn new(label: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = label.split('-').collect();
        let [start, end] = parts.as_slice() else {
            return Err(ValidationError::InvalidAcademicYear(label.to_string()));
        };
        if start.len() != 4 || end.len() != 2 {
            return Err(ValidationError::InvalidAcademicYear(label.to_string()));
        }
        let start_year: u32 = start
            .parse()
            .map_err(|_| ValidationError::InvalidAcademicYear(label.to_string()))?;
        let end_year: u32 = end
            .parse()
            .map_err(|_| ValidationError::InvalidAcademicYear(label.to_string()))?;
        if (start_year + 1) % 100 != end_year {
            return Err(ValidationError::InvalidAcademicYear(label.to_string()));
        }
        Ok(Self(label.to_string()))
    }

    /// Build the label covering `today` per the tenant's calendar; the
    /// school year turns over in August.
    pub fn containing(today: NaiveDate) -> Self {
        let start = if today.month() >= 8 {
            today.year()
        } else {
            today.year() - 1
        };
        Self(format!("{}-{:02}", start, (start + 1) % 100))
    }

    pub fn starting_year(&self) -> i32 {
        self.0[..4].parse().unwrap_or(0)
    }

    /// The following academic year.
    pub fn next(&self) -> Self {
        let start = self.starting_year() + 1;
        Self(format!("{}-{:02}", start, (start + 1) % 100))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The singleton program config record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramState {
    pub phase: ProgramPhase,
    pub academic_year: AcademicYear,
}

/// The canonical forward cycle. CLOSED never appears here.
const FORWARD_EDGES: [(ProgramPhase, ProgramPhase); 5] = [
    (ProgramPhase::Setup, ProgramPhase::TeacherSelection),
    (ProgramPhase::TeacherSelection, ProgramPhase::Active),
    (ProgramPhase::Active, ProgramPhase::Voting),
    (ProgramPhase::Voting, ProgramPhase::Results),
    (ProgramPhase::Results, ProgramPhase::Setup),
];

/// True when `from -> to` is on the canonical cycle.
pub fn is_legal_transition(from: ProgramPhase, to: ProgramPhase) -> bool {
    FORWARD_EDGES.contains(&(from, to))
}

/// Outcome of a single phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub old_phase: ProgramPhase,
    pub new_phase: ProgramPhase,
    pub academic_year: AcademicYear,
}

/// Outcome of the year rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloverReport {
    pub old_year: AcademicYear,
    pub new_year: AcademicYear,
    /// Students whose per-year data was cleared.
    pub students_cleared: usize,
    /// Per-student failures; the rollover continues past them.
    pub errors: Vec<UnitError>,
}

impl RolloverReport {
    pub fn message(&self) -> String {
        if self.errors.is_empty() {
            format!(
                "Rolled over {} -> {}; cleared {} student record(s).",
                self.old_year, self.new_year, self.students_cleared
            )
        } else {
            format!(
                "Rolled over {} -> {}; cleared {} student record(s), {} failed.",
                self.old_year,
                self.new_year,
                self.students_cleared,
                self.errors.len()
            )
        }
    }
}

/// Per-school cap on teacher book selections for the new year: a school
/// may not select more titles than it did the year before. Schools with
/// no prior year are unconstrained.
pub fn selection_cap(prior_selections: Option<u32>, requested: u32) -> u32 {
    match prior_selections {
        Some(prior) => requested.min(prior),
        None => requested,
    }
}

/// The only gateway to the program phase field.
pub struct PhaseMachine<'a> {
    store: &'a Store,
}

impl<'a> PhaseMachine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Current phase and academic year.
    pub fn current(&self) -> Result<ProgramState> {
        self.store.get_program()
    }

    /// Execute one forward transition. Rejects every edge not in the
    /// allowed-transition table, including anything touching CLOSED.
    pub fn transition(&self, target: ProgramPhase) -> Result<TransitionOutcome> {
        let state = self.store.get_program()?;
        if state.phase == ProgramPhase::Closed || target == ProgramPhase::Closed {
            return Err(PhaseError::ClosedIsManualOnly.into());
        }
        if !is_legal_transition(state.phase, target) {
            return Err(PhaseError::IllegalTransition {
                from: state.phase.to_string(),
                to: target.to_string(),
            }
            .into());
        }

        self.store.set_program(&ProgramState {
            phase: target,
            academic_year: state.academic_year.clone(),
        })?;
        log::info!("phase transition: {} -> {}", state.phase, target);
        Ok(TransitionOutcome {
            old_phase: state.phase,
            new_phase: target,
            academic_year: state.academic_year,
        })
    }

    /// Manual override: park the program in CLOSED from any phase.
    pub fn force_close(&self) -> Result<TransitionOutcome> {
        let state = self.store.get_program()?;
        self.store.set_program(&ProgramState {
            phase: ProgramPhase::Closed,
            academic_year: state.academic_year.clone(),
        })?;
        log::warn!("phase manually closed from {}", state.phase);
        Ok(TransitionOutcome {
            old_phase: state.phase,
            new_phase: ProgramPhase::Closed,
            academic_year: state.academic_year,
        })
    }

    /// Manual override: leave CLOSED and restart the cycle at SETUP.
    pub fn reopen(&self) -> Result<TransitionOutcome> {
        let state = self.store.get_program()?;
        if state.phase != ProgramPhase::Closed {
            return Err(PhaseError::WrongPhase {
                required: ProgramPhase::Closed.to_string(),
                actual: state.phase.to_string(),
            }
            .into());
        }
        self.store.set_program(&ProgramState {
            phase: ProgramPhase::Setup,
            academic_year: state.academic_year.clone(),
        })?;
        Ok(TransitionOutcome {
            old_phase: ProgramPhase::Closed,
            new_phase: ProgramPhase::Setup,
            academic_year: state.academic_year,
        })
    }

    /// Year rollover: RESULTS -> SETUP -> TEACHER_SELECTION as one
    /// operator action.
    ///
    /// In order: bump the academic year with the phase at SETUP, clear
    /// every student's per-year data (books submitted, bookshelf,
    /// votes) while preserving cross-year fields (badges, streak
    /// counters, lifetime XP), then enter TEACHER_SELECTION in the new
    /// year. Each student is an independent unit; failures are
    /// collected, never fatal, and re-running converges because the
    /// per-student clear is idempotent.
    pub fn rollover(&self) -> Result<RolloverReport> {
        let state = self.store.get_program()?;
        if state.phase != ProgramPhase::Results {
            return Err(PhaseError::WrongPhase {
                required: ProgramPhase::Results.to_string(),
                actual: state.phase.to_string(),
            }
            .into());
        }

        let old_year = state.academic_year.clone();
        let new_year = old_year.next();
        self.store.set_program(&ProgramState {
            phase: ProgramPhase::Setup,
            academic_year: new_year.clone(),
        })?;
        log::info!("rollover started: {} -> {}", old_year, new_year);

        let mut clears = BulkReport::default();
        for student_id in self.store.list_student_ids()? {
            match self.store.clear_student_year_data(&student_id) {
                Ok(()) => clears.record_success(),
                Err(e) => clears.record_failure(student_id, e.to_string()),
            }
        }

        self.store.set_program(&ProgramState {
            phase: ProgramPhase::TeacherSelection,
            academic_year: new_year.clone(),
        })?;
        log::info!(
            "rollover finished: {} cleared, {} failed",
            clears.succeeded,
            clears.failed
        );

        Ok(RolloverReport {
            old_year,
            new_year,
            students_cleared: clears.succeeded,
            errors: clears.errors,
        })
    }
}
