//! # Lectio Core Library
//!
//! This library provides the lifecycle and consistency engine for the
//! Lectio school reading program. It implements a CLI-first philosophy:
//! every operation is available through the core API and the companion
//! CLI binary is a thin layer over it.
//!
//! ## Architecture
//!
//! - **Streak Derivation**: pure functions that reconstruct a student's
//!   canonical streak aggregates from the append-only session log
//! - **Battle Scanner / Repair**: a taxonomy-driven health scan over
//!   family battle records and an idempotent repair engine that heals
//!   drift between the legacy and current representations
//! - **Phase Machine**: the academic-year state machine that gates the
//!   bulk year-rollover clearing
//! - **Storage**: SQLite-based record store and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`streak::derive`]: canonical streak derivation
//! - [`battle::scanner::scan_all`] / [`battle::repair::repair_families`]
//! - [`phase::PhaseMachine`]: the only mutator of the program phase
//! - [`Store`]: record persistence

pub mod battle;
pub mod bulk;
pub mod error;
pub mod phase;
pub mod storage;
pub mod streak;

pub use battle::repair::{RepairPatch, RepairReport};
pub use battle::scanner::{FamilyIssueReport, Issue, IssueKind, ScanReport, Severity};
pub use battle::{BattleHistory, BattleState, FamilyBattle, FamilyRecord, LegacyHistory};
pub use bulk::{BulkReport, UnitError};
pub use error::{ConfigError, CoreError, DatabaseError, PhaseError, ValidationError};
pub use phase::{AcademicYear, PhaseMachine, ProgramPhase, ProgramState, RolloverReport};
pub use storage::{Config, Store};
pub use streak::{MigrationReport, SessionDay, StreakSummary};
