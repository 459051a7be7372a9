//! Family battle records and their reconciliation.
//!
//! A family's cooperative-reading "battle" state exists in two
//! generations: the current `battle` structure and a deprecated
//! flat `legacy_history`. Records drifted while both generations were
//! written by different code paths; the scanner classifies that drift
//! against a fixed issue taxonomy and the repair engine heals it.
//!
//! Every code path that works with battle state first classifies the
//! record into [`BattleState`] and normalizes to the current structure
//! before touching anything else.

pub mod repair;
pub mod scanner;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::FamilyRow;

/// Which side of a family battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Children,
    Parents,
}

/// Consecutive-win streak within a family's battle history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStreak {
    #[serde(default)]
    pub team: Option<Team>,
    #[serde(default)]
    pub count: u32,
}

/// One week of battle play: reading minutes per side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekBattle {
    /// ISO week label, e.g. "2025-W37".
    #[serde(default)]
    pub week: String,
    #[serde(default)]
    pub children_minutes: u32,
    #[serde(default)]
    pub parent_minutes: u32,
}

impl WeekBattle {
    /// True when the week carries any recorded reading.
    pub fn has_activity(&self) -> bool {
        self.children_minutes > 0 || self.parent_minutes > 0
    }
}

/// A finished week kept in the recent-battles list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekOutcome {
    #[serde(default)]
    pub week: String,
    #[serde(default)]
    pub winner: Option<Team>,
    #[serde(default)]
    pub children_minutes: u32,
    #[serde(default)]
    pub parent_minutes: u32,
}

/// Current-generation battle history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleHistory {
    #[serde(default)]
    pub total_battles: u32,
    #[serde(default)]
    pub children_wins: u32,
    #[serde(default)]
    pub parent_wins: u32,
    #[serde(default)]
    pub ties: u32,
    #[serde(default)]
    pub current_streak: TeamStreak,
    #[serde(default)]
    pub recent_battles: Vec<WeekOutcome>,
    /// XP already granted per week label, so a replayed week never
    /// double-awards.
    #[serde(default)]
    pub xp_awarded: HashMap<String, u32>,
}

impl BattleHistory {
    /// Sum of the three win/tie counters. The invariant is
    /// `total_battles == wins_sum()`.
    pub fn wins_sum(&self) -> u32 {
        self.children_wins + self.parent_wins + self.ties
    }

    /// True when any counter is non-zero.
    pub fn has_data(&self) -> bool {
        self.total_battles > 0 || self.wins_sum() > 0
    }
}

/// Current-generation battle structure on a family record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyBattle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub current_week: Option<WeekBattle>,
    #[serde(default)]
    pub completed_week: Option<WeekBattle>,
    #[serde(default)]
    pub history: Option<BattleHistory>,
}

/// Deprecated flat history structure. Carries only the four counters;
/// the per-week breakdown was never recorded in this generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyHistory {
    #[serde(default)]
    pub battles: u32,
    #[serde(default)]
    pub children_wins: u32,
    #[serde(default)]
    pub parent_wins: u32,
    #[serde(default)]
    pub ties: u32,
}

/// A decoded family record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyRecord {
    pub id: String,
    pub name: String,
    pub battle: Option<FamilyBattle>,
    pub legacy: Option<LegacyHistory>,
    pub last_repaired: Option<DateTime<Utc>>,
    pub repaired_by: Option<String>,
}

/// Which generation(s) of battle state a record carries.
///
/// All reconciliation logic dispatches on this sum type instead of
/// probing optional fields ad hoc; everything downstream of repair sees
/// `Current` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleState<'a> {
    Neither,
    Legacy(&'a LegacyHistory),
    Current(&'a FamilyBattle),
    Both(&'a FamilyBattle, &'a LegacyHistory),
}

impl FamilyRecord {
    /// Classify which structure generations are present.
    pub fn battle_state(&self) -> BattleState<'_> {
        match (&self.battle, &self.legacy) {
            (None, None) => BattleState::Neither,
            (None, Some(legacy)) => BattleState::Legacy(legacy),
            (Some(battle), None) => BattleState::Current(battle),
            (Some(battle), Some(legacy)) => BattleState::Both(battle, legacy),
        }
    }

    /// Decode a raw storage row. JSON that fails to decode surfaces as
    /// an error carrying the family id; the scanner reports it as a
    /// malformed record rather than crashing the scan.
    pub fn decode(row: &FamilyRow) -> Result<Self, serde_json::Error> {
        let battle = row
            .battle_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let legacy = row
            .legacy_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Self {
            id: row.id.clone(),
            name: row.name.clone(),
            battle,
            legacy,
            last_repaired: row.last_repaired,
            repaired_by: row.repaired_by.clone(),
        })
    }
}
