//! Bounded fan-out over independent units of work.
//!
//! Every bulk operation in lectio (health scan, batch repair, streak
//! migration, year rollover) processes many independent records. A unit
//! that fails must never block or corrupt another unit, and the overall
//! operation reports success and failure counts instead of aborting.
//!
//! `run_bounded` is the producer/worker-pool half: it maps a slice of
//! units through a fallible function on at most `concurrency` worker
//! threads and returns per-unit results in input order. [`BulkReport`]
//! is the aggregation half.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A single failed unit within a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitError {
    /// Identifying key of the unit (student id, family id, ...).
    pub key: String,
    /// Human-readable failure message.
    pub message: String,
}

impl UnitError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Aggregated outcome of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Units attempted.
    pub processed: usize,
    /// Units that completed without error.
    pub succeeded: usize,
    /// Units that failed.
    pub failed: usize,
    /// One entry per failed unit.
    pub errors: Vec<UnitError>,
}

impl BulkReport {
    /// Fold keyed per-unit results into a report.
    pub fn collect<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<(), String>)>,
    {
        let mut report = Self::default();
        for (key, result) in results {
            report.processed += 1;
            match result {
                Ok(()) => report.succeeded += 1,
                Err(message) => {
                    report.failed += 1;
                    report.errors.push(UnitError { key, message });
                }
            }
        }
        report
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push(UnitError::new(key, message));
    }

    /// True when every processed unit succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Human-readable summary line.
    pub fn message(&self) -> String {
        if self.processed == 0 {
            "No units to process.".to_string()
        } else if self.is_clean() {
            format!("All {} unit(s) succeeded.", self.processed)
        } else {
            format!(
                "{} succeeded, {} failed out of {} unit(s).",
                self.succeeded, self.failed, self.processed
            )
        }
    }
}

/// Map `units` through `work` on a bounded pool of worker threads.
///
/// Results are returned in input order. A failing unit yields its `Err`
/// slot without affecting any other unit; there is no ordering guarantee
/// on execution, only on the returned vector.
///
/// `concurrency` is clamped to `1..=units.len()`.
pub fn run_bounded<T, R, F>(units: &[T], concurrency: usize, work: F) -> Vec<Result<R, String>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, String> + Sync,
{
    if units.is_empty() {
        return Vec::new();
    }

    let workers = concurrency.clamp(1, units.len());
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<Result<R, String>>>> = {
        let mut v = Vec::with_capacity(units.len());
        v.resize_with(units.len(), || None);
        Mutex::new(v)
    };

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= units.len() {
                    break;
                }
                let result = work(&units[index]);
                let mut slots = slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                slots[index] = Some(result);
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err("unit was not processed".to_string())))
        .collect()
}
