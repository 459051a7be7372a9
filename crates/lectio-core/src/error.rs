//! Core error types for lectio-core.
//!
//! This module defines the error hierarchy used across the library,
//! built on thiserror so every layer can propagate with `?` and still
//! surface a precise message to the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for lectio-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Phase state machine errors
    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced record does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Phase state machine errors.
#[derive(Error, Debug)]
pub enum PhaseError {
    /// The requested edge is not in the allowed-transition table.
    #[error("Illegal phase transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// An operation required a specific current phase.
    #[error("Operation requires phase {required}, but program is in {actual}")]
    WrongPhase { required: String, actual: String },

    /// CLOSED is only reachable/leavable via the manual override operations.
    #[error("Phase CLOSED requires the manual override operation")]
    ClosedIsManualOnly,

    /// The singleton program record is missing (bootstrap failed).
    #[error("Program record missing; store was not bootstrapped")]
    ProgramMissing,
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A calendar-day string failed to parse as YYYY-MM-DD.
    #[error("Invalid calendar date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    /// An academic-year label failed to parse as YYYY-YY.
    #[error("Invalid academic year '{0}': expected YYYY-YY with consecutive years")]
    InvalidAcademicYear(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(DatabaseError::from(err))
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
