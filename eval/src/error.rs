// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error types for the evaluation framework
//!
//! Configuration problems, failed lookups and broken invariants each get
//! their own variant so callers can tell a bad fold count from a missing
//! identifier without parsing messages.

use thiserror::Error;

/// Main error type for evaluation operations
#[derive(Error, Debug)]
pub enum EvalError {
    /// Invalid settings (fold count, missing converter, unusable labels)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Unmapped decoder index, unknown identifier, unregistered model pair
    #[error("Lookup error: {message}")]
    Lookup { message: String },

    /// Count mismatches and merge collisions where uniqueness is required
    #[error("Consistency error: {message}")]
    Consistency { message: String },

    /// Failures raised inside a model engine
    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Type alias for Results using EvalError
pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}
