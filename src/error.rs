//! Error taxonomy for the provisioning core.
//!
//! Four categories with distinct propagation behavior:
//! - `SafetyViolation` is checked before anything else and ends the session
//!   unconditionally; no flag can override it.
//! - `Validation` and `Capability` errors occur before any destructive stage,
//!   so the session ends without rollback.
//! - `Execution` errors occur during the destructive pipeline and trigger the
//!   rollback compensating actions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The candidate device resolves to the device backing the running root
    /// filesystem. Never overridable by `--force`.
    #[error("refusing to touch {device}: it backs the running root filesystem ({root_base})")]
    SafetyViolation { device: PathBuf, root_base: String },

    /// Fitness or topology constraints unmet. All violations are collected
    /// before this is raised, not just the first.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A required capability is unavailable for a specific operation.
    #[error("capability unavailable: {0}")]
    Capability(String),

    /// A destructive command returned a non-zero exit status.
    #[error("'{command}' failed with exit code {code}: {stderr}")]
    Execution {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ProvisionError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a capability error.
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// True for errors raised before any destructive stage has run.
    /// These end the session without rollback.
    pub fn failed_before_start(&self) -> bool {
        matches!(
            self,
            Self::SafetyViolation { .. } | Self::Validation(_) | Self::Capability(_)
        )
    }
}
