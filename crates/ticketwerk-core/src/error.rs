// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Ticketwerk.

use thiserror::Error;

use crate::types::{JobId, LifecycleState};

/// Top-level error type for all Ticketwerk operations.
#[derive(Debug, Error)]
pub enum TicketwerkError {
    // -- Device errors --
    /// The printer went away (unplugged, powered off, node vanished).
    /// `bytes_sent` is how far the write got before the loss was observed;
    /// nothing beyond it may be assumed to have reached the printer.
    #[error("printer lost after {bytes_sent} bytes: {detail}")]
    DeviceLost { bytes_sent: u64, detail: String },

    #[error("printer busy: {0}")]
    DeviceBusy(String),

    #[error("permission denied opening {path}")]
    PermissionDenied { path: String },

    #[error("printer timed out: {0}")]
    Timeout(String),

    #[error("device probe failed: {0}")]
    Probe(String),

    // -- Render errors --
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    // -- Ledger errors --
    #[error("job {job_id} already settled as {state}")]
    AlreadySettled { job_id: JobId, state: LifecycleState },

    #[error("job {0} already failed permanently")]
    AlreadyFailed(JobId),

    #[error("stale attempt for job {job_id}: {detail}")]
    StaleAttempt { job_id: JobId, detail: String },

    #[error("job {0} not found in ledger")]
    UnknownJob(JobId),

    #[error("job {job_id} is {state}; only ambiguous jobs can be requeued")]
    NotAmbiguous { job_id: JobId, state: LifecycleState },

    #[error("ledger storage error: {0}")]
    Ledger(String),

    // -- Backend errors --
    #[error("backend transport error: {0}")]
    Transport(String),

    /// The backend answered with an error. `status` is the HTTP status of
    /// that answer; a `success: false` envelope may arrive with a 2xx.
    #[error("backend rejected request: {message}")]
    Backend {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("device credential rejected: {0}")]
    CredentialRejected(String),

    #[error("no device credential configured")]
    MissingCredential,

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TicketwerkError {
    /// Errors after which the agent must stop processing entirely rather
    /// than risk a duplicate or lost ticket.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Ledger(_) | Self::CredentialRejected(_) | Self::MissingCredential
        )
    }

    /// The backend understood the request and refused it. Sending the same
    /// request again will get the same answer; 408 and 429 are excluded.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Backend { status, .. } => match *status {
                200..=299 => true,
                408 | 429 => false,
                400..=499 => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TicketwerkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_credential_errors_are_fatal() {
        assert!(TicketwerkError::Ledger("disk I/O error".into()).is_fatal());
        assert!(TicketwerkError::CredentialRejected("401".into()).is_fatal());
        assert!(TicketwerkError::MissingCredential.is_fatal());
    }

    #[test]
    fn device_errors_are_not_fatal() {
        let lost = TicketwerkError::DeviceLost {
            bytes_sent: 12,
            detail: "unplugged".into(),
        };
        assert!(!lost.is_fatal());
        assert!(!TicketwerkError::Timeout("30s".into()).is_fatal());
        assert!(!TicketwerkError::InvalidTemplate("missing price".into()).is_fatal());
    }

    #[test]
    fn client_errors_are_rejections_but_outages_are_not() {
        let backend = |status| TicketwerkError::Backend {
            status,
            code: None,
            message: "refused".into(),
        };
        assert!(backend(404).is_rejection());
        assert!(backend(409).is_rejection());
        assert!(backend(200).is_rejection());
        assert!(!backend(429).is_rejection());
        assert!(!backend(408).is_rejection());
        assert!(!backend(503).is_rejection());
        assert!(!TicketwerkError::Transport("connection refused".into()).is_rejection());
    }

    #[test]
    fn device_lost_message_reports_progress() {
        let err = TicketwerkError::DeviceLost {
            bytes_sent: 512,
            detail: "usb disconnect".into(),
        };
        assert_eq!(err.to_string(), "printer lost after 512 bytes: usb disconnect");
    }
}
