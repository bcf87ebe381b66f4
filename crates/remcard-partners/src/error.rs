//! Error types for the partner append workflow.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the append workflow can surface: rejected submissions, missing
//! configuration, upstream read and write failures, and store files that can
//! no longer be spliced safely.
//!
//! ## Error Cases
//! - `Validation`: a draft with a blank required field or phone entry was
//!   handed to the appender.
//! - `Config`: the service cannot reach the content repository (no
//!   credential).
//! - `UpstreamRead`: the snapshot read returned a non-success status.
//! - `UpstreamWriteConflict`: the commit was rejected because the revision it
//!   was built on is stale. Retryable with a fresh snapshot.
//! - `UpstreamWrite`: any other commit failure.
//! - `MalformedStore`: the record file does not end with the closing marker.
//! - `Decode`: the upstream answered with a payload we could not interpret.
//! - `Transport`: the HTTP request itself failed (DNS, TLS, timeout).

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the append workflow.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The draft was invalid; no network call was made.
    #[error("Invalid submission: {reason}")]
    Validation { reason: String },

    /// The service is missing configuration required to reach the store.
    #[error("Service not configured: {reason}")]
    Config { reason: String },

    /// Reading the record store failed upstream.
    #[error("Upstream read failed with status {status}")]
    UpstreamRead { status: u16, body: String },

    /// The commit presented a stale revision.
    #[error("Upstream rejected stale revision (status {status})")]
    UpstreamWriteConflict { status: u16, body: String },

    /// The commit failed for a reason other than a stale revision.
    #[error("Upstream write failed with status {status}")]
    UpstreamWrite { status: u16, body: String },

    /// The record file cannot be extended without corrupting it.
    #[error("Malformed record store: {reason}")]
    MalformedStore { reason: String },

    /// The upstream payload could not be decoded.
    #[error("Unexpected upstream payload: {reason}")]
    Decode { reason: String },

    /// The HTTP exchange with the upstream failed before a status was seen.
    #[error("Upstream transport error while {context}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    /// Whether re-running the append from a fresh snapshot may succeed.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::UpstreamWriteConflict { .. })
    }

    /// Upstream status and body, when the error came from an HTTP response.
    ///
    /// Used for logging only; never surfaced to clients.
    pub fn upstream_detail(&self) -> Option<(u16, &str)> {
        match self {
            Self::UpstreamRead { status, body }
            | Self::UpstreamWriteConflict { status, body }
            | Self::UpstreamWrite { status, body } => Some((*status, body.as_str())),
            _ => None,
        }
    }
}
