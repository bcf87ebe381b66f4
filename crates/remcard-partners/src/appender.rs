//! Append Orchestrator: read, allocate, serialize, commit, retry.
//!
//! Each attempt is a full transaction against one snapshot:
//!
//! 1. read content and revision together
//! 2. allocate `max(id) + 1` from that content
//! 3. render the record and splice it before the closing marker
//! 4. commit guarded by the snapshot's revision
//!
//! A stale revision means another writer committed in between. Nothing was
//! written, so the whole attempt is repeated from a fresh snapshot, up to
//! [`RetryPolicy::max_attempts`]. Every other error ends the append.

use crate::gateway::{ContentGateway, Revision};
use crate::store::{append_record, next_id};
use crate::{PartnerDraft, PartnerRecord, Result};
use core::time::Duration;
use rand::Rng;
use std::sync::Arc;

/// Bounds for retrying an append after a revision conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: usize,
    /// Sleep before attempt `n + 1` is `base_backoff_ms * n` plus up to
    /// `base_backoff_ms` of jitter.
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 150,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up on the first conflict.
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_backoff_ms: 0,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        if self.base_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let linear = self.base_backoff_ms.saturating_mul(attempt as u64);
        let jitter = rand::rng().random_range(0..=self.base_backoff_ms);
        Duration::from_millis(linear.saturating_add(jitter))
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub record: PartnerRecord,
    /// Revision of the store after the commit.
    pub revision: Revision,
    /// How many attempts it took, starting at 1.
    pub attempts: usize,
}

/// Appends partner records through a [`ContentGateway`].
#[derive(Clone)]
pub struct PartnerAppender {
    gateway: Arc<dyn ContentGateway>,
    retry: RetryPolicy,
}

impl PartnerAppender {
    pub fn new(gateway: Arc<dyn ContentGateway>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ContentGateway> {
        &self.gateway
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Appends `draft` as a new record with a freshly allocated id.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`](crate::Error::Validation) when the draft breaks
    ///   its invariants; the store is not contacted.
    /// - [`Error::UpstreamWriteConflict`](crate::Error::UpstreamWriteConflict) once every attempt lost the race.
    /// - Any read, decode, store-format or write error from the first attempt
    ///   that hits one; those are not retried.
    #[tracing::instrument(skip_all, fields(partner = %draft.name))]
    pub async fn append(&self, draft: PartnerDraft) -> Result<AppendOutcome> {
        draft.validate()?;
        let mut attempt = 1;
        loop {
            match self.try_append(&draft).await {
                Ok((record, revision)) => {
                    tracing::info!(id = record.id, attempt, %revision, "partner appended");
                    return Ok(AppendOutcome {
                        record,
                        revision,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_conflict() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "store changed during append, retrying from a fresh snapshot"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_conflict() {
                        tracing::warn!(attempt, "giving up after repeated revision conflicts");
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn try_append(&self, draft: &PartnerDraft) -> Result<(PartnerRecord, Revision)> {
        let snapshot = self.gateway.read_snapshot().await?;
        let id = next_id(&snapshot.content)?;
        let record = draft.clone().into_record(id);
        let content = append_record(&snapshot.content, &record)?;

        tracing::debug!(id, base_revision = %snapshot.revision, "committing record");
        let revision = self
            .gateway
            .commit(&content, &snapshot.revision, &record.commit_message())
            .await?;
        Ok((record, revision))
    }
}

impl core::fmt::Debug for PartnerAppender {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PartnerAppender")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

