//! In-process [`ContentGateway`] used by the test suites, the benches and the
//! server's `--in-memory` mode. It keeps one text blob and a version counter,
//! and lets tests stage the two ways a real repository pushes back: another
//! writer landing between our read and our commit, and a commit refused
//! outright with an HTTP status.

use super::{ContentGateway, Revision, Snapshot};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process record store with the same revision semantics as the remote
/// repository.
///
/// Every successful commit bumps the revision; a commit presenting any other
/// revision is rejected with [`Error::UpstreamWriteConflict`] and leaves the
/// content untouched.
///
/// Writes queued with [`MemoryGateway::push_concurrent_write`] are applied
/// right after the next snapshot is served, which is how tests stage a second
/// writer winning the race. Statuses queued with
/// [`MemoryGateway::push_rejected_commit`] fail the next commits the way the
/// remote API maps them.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    racing_writes: Mutex<VecDeque<String>>,
    rejected_commits: Mutex<VecDeque<u16>>,
    snapshot_reads: AtomicUsize,
    commit_attempts: AtomicUsize,
}

#[derive(Debug, Default)]
struct MemoryState {
    content: String,
    version: u64,
}

impl MemoryGateway {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                content: content.into(),
                version: 1,
            }),
            ..Self::default()
        }
    }

    pub fn content(&self) -> String {
        self.state.lock().content.clone()
    }

    pub fn revision(&self) -> Revision {
        revision_for(self.state.lock().version)
    }

    /// Schedules a foreign write of `content` to land just after the next
    /// snapshot read.
    pub fn push_concurrent_write(&self, content: impl Into<String>) {
        self.racing_writes.lock().push_back(content.into());
    }

    /// Makes the next commit fail with `status` without touching the content.
    /// 409 and 412 are conflicts; anything else is a plain write failure.
    pub fn push_rejected_commit(&self, status: u16) {
        self.rejected_commits.lock().push_back(status);
    }

    /// Number of snapshot, content and revision reads served.
    pub fn reads(&self) -> usize {
        self.snapshot_reads.load(Ordering::Relaxed)
    }

    /// Number of commits attempted, successful or not.
    pub fn commits(&self) -> usize {
        self.commit_attempts.load(Ordering::Relaxed)
    }

    /// Total calls made against the store.
    pub fn calls(&self) -> usize {
        self.reads() + self.commits()
    }
}

fn revision_for(version: u64) -> Revision {
    Revision::new(format!("mem-{version:08}"))
}

#[async_trait]
impl ContentGateway for MemoryGateway {
    async fn read_snapshot(&self) -> Result<Snapshot> {
        self.snapshot_reads.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let snapshot = Snapshot {
            content: state.content.clone(),
            revision: revision_for(state.version),
        };

        if let Some(foreign) = self.racing_writes.lock().pop_front() {
            state.content = foreign;
            state.version += 1;
        }

        Ok(snapshot)
    }

    async fn commit(
        &self,
        content: &str,
        revision: &Revision,
        _message: &str,
    ) -> Result<Revision> {
        self.commit_attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(status) = self.rejected_commits.lock().pop_front() {
            let body = format!("commit rejected with {status}");
            return Err(match status {
                409 | 412 => Error::UpstreamWriteConflict { status, body },
                _ => Error::UpstreamWrite { status, body },
            });
        }

        let mut state = self.state.lock();
        let current = revision_for(state.version);

        if &current != revision {
            return Err(Error::UpstreamWriteConflict {
                status: 409,
                body: format!("store is at {current} but expected {revision}"),
            });
        }

        state.content = content.to_string();
        state.version += 1;
        Ok(revision_for(state.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_with_current_revision_advances() {
        let gateway = MemoryGateway::new("[];");
        let snapshot = gateway.read_snapshot().await.unwrap();
        let next = gateway
            .commit("[1];", &snapshot.revision, "msg")
            .await
            .unwrap();

        assert_ne!(next, snapshot.revision);
        assert_eq!(gateway.revision(), next);
        assert_eq!(gateway.content(), "[1];");
    }

    #[tokio::test]
    async fn stale_commit_is_rejected_without_overwriting() {
        let gateway = MemoryGateway::new("[];");
        gateway.push_concurrent_write("[\"theirs\"];");

        let ours = gateway.read_snapshot().await.unwrap();
        assert_eq!(ours.content, "[];");
        let before = gateway.content();

        let err = gateway
            .commit("[\"ours\"];", &ours.revision, "msg")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(gateway.content(), before);
        assert_eq!(gateway.content(), "[\"theirs\"];");
    }

    #[tokio::test]
    async fn rejected_commits_map_like_the_remote_api() {
        let gateway = MemoryGateway::new("[];");
        gateway.push_rejected_commit(403);
        gateway.push_rejected_commit(412);
        let snapshot = gateway.read_snapshot().await.unwrap();

        let err = gateway.commit("[1];", &snapshot.revision, "msg").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamWrite { status: 403, .. }));
        let err = gateway.commit("[1];", &snapshot.revision, "msg").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamWriteConflict { status: 412, .. }));
        assert_eq!(gateway.content(), "[];");

        gateway.commit("[1];", &snapshot.revision, "msg").await.unwrap();
        assert_eq!(gateway.content(), "[1];");
        assert_eq!(gateway.commits(), 3);
    }

    #[tokio::test]
    async fn default_reads_go_through_snapshot() {
        let gateway = MemoryGateway::new("[];");
        assert_eq!(gateway.read_content().await.unwrap(), "[];");
        assert_eq!(gateway.read_revision().await.unwrap(), gateway.revision());
        assert_eq!(gateway.reads(), 2);
        assert_eq!(gateway.commits(), 0);
    }
}
