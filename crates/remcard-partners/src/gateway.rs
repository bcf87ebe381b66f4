//! Remote Content Gateway: access to the single file that holds the store.
//!
//! The gateway hides the content repository behind four operations. Only
//! [`ContentGateway::read_snapshot`] and [`ContentGateway::commit`] take part
//! in appends: content and revision must come from the same read, otherwise
//! the file can change between the two and the commit would be guarded by a
//! revision that does not describe the content it was computed from.

mod github;
mod memory;

pub use github::{GitHubGateway, GitHubTarget};
pub use memory::MemoryGateway;

use crate::Result;
use async_trait::async_trait;
use core::fmt;

/// Opaque token naming one exact version of the store file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store content paired with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub content: String,
    pub revision: Revision,
}

#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Reads the raw file content.
    async fn read_content(&self) -> Result<String> {
        Ok(self.read_snapshot().await?.content)
    }

    /// Reads the current revision pointer.
    async fn read_revision(&self) -> Result<Revision> {
        Ok(self.read_snapshot().await?.revision)
    }

    /// Reads content and revision as one consistent pair.
    async fn read_snapshot(&self) -> Result<Snapshot>;

    /// Replaces the whole file with `content` if the store is still at
    /// `revision`, returning the new revision.
    ///
    /// # Errors
    ///
    /// - [`Error::UpstreamWriteConflict`](crate::Error::UpstreamWriteConflict)
    ///   when `revision` is stale. The store is left untouched.
    /// - [`Error::UpstreamWrite`](crate::Error::UpstreamWrite) for any other
    ///   rejected write.
    async fn commit(&self, content: &str, revision: &Revision, message: &str)
    -> Result<Revision>;
}
