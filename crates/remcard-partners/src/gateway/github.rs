//! GitHub "contents" API implementation of [`ContentGateway`].
//!
//! | operation       | request                                               |
//! |-----------------|-------------------------------------------------------|
//! | `read_snapshot` | `GET /repos/{repo}/contents/{path}` (JSON metadata)   |
//! | `read_content`  | same URL with `Accept: application/vnd.github.raw`    |
//! | `read_revision` | same as `read_snapshot`, keeping only `sha`           |
//! | `commit`        | `PUT /repos/{repo}/contents/{path}` with `sha`        |
//!
//! The metadata response embeds the base64 content next to its blob `sha`, so
//! one request yields a consistent snapshot. Files over the inline size limit
//! come back without content; those are fetched from
//! `GET /repos/{repo}/git/blobs/{sha}`, which is immutable for a given sha and
//! therefore still describes the same revision.

use super::{ContentGateway, Revision, Snapshot};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use core::fmt;
use core::time::Duration;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const API_VERSION: &str = "2022-11-28";

/// Which file the gateway reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubTarget {
    /// API root, e.g. `https://api.github.com`.
    pub api_url: String,
    /// Repository as `owner/name`.
    pub repo: String,
    /// Path of the record file inside the repository.
    pub path: String,
    /// Branch to read and commit to; the default branch when `None`.
    pub branch: Option<String>,
}

/// Authenticated client for one record file in one repository.
#[derive(Clone)]
pub struct GitHubGateway {
    client: Client,
    target: GitHubTarget,
    contents_url: Url,
    blobs_url: Url,
}

impl fmt::Debug for GitHubGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubGateway")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl GitHubGateway {
    /// Builds a gateway that authenticates with `token` as a bearer
    /// credential. Every request is bounded by `timeout`.
    pub fn new(target: GitHubTarget, token: &str, timeout: Duration) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim())).map_err(|_| {
            Error::Config {
                reason: "credential contains characters that cannot be sent in a header"
                    .to_string(),
            }
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("remcard-partners/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Transport {
                context: "building the HTTP client",
                source,
            })?;

        let contents_url = endpoint(
            &target.api_url,
            &target.repo,
            "contents",
            target.path.split('/'),
        )?;
        let blobs_url = endpoint(&target.api_url, &target.repo, "git", ["blobs"])?;

        Ok(Self {
            client,
            target,
            contents_url,
            blobs_url,
        })
    }

    pub fn target(&self) -> &GitHubTarget {
        &self.target
    }

    fn read_url(&self) -> Url {
        let mut url = self.contents_url.clone();
        if let Some(branch) = &self.target.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        url
    }

    async fn get(&self, url: Url, accept: &'static str, context: &'static str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|source| Error::Transport { context, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "{context} failed");
            return Err(Error::UpstreamRead {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| Error::Transport { context, source })?;
        Ok(bytes.to_vec())
    }

    async fn metadata(&self) -> Result<ContentsMetadata> {
        let body = self
            .get(self.read_url(), JSON_MEDIA_TYPE, "reading store metadata")
            .await?;
        let metadata: ContentsMetadata =
            serde_json::from_slice(&body).map_err(|e| Error::Decode {
                reason: format!("contents metadata: {e}"),
            })?;

        match metadata.kind.as_deref() {
            None | Some("file") => Ok(metadata),
            Some(other) => Err(Error::Decode {
                reason: format!("`{}` is a {other}, not a file", self.target.path),
            }),
        }
    }

    async fn blob(&self, sha: &str) -> Result<String> {
        let mut url = self.blobs_url.clone();
        url.path_segments_mut()
            .map_err(|()| invalid_api_url(&self.target.api_url))?
            .push(sha);
        let body = self.get(url, RAW_MEDIA_TYPE, "reading store blob").await?;
        utf8(body)
    }
}

#[async_trait]
impl ContentGateway for GitHubGateway {
    #[tracing::instrument(name = "github.read_content", skip_all)]
    async fn read_content(&self) -> Result<String> {
        let body = self
            .get(self.read_url(), RAW_MEDIA_TYPE, "reading store content")
            .await?;
        utf8(body)
    }

    #[tracing::instrument(name = "github.read_revision", skip_all)]
    async fn read_revision(&self) -> Result<Revision> {
        Ok(Revision::new(self.metadata().await?.sha))
    }

    #[tracing::instrument(name = "github.read_snapshot", skip_all)]
    async fn read_snapshot(&self) -> Result<Snapshot> {
        let metadata = self.metadata().await?;

        let inline = match (metadata.encoding.as_deref(), metadata.content.as_deref()) {
            (Some("base64"), Some(encoded)) if !(encoded.is_empty() && metadata.size > 0) => {
                Some(decode_inline(encoded)?)
            }
            (None, None) if metadata.size == 0 => Some(String::new()),
            _ => None,
        };

        let content = match inline {
            Some(content) => content,
            None => {
                tracing::debug!(size = metadata.size, "content not inlined, reading blob");
                self.blob(&metadata.sha).await?
            }
        };

        tracing::debug!(revision = %metadata.sha, bytes = content.len(), "snapshot read");
        Ok(Snapshot {
            content,
            revision: Revision::new(metadata.sha),
        })
    }

    #[tracing::instrument(name = "github.commit", skip_all, fields(revision = %revision))]
    async fn commit(
        &self,
        content: &str,
        revision: &Revision,
        message: &str,
    ) -> Result<Revision> {
        let request = CommitRequest {
            message,
            content: STANDARD.encode(content),
            sha: revision.as_str(),
            branch: self.target.branch.as_deref(),
        };

        let response = self
            .client
            .put(self.contents_url.clone())
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(|source| Error::Transport {
                context: "committing store content",
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let status_code = status.as_u16();
            return Err(match status {
                StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                    tracing::info!(status = status_code, "commit rejected as stale");
                    Error::UpstreamWriteConflict {
                        status: status_code,
                        body,
                    }
                }
                _ => {
                    tracing::warn!(status = status_code, "commit failed");
                    Error::UpstreamWrite {
                        status: status_code,
                        body,
                    }
                }
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| Error::Transport {
                context: "reading commit response",
                source,
            })?;
        let committed: CommitResponse = serde_json::from_slice(&body).map_err(|e| Error::Decode {
            reason: format!("commit response: {e}"),
        })?;

        tracing::debug!(new_revision = %committed.content.sha, "commit accepted");
        Ok(Revision::new(committed.content.sha))
    }
}

#[derive(Debug, Deserialize)]
struct ContentsMetadata {
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    message: &'a str,
    content: String,
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    content: CommittedFile,
}

#[derive(Debug, Deserialize)]
struct CommittedFile {
    sha: String,
}

fn endpoint<'s>(
    api_url: &str,
    repo: &str,
    section: &str,
    rest: impl IntoIterator<Item = &'s str>,
) -> Result<Url> {
    let mut url = Url::parse(api_url).map_err(|_| invalid_api_url(api_url))?;
    let mut owner_and_name = repo.split('/').filter(|s| !s.is_empty());
    let (Some(owner), Some(name), None) = (
        owner_and_name.next(),
        owner_and_name.next(),
        owner_and_name.next(),
    ) else {
        return Err(Error::Config {
            reason: format!("repository `{repo}` is not in `owner/name` form"),
        });
    };

    url.path_segments_mut()
        .map_err(|()| invalid_api_url(api_url))?
        .pop_if_empty()
        .extend(["repos", owner, name, section])
        .extend(rest.into_iter().filter(|s| !s.is_empty()));
    Ok(url)
}

fn invalid_api_url(api_url: &str) -> Error {
    Error::Config {
        reason: format!("`{api_url}` is not a usable API base URL"),
    }
}

fn decode_inline(encoded: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| Error::Decode {
        reason: format!("inline content is not base64: {e}"),
    })?;
    utf8(bytes)
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Decode {
        reason: format!("store content is not UTF-8: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(api_url: &str, repo: &str, path: &str) -> GitHubTarget {
        GitHubTarget {
            api_url: api_url.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            branch: Some("main".to_string()),
        }
    }

    #[test]
    fn builds_contents_and_blob_urls() {
        let gateway = GitHubGateway::new(
            target("https://api.github.com/", "karenavedikyan/rem", "data/partners Data.js"),
            "ghp_example",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            gateway.contents_url.as_str(),
            "https://api.github.com/repos/karenavedikyan/rem/contents/data/partners%20Data.js"
        );
        assert_eq!(
            gateway.read_url().as_str(),
            "https://api.github.com/repos/karenavedikyan/rem/contents/data/partners%20Data.js?ref=main"
        );
        assert_eq!(
            gateway.blobs_url.as_str(),
            "https://api.github.com/repos/karenavedikyan/rem/git/blobs"
        );
    }

    #[test]
    fn rejects_bad_repository_names() {
        for repo in ["rem", "a/b/c", "/rem"] {
            let err = GitHubGateway::new(
                target("https://api.github.com", repo, "partnersData.js"),
                "t",
                Duration::from_secs(5),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "{repo}");
        }
    }

    #[test]
    fn debug_output_omits_the_token() {
        let gateway = GitHubGateway::new(
            target("https://api.github.com", "o/r", "p.js"),
            "ghp_secret_value",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!format!("{gateway:?}").contains("ghp_secret_value"));
    }

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = "Y29uc3QgcCA9\nIFsKICB7IGlk\nOiAxIH0sCl07Cg==\n";
        assert_eq!(decode_inline(encoded).unwrap(), "const p = [\n  { id: 1 },\n];\n");
    }
}
