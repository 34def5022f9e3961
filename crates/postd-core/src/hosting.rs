//! Publishing files to a git host's content API.
//!
//! Updates are conditional on the blob sha read just before the write. A
//! stale sha is rejected by the host and surfaced as a conflict; it is never
//! retried or merged.

use async_trait::async_trait;

use crate::Result;

/// Current state of a file on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutFile {
    pub message: String,
    pub content: Vec<u8>,
    /// Sha of the version being replaced; `None` creates the file.
    pub sha: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub html_url: Option<String>,
    pub content_sha: Option<String>,
}

#[async_trait]
pub trait ContentHost: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>>;

    async fn put_file(&self, path: &str, file: PutFile) -> Result<CommitInfo>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub commit: CommitInfo,
    pub created: bool,
}

/// Create or update `path` with `content`.
pub async fn publish_file(
    host: &dyn ContentHost,
    path: &str,
    content: &[u8],
    message: &str,
) -> Result<PublishOutcome> {
    let current = host.get_file(path).await?;
    let created = current.is_none();

    let commit = host
        .put_file(
            path,
            PutFile {
                message: message.to_string(),
                content: content.to_vec(),
                sha: current.map(|f| f.sha),
            },
        )
        .await?;

    tracing::info!(path, commit = %commit.sha, created, "published file");
    Ok(PublishOutcome { commit, created })
}
