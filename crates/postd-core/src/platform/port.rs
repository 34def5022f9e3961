use async_trait::async_trait;

use crate::{
    domain::{CommentRef, Submission},
    Result,
};

/// Capability set the dispatcher needs from a social platform.
///
/// Implementations map transport failures into `Error::RemoteRejected` (4xx)
/// or `Error::RemoteUnavailable` (network, 5xx, timeouts).
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Account name the platform acts as (used to skip self-welcomes).
    fn account_name(&self) -> Option<String>;

    async fn submit(&self, title: &str, body: &str) -> Result<Submission>;
    async fn reply(&self, parent_id: &str, body: &str) -> Result<CommentRef>;

    async fn sticky(&self, submission_id: &str) -> Result<()>;
    async fn set_flair(&self, submission_id: &str, text: &str, css_class: &str) -> Result<()>;

    /// Newest submissions in the community, newest first.
    async fn new_submissions(&self, limit: usize) -> Result<Vec<Submission>>;
}
