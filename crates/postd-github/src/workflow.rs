use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use postd_core::{errors::Error, Result};

use crate::{http, DEFAULT_API_BASE};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fires `workflow_dispatch` events so a CI runner performs the action.
#[derive(Clone, Debug)]
pub struct WorkflowClient {
    http: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl WorkflowClient {
    pub fn new(token: &str, owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http::client(http::github_headers(token)?)?,
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Dispatch `workflow` on `git_ref`. GitHub answers 204 on success.
    pub async fn dispatch(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: Map<String, Value>,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/actions/workflows/{}/dispatches",
            self.api_base, self.owner, self.repo, workflow
        );
        let resp = self
            .http
            .post(url)
            .timeout(DISPATCH_TIMEOUT)
            .json(&json!({ "ref": git_ref, "inputs": inputs }))
            .send()
            .await
            .map_err(|e| http::transport("workflow dispatch", e))?;

        let resp = http::check("workflow dispatch", resp).await?;
        if resp.status() != StatusCode::NO_CONTENT {
            return Err(Error::RemoteRejected {
                status: resp.status().as_u16(),
                message: "workflow dispatch: expected 204 No Content".to_string(),
            });
        }

        tracing::info!(workflow, git_ref, "workflow dispatched");
        Ok(())
    }
}
