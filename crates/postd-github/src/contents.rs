use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use postd_core::{
    hosting::{CommitInfo, ContentHost, PutFile, RemoteFile},
    Result,
};

use crate::{http, DEFAULT_API_BASE};

const GET_TIMEOUT: Duration = Duration::from_secs(15);
const PUT_TIMEOUT: Duration = Duration::from_secs(60);

/// Contents API client for one repository.
#[derive(Clone, Debug)]
pub struct GitHubContents {
    http: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    branch: Option<String>,
}

#[derive(Deserialize)]
struct ContentsEntry {
    sha: String,
    path: String,
}

#[derive(Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    #[serde(default)]
    content: Option<PutContent>,
    commit: PutCommit,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Deserialize)]
struct PutCommit {
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

impl GitHubContents {
    pub fn new(token: &str, owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http::client(http::github_headers(token)?)?,
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: None,
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ContentHost for GitHubContents {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let mut req = self.http.get(self.url(path)).timeout(GET_TIMEOUT);
        if let Some(branch) = &self.branch {
            req = req.query(&[("ref", branch)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| http::transport("github contents get", e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entry: ContentsEntry = http::check("github contents get", resp)
            .await?
            .json()
            .await
            .map_err(|e| http::transport("github contents get", e))?;

        Ok(Some(RemoteFile {
            path: entry.path,
            sha: entry.sha,
        }))
    }

    async fn put_file(&self, path: &str, file: PutFile) -> Result<CommitInfo> {
        let body = PutBody {
            message: &file.message,
            content: STANDARD.encode(&file.content),
            sha: file.sha.as_deref(),
            branch: self.branch.as_deref(),
        };
        let resp = self
            .http
            .put(self.url(path))
            .timeout(PUT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport("github contents put", e))?;

        let out: PutResponse = http::check("github contents put", resp)
            .await?
            .json()
            .await
            .map_err(|e| http::transport("github contents put", e))?;

        Ok(CommitInfo {
            sha: out.commit.sha,
            html_url: out.commit.html_url,
            content_sha: out.content.map(|c| c.sha),
        })
    }
}
