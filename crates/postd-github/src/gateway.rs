use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use postd_core::{errors::Error, Result};

use crate::http;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the local agent gateway that pushes files on a user's behalf.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GatewayFile {
    pub path: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GatewayPushResult {
    pub success: bool,
    #[serde(default)]
    pub results: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    user_id: &'a str,
    github_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushBody<'a> {
    user_id: &'a str,
    repo: &'a str,
    files: &'a [GatewayFile],
    commit_message: &'a str,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: http::client(Default::default())?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Hand the gateway a token to use for `user_id`.
    pub async fn register_token(&self, user_id: &str, token: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/user/add-github-token", self.base_url))
            .timeout(REGISTER_TIMEOUT)
            .json(&RegisterBody {
                user_id,
                github_token: token,
            })
            .send()
            .await
            .map_err(|e| http::transport("gateway add-github-token", e))?;
        http::check("gateway add-github-token", resp).await?;
        Ok(())
    }

    /// Push `files` to `repo`. A gateway-level `success: false` is a rejection.
    pub async fn push(
        &self,
        user_id: &str,
        repo: &str,
        files: &[GatewayFile],
        commit_message: &str,
    ) -> Result<GatewayPushResult> {
        let resp = self
            .http
            .post(format!("{}/api/github/push", self.base_url))
            .timeout(PUSH_TIMEOUT)
            .json(&PushBody {
                user_id,
                repo,
                files,
                commit_message,
            })
            .send()
            .await
            .map_err(|e| http::transport("gateway push", e))?;

        let resp = http::check("gateway push", resp).await?;
        let status = resp.status().as_u16();
        let out: GatewayPushResult = resp
            .json()
            .await
            .map_err(|e| http::transport("gateway push", e))?;

        if !out.success {
            return Err(Error::RemoteRejected {
                status,
                message: out
                    .error
                    .unwrap_or_else(|| "gateway push reported failure".to_string()),
            });
        }
        tracing::info!(repo, files = files.len(), "pushed via gateway");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn register_then_push() {
        let mut server = mockito::Server::new_async().await;
        let reg = server
            .mock("POST", "/api/user/add-github-token")
            .match_body(Matcher::Json(json!({
                "userId": "u1", "githubToken": "ghp_x"
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let push = server
            .mock("POST", "/api/github/push")
            .match_body(Matcher::PartialJson(json!({
                "userId": "u1",
                "repo": "codedao-org.github.io",
                "files": [{ "path": "dashboard.html", "content": "<html/>" }],
                "commitMessage": "deploy"
            })))
            .with_status(200)
            .with_body(r#"{"success":true,"results":[{"path":"dashboard.html"}]}"#)
            .create_async()
            .await;

        let gw = GatewayClient::new(&server.url()).unwrap();
        gw.register_token("u1", "ghp_x").await.unwrap();
        let out = gw
            .push(
                "u1",
                "codedao-org.github.io",
                &[GatewayFile {
                    path: "dashboard.html".into(),
                    content: "<html/>".into(),
                }],
                "deploy",
            )
            .await
            .unwrap();
        assert!(out.success);
        reg.assert_async().await;
        push.assert_async().await;
    }

    #[tokio::test]
    async fn reported_failure_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/github/push")
            .with_status(200)
            .with_body(r#"{"success":false,"error":"token expired"}"#)
            .create_async()
            .await;

        let gw = GatewayClient::new(&server.url()).unwrap();
        let err = gw.push("u1", "r", &[], "m").await.unwrap_err();
        assert!(err.to_string().contains("token expired"));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        // Nothing listens on port 9 locally.
        let gw = GatewayClient::new("http://127.0.0.1:9").unwrap();
        let err = gw.register_token("u", "t").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
