//! Reddit adapter (implements `postd_core::platform::SocialPlatform`).
//!
//! Script-app OAuth (password grant); the bearer token is cached until shortly
//! before it expires.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use postd_core::{
    config::Config,
    domain::{CommentRef, Submission},
    errors::Error,
    platform::SocialPlatform,
    Result,
};

pub const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct RedditClient {
    http: reqwest::Client,
    auth_base: String,
    api_base: String,
    subreddit: String,
    creds: Option<RedditCredentials>,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Deserialize)]
struct ListingChild {
    data: LinkData,
}

#[derive(Deserialize)]
struct LinkData {
    name: String,
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
}

impl LinkData {
    fn into_submission(self) -> Submission {
        let created_at = DateTime::<Utc>::from_timestamp(self.created_utc as i64, 0)
            .unwrap_or_default();
        Submission {
            id: self.name,
            title: self.title,
            url: self.url,
            author: self.author,
            created_at,
            score: self.score,
            num_comments: self.num_comments,
        }
    }
}

impl RedditClient {
    pub fn new(
        subreddit: impl Into<String>,
        user_agent: &str,
        creds: Option<RedditCredentials>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| Error::Config(format!("invalid user agent {user_agent:?}")))?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            http,
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            subreddit: subreddit.into(),
            creds,
            token: Mutex::new(None),
        })
    }

    /// Client for the configured subreddit. Missing credentials are reported
    /// as `AuthMissing` on first use, not here.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let creds = match (
            &cfg.reddit_client_id,
            &cfg.reddit_client_secret,
            &cfg.reddit_username,
            &cfg.reddit_password,
        ) {
            (Some(id), Some(secret), Some(user), Some(pass)) => Some(RedditCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
                username: user.clone(),
                password: pass.clone(),
            }),
            _ => None,
        };
        Self::new(cfg.subreddit.clone(), &cfg.reddit_user_agent, creds)
    }

    pub fn with_base_urls(mut self, auth_base: &str, api_base: &str) -> Self {
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn creds(&self) -> Result<&RedditCredentials> {
        self.creds.as_ref().ok_or_else(|| {
            Error::AuthMissing(
                "REDDIT_CLIENT_ID, REDDIT_CLIENT_SECRET, REDDIT_USERNAME and REDDIT_PASSWORD must be set"
                    .to_string(),
            )
        })
    }

    async fn access_token(&self) -> Result<String> {
        let creds = self.creds()?;
        let mut cached = self.token.lock().await;
        if let Some(tok) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < tok.expires_at {
                return Ok(tok.access_token.clone());
            }
        }

        let resp = self
            .http
            .post(format!("{}/api/v1/access_token", self.auth_base))
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport("reddit token", e))?;
        let body: TokenResponse = check("reddit token", resp)
            .await?
            .json()
            .await
            .map_err(|e| transport("reddit token", e))?;

        // Bad credentials come back as 200 with an `error` field.
        let Some(access_token) = body.access_token.filter(|t| !t.is_empty()) else {
            return Err(Error::RemoteRejected {
                status: 401,
                message: format!(
                    "reddit token: {}",
                    body.error.unwrap_or_else(|| "no access_token".to_string())
                ),
            });
        };

        let ttl = Duration::from_secs(body.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        tracing::debug!(ttl_secs = ttl.as_secs(), "reddit token refreshed");
        Ok(access_token)
    }

    /// POST an `api_type=json` form and return `json.data`.
    async fn post_api(&self, op: &str, path: &str, form: &[(&str, &str)]) -> Result<Value> {
        let token = self.access_token().await?;
        let mut fields: Vec<(&str, &str)> = form.to_vec();
        fields.push(("api_type", "json"));

        let resp = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .form(&fields)
            .send()
            .await
            .map_err(|e| transport(op, e))?;
        let resp = check(op, resp).await?;
        let status = resp.status().as_u16();
        let v: Value = resp.json().await.map_err(|e| transport(op, e))?;

        let errors = v
            .pointer("/json/errors")
            .and_then(Value::as_array)
            .filter(|e| !e.is_empty());
        if let Some(errors) = errors {
            return Err(Error::RemoteRejected {
                status,
                message: format!("{op}: {}", Value::Array(errors.clone())),
            });
        }
        Ok(v.pointer("/json/data").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl SocialPlatform for RedditClient {
    fn account_name(&self) -> Option<String> {
        self.creds.as_ref().map(|c| c.username.clone())
    }

    async fn submit(&self, title: &str, body: &str) -> Result<Submission> {
        let data = self
            .post_api(
                "reddit submit",
                "/api/submit",
                &[
                    ("sr", self.subreddit.as_str()),
                    ("kind", "self"),
                    ("title", title),
                    ("text", body),
                ],
            )
            .await?;

        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RemoteUnavailable("reddit submit: response has no name".into()))?;

        Ok(Submission {
            id: name.to_string(),
            title: title.to_string(),
            url: data.get("url").and_then(Value::as_str).map(str::to_string),
            author: self.account_name(),
            created_at: Utc::now(),
            score: 1,
            num_comments: 0,
        })
    }

    async fn reply(&self, parent_id: &str, body: &str) -> Result<CommentRef> {
        let data = self
            .post_api(
                "reddit comment",
                "/api/comment",
                &[("thing_id", parent_id), ("text", body)],
            )
            .await?;

        let id = data
            .pointer("/things/0/data/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RemoteUnavailable("reddit comment: response has no id".into()))?;

        Ok(CommentRef {
            id: id.to_string(),
            parent_id: parent_id.to_string(),
        })
    }

    async fn sticky(&self, submission_id: &str) -> Result<()> {
        self.post_api(
            "reddit sticky",
            "/api/set_subreddit_sticky",
            &[("id", submission_id), ("state", "true"), ("num", "1")],
        )
        .await?;
        Ok(())
    }

    async fn set_flair(&self, submission_id: &str, text: &str, css_class: &str) -> Result<()> {
        self.post_api(
            "reddit flair",
            "/api/selectflair",
            &[
                ("link", submission_id),
                ("text", text),
                ("css_class", css_class),
            ],
        )
        .await?;
        Ok(())
    }

    async fn new_submissions(&self, limit: usize) -> Result<Vec<Submission>> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(format!("{}/r/{}/new", self.api_base, self.subreddit))
            .bearer_auth(token)
            .query(&[("limit", limit.to_string()), ("raw_json", "1".to_string())])
            .send()
            .await
            .map_err(|e| transport("reddit new", e))?;

        let listing: Listing = check("reddit new", resp)
            .await?
            .json()
            .await
            .map_err(|e| transport("reddit new", e))?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|c| c.data.into_submission())
            .collect())
    }
}

fn transport(op: &str, e: reqwest::Error) -> Error {
    Error::unavailable(op, e)
}

async fn check(op: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::from_status(op, status.as_u16(), &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn creds() -> RedditCredentials {
        RedditCredentials {
            client_id: "cid".into(),
            client_secret: "csecret".into(),
            username: "postd_bot".into(),
            password: "hunter2".into(),
        }
    }

    fn client(server: &mockito::ServerGuard, creds: Option<RedditCredentials>) -> RedditClient {
        RedditClient::new("CodeDAO", "postd-test/0.1", creds)
            .unwrap()
            .with_base_urls(&server.url(), &server.url())
    }

    async fn token_mock(server: &mut mockito::ServerGuard, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/api/v1/access_token")
            // base64("cid:csecret")
            .match_header("authorization", "Basic Y2lkOmNzZWNyZXQ=")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("username".into(), "postd_bot".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tok1","expires_in":3600,"token_type":"bearer"}"#)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn submit_uses_cached_token_and_returns_fullname() {
        let mut server = mockito::Server::new_async().await;
        let tok = token_mock(&mut server, 1).await;
        let submit = server
            .mock("POST", "/api/submit")
            .match_header("authorization", "Bearer tok1")
            .match_header("user-agent", "postd-test/0.1")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("sr".into(), "CodeDAO".into()),
                Matcher::UrlEncoded("kind".into(), "self".into()),
                Matcher::UrlEncoded("title".into(), "Weekly".into()),
                Matcher::UrlEncoded("api_type".into(), "json".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"json":{"errors":[],"data":{"id":"abc","name":"t3_abc","url":"https://reddit.com/r/CodeDAO/abc"}}}"#,
            )
            .expect(2)
            .create_async()
            .await;

        let c = client(&server, Some(creds()));
        let sub = c.submit("Weekly", "body").await.unwrap();
        assert_eq!(sub.id, "t3_abc");
        assert_eq!(sub.author.as_deref(), Some("postd_bot"));
        c.submit("Weekly", "body").await.unwrap();

        tok.assert_async().await;
        submit.assert_async().await;
    }

    #[tokio::test]
    async fn api_errors_are_rejections() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server, 1).await;
        let _mock = server
            .mock("POST", "/api/comment")
            .with_status(200)
            .with_body(r#"{"json":{"errors":[["RATELIMIT","you are doing that too much","ratelimit"]]}}"#)
            .create_async()
            .await;

        let err = client(&server, Some(creds()))
            .reply("t3_abc", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { .. }));
        assert!(err.to_string().contains("RATELIMIT"));
    }

    #[tokio::test]
    async fn reply_returns_comment_fullname() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server, 1).await;
        let _mock = server
            .mock("POST", "/api/comment")
            .match_body(Matcher::UrlEncoded("thing_id".into(), "t3_abc".into()))
            .with_status(200)
            .with_body(r#"{"json":{"errors":[],"data":{"things":[{"kind":"t1","data":{"name":"t1_xyz"}}]}}}"#)
            .create_async()
            .await;

        let c = client(&server, Some(creds()));
        let comment = c.reply("t3_abc", "welcome!").await.unwrap();
        assert_eq!(comment.id, "t1_xyz");
        assert_eq!(comment.parent_id, "t3_abc");
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/access_token")
            .with_status(200)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let err = client(&server, Some(creds()))
            .sticky("t3_abc")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let server = mockito::Server::new_async().await;
        let err = client(&server, None).new_submissions(5).await.unwrap_err();
        assert!(matches!(err, Error::AuthMissing(_)));
    }

    #[tokio::test]
    async fn new_submissions_parses_listing() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server, 1).await;
        let listing = server
            .mock("GET", "/r/CodeDAO/new")
            .match_query(Matcher::UrlEncoded("limit".into(), "25".into()))
            .with_status(200)
            .with_body(
                r#"{"kind":"Listing","data":{"children":[
                    {"kind":"t3","data":{"name":"t3_1","title":"Need help","author":"alice","created_utc":1704099600.0,"score":4,"num_comments":2}},
                    {"kind":"t3","data":{"name":"t3_2","title":"Show off","author":"bob","created_utc":1704099000.0}}
                ]}}"#,
            )
            .create_async()
            .await;

        let c = client(&server, Some(creds()));
        let subs = c.new_submissions(25).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].id, "t3_1");
        assert_eq!(subs[0].author.as_deref(), Some("alice"));
        assert_eq!(subs[0].created_at.to_rfc3339(), "2024-01-01T09:00:00+00:00");
        assert_eq!(subs[0].metrics().engagement(), 6);
        listing.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server, 1).await;
        let _mock = server
            .mock("GET", "/r/CodeDAO/new")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server, Some(creds()))
            .new_submissions(25)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
