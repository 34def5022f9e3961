use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};

use postd_core::{errors::Error, Result};

pub(crate) const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
pub(crate) const POSTD_USER_AGENT: &str = "postd";

/// Default headers for authenticated GitHub REST calls.
pub(crate) fn github_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(POSTD_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
    let auth = HeaderValue::from_str(&format!("token {}", token.trim()))
        .map_err(|_| Error::Config("github token contains invalid header characters".into()))?;
    headers.insert(AUTHORIZATION, auth);
    Ok(headers)
}

pub(crate) fn client(headers: HeaderMap) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| Error::Config(format!("http client build failed: {e}")))
}

pub(crate) fn transport(op: &str, e: reqwest::Error) -> Error {
    Error::unavailable(op, e)
}

/// Pass 2xx through; everything else maps through [`Error::from_status`].
pub(crate) async fn check(op: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::from_status(op, status.as_u16(), &body))
}
