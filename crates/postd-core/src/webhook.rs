//! Inbound triggers: signature check, per-platform event normalization and
//! mapping onto dispatcher calls.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::{
    dispatcher::{ActionRequest, Dispatcher, Outcome},
    domain::MilestoneData,
    errors::Error,
    utils::iso_timestamp,
    Result,
};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

// ============== Signatures ==============

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check `header` against HMAC-SHA256(secret, body) in constant time.
///
/// Without a secret every request is accepted (open mode) and a warning is
/// logged each time.
pub fn verify_signature(secret: Option<&str>, body: &[u8], header: Option<&str>) -> Result<()> {
    let Some(secret) = secret else {
        tracing::warn!("webhook secret not configured; accepting unsigned request");
        return Ok(());
    };

    let provided = header
        .map(str::trim)
        .and_then(|h| h.strip_prefix(SIGNATURE_PREFIX))
        .and_then(|h| hex::decode(h).ok())
        .ok_or(Error::SignatureInvalid)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| Error::SignatureInvalid)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| Error::SignatureInvalid)
}

// ============== Events ==============

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    #[default]
    WeeklyThread,
    Milestone,
    MonitorPosts,
    Analytics,
}

impl TriggerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerAction::WeeklyThread => "weekly_thread",
            TriggerAction::Milestone => "milestone",
            TriggerAction::MonitorPosts => "monitor_posts",
            TriggerAction::Analytics => "analytics",
        }
    }
}

impl FromStr for TriggerAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "weekly_thread" => Ok(TriggerAction::WeeklyThread),
            "milestone" => Ok(TriggerAction::Milestone),
            "monitor_posts" => Ok(TriggerAction::MonitorPosts),
            "analytics" => Ok(TriggerAction::Analytics),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

/// Canonical trigger, whatever platform delivered it.
///
/// `action` stays a raw string so an unknown value is reported as a client
/// error instead of failing deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub milestone_data: Option<MilestoneData>,
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for TriggerEvent {
    fn default() -> Self {
        Self {
            action: default_action(),
            milestone_data: None,
            source: default_source(),
        }
    }
}

fn default_action() -> String {
    TriggerAction::WeeklyThread.as_str().to_string()
}

fn default_source() -> String {
    "manual".to_string()
}

/// Lambda: the event object is the trigger itself.
pub fn normalize_lambda(event: Value) -> Result<TriggerEvent> {
    if event.is_null() {
        return Ok(TriggerEvent::default());
    }
    Ok(serde_json::from_value(event)?)
}

/// Vercel: only POST carries a trigger; other methods get an info response.
pub fn normalize_vercel(method: &str, body: &[u8]) -> Result<Option<TriggerEvent>> {
    if !method.eq_ignore_ascii_case("POST") {
        return Ok(None);
    }
    let mut event = parse_body(body)?;
    event.source = "vercel".to_string();
    Ok(Some(event))
}

/// Netlify: the trigger is a JSON string under `body`.
pub fn normalize_netlify(event: Value) -> Result<TriggerEvent> {
    let raw = event.get("body").and_then(Value::as_str).unwrap_or("");
    let mut trigger = parse_body(raw.as_bytes())?;
    trigger.source = "netlify".to_string();
    Ok(trigger)
}

fn parse_body(body: &[u8]) -> Result<TriggerEvent> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerEvent::default());
    }
    Ok(serde_json::from_slice(body)?)
}

// ============== Adapter ==============

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HandlerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl HandlerResponse {
    fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    fn error(status_code: u16, err: &Error, now: DateTime<Utc>) -> Self {
        Self {
            status_code,
            body: json!({
                "success": false,
                "error": err.to_string(),
                "timestamp": iso_timestamp(now),
            }),
        }
    }

    /// Serverless shape: `body` is a JSON-encoded string.
    pub fn to_platform_json(&self) -> Value {
        json!({
            "statusCode": self.status_code,
            "body": self.body.to_string(),
        })
    }
}

pub struct TriggerAdapter {
    dispatcher: Arc<Dispatcher>,
    secret: Option<String>,
}

impl TriggerAdapter {
    pub fn new(dispatcher: Arc<Dispatcher>, secret: Option<String>) -> Self {
        Self { dispatcher, secret }
    }

    /// Verify, parse and handle a raw webhook body.
    pub async fn handle_signed(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> HandlerResponse {
        if let Err(e) = verify_signature(self.secret.as_deref(), body, signature) {
            tracing::warn!("rejected webhook with invalid signature");
            return HandlerResponse::error(401, &e, now);
        }
        match parse_body(body) {
            Ok(event) => self.handle(event, now).await,
            Err(e) => HandlerResponse::error(400, &e, now),
        }
    }

    /// Vercel-style endpoint. POST bodies are signature-checked like webhooks.
    pub async fn handle_vercel(
        &self,
        method: &str,
        body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> HandlerResponse {
        if method.eq_ignore_ascii_case("POST") {
            if let Err(e) = verify_signature(self.secret.as_deref(), body, signature) {
                return HandlerResponse::error(401, &e, now);
            }
        }
        match normalize_vercel(method, body) {
            Ok(None) => HandlerResponse::ok(json!({ "message": "postd trigger API" })),
            Ok(Some(event)) => self.handle(event, now).await,
            Err(e) => HandlerResponse::error(400, &e, now),
        }
    }

    /// Lambda invocation. Authenticated by the hosting platform, so unsigned.
    pub async fn handle_lambda(&self, event: Value, now: DateTime<Utc>) -> HandlerResponse {
        match normalize_lambda(event) {
            Ok(event) => self.handle(event, now).await,
            Err(e) => HandlerResponse::error(400, &e, now),
        }
    }

    /// Netlify function invocation. Authenticated by the hosting platform, so unsigned.
    pub async fn handle_netlify(&self, event: Value, now: DateTime<Utc>) -> HandlerResponse {
        match normalize_netlify(event) {
            Ok(event) => self.handle(event, now).await,
            Err(e) => HandlerResponse::error(400, &e, now),
        }
    }

    pub async fn handle(&self, event: TriggerEvent, now: DateTime<Utc>) -> HandlerResponse {
        match self.run(&event, now).await {
            Ok(resp) => resp,
            Err(e @ Error::UnknownAction(_)) => HandlerResponse::error(400, &e, now),
            Err(e @ Error::SignatureInvalid) => HandlerResponse::error(401, &e, now),
            Err(e) => {
                tracing::error!(
                    action = %event.action,
                    source = %event.source,
                    error = %e,
                    "trigger failed"
                );
                HandlerResponse::error(500, &e, now)
            }
        }
    }

    async fn run(&self, event: &TriggerEvent, now: DateTime<Utc>) -> Result<HandlerResponse> {
        let action: TriggerAction = event.action.parse()?;
        tracing::info!(action = action.as_str(), source = %event.source, "trigger received");

        let (status, result) = match action {
            TriggerAction::WeeklyThread => {
                let outcome = self
                    .dispatcher
                    .dispatch(ActionRequest::WeeklyThread, now)
                    .await?;
                outcome_result(&outcome)?
            }
            TriggerAction::Milestone => {
                let data = event.milestone_data.clone().unwrap_or_default();
                let outcome = self
                    .dispatcher
                    .dispatch(ActionRequest::Milestone(data), now)
                    .await?;
                outcome_result(&outcome)?
            }
            TriggerAction::MonitorPosts => {
                let report = self.dispatcher.monitor(now).await?;
                ("completed", serde_json::to_value(report)?)
            }
            TriggerAction::Analytics => {
                let dashboard = self.dispatcher.store().dashboard(now)?;
                return Ok(HandlerResponse::ok(serde_json::to_value(dashboard)?));
            }
        };

        Ok(HandlerResponse::ok(json!({
            "success": true,
            "action": action.as_str(),
            "status": status,
            "result": result,
            "timestamp": iso_timestamp(now),
        })))
    }
}

fn outcome_result(outcome: &Outcome) -> Result<(&'static str, Value)> {
    let result = match outcome {
        Outcome::Recorded(record) => serde_json::to_value(record)?,
        Outcome::NotDue | Outcome::RateLimited => Value::Null,
    };
    Ok((outcome.status(), result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analytics::AnalyticsStore,
        config::Config,
        domain::{CommentRef, Submission},
        platform::SocialPlatform,
    };
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePlatform {
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SocialPlatform for FakePlatform {
        fn account_name(&self) -> Option<String> {
            None
        }

        async fn submit(&self, title: &str, _body: &str) -> Result<Submission> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::RemoteRejected {
                    status: 403,
                    message: "SUBREDDIT_NOTALLOWED".into(),
                });
            }
            Ok(Submission {
                id: "t3_abc".into(),
                title: title.into(),
                url: None,
                author: None,
                created_at: Utc::now(),
                score: 0,
                num_comments: 0,
            })
        }

        async fn reply(&self, parent_id: &str, _body: &str) -> Result<CommentRef> {
            Ok(CommentRef {
                id: "t1_x".into(),
                parent_id: parent_id.into(),
            })
        }

        async fn sticky(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn set_flair(&self, _id: &str, _text: &str, _css: &str) -> Result<()> {
            Ok(())
        }

        async fn new_submissions(&self, _limit: usize) -> Result<Vec<Submission>> {
            Ok(Vec::new())
        }
    }

    fn monday_nine() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn adapter(
        dir: &tempfile::TempDir,
        secret: Option<&str>,
    ) -> (TriggerAdapter, Arc<FakePlatform>) {
        let mut cfg = Config::from_vars(|_| None).unwrap();
        cfg.state_file = dir.path().join("analytics.json");
        let platform = Arc::new(FakePlatform::default());
        let store = Arc::new(AnalyticsStore::open(cfg.state_file.clone()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(cfg), platform.clone(), store));
        (
            TriggerAdapter::new(dispatcher, secret.map(str::to_string)),
            platform,
        )
    }

    #[test]
    fn valid_signature_passes_and_any_mutation_fails() {
        let body = br#"{"action":"weekly_thread"}"#;
        let sig = sign("s3cret", body).unwrap();
        assert!(verify_signature(Some("s3cret"), body, Some(&sig)).is_ok());

        for i in 0..body.len() {
            let mut mutated = body.to_vec();
            mutated[i] ^= 0x01;
            assert!(
                verify_signature(Some("s3cret"), &mutated, Some(&sig)).is_err(),
                "body byte {i}"
            );
        }

        let hex_start = SIGNATURE_PREFIX.len();
        for i in hex_start..sig.len() {
            let mut bytes = sig.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(
                verify_signature(Some("s3cret"), body, Some(&mutated)).is_err(),
                "signature byte {i}"
            );
        }

        assert!(verify_signature(Some("other"), body, Some(&sig)).is_err());
    }

    #[test]
    fn missing_or_malformed_header_is_rejected() {
        let body = b"{}";
        assert!(matches!(
            verify_signature(Some("k"), body, None),
            Err(Error::SignatureInvalid)
        ));
        let bare = sign("k", body).unwrap().trim_start_matches(SIGNATURE_PREFIX).to_string();
        assert!(verify_signature(Some("k"), body, Some(&bare)).is_err());
        assert!(verify_signature(Some("k"), body, Some("sha256=zz")).is_err());
    }

    #[test]
    fn open_mode_accepts_anything() {
        assert!(verify_signature(None, b"{}", None).is_ok());
        assert!(verify_signature(None, b"{}", Some("sha256=00")).is_ok());
    }

    #[test]
    fn normalizers_fill_defaults_and_source() {
        let ev = normalize_lambda(json!({})).unwrap();
        assert_eq!(ev, TriggerEvent::default());
        assert_eq!(ev.source, "manual");

        assert!(normalize_vercel("GET", b"").unwrap().is_none());
        let ev = normalize_vercel("post", br#"{"action":"analytics"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(ev.action, "analytics");
        assert_eq!(ev.source, "vercel");

        let ev = normalize_netlify(json!({
            "body": r#"{"action":"milestone","milestone_data":{"title":"v1.0"}}"#
        }))
        .unwrap();
        assert_eq!(ev.source, "netlify");
        let data = ev.milestone_data.unwrap();
        assert_eq!(data.kind, "general");
        assert_eq!(data.title.as_deref(), Some("v1.0"));

        assert!(normalize_netlify(json!({ "body": "{nope" })).is_err());
    }

    #[tokio::test]
    async fn bad_signature_is_401_without_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (a, platform) = adapter(&dir, Some("s3cret"));

        let body = br#"{"action":"weekly_thread"}"#;
        let resp = a
            .handle_signed(body, Some(&sign("wrong", body).unwrap()), monday_nine())
            .await;
        assert_eq!(resp.status_code, 401);
        assert_eq!(platform.calls.load(Ordering::SeqCst), 0);

        let resp = a
            .handle_signed(body, Some(&sign("s3cret", body).unwrap()), monday_nine())
            .await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["status"], "recorded");
        assert_eq!(resp.body["result"]["external_id"], "t3_abc");
        assert_eq!(platform.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_weekly_trigger_is_not_due() {
        let dir = tempfile::tempdir().unwrap();
        let (a, platform) = adapter(&dir, None);

        let first = a.handle(TriggerEvent::default(), monday_nine()).await;
        assert_eq!(first.body["status"], "recorded");
        let second = a.handle(TriggerEvent::default(), monday_nine()).await;
        assert_eq!(second.status_code, 200);
        assert_eq!(second.body["status"], "not_due");
        assert_eq!(platform.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_action_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = adapter(&dir, None);
        let ev = TriggerEvent {
            action: "post_everything".into(),
            ..TriggerEvent::default()
        };
        let resp = a.handle(ev, monday_nine()).await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.body["success"], false);
    }

    #[tokio::test]
    async fn platform_error_is_500_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let (a, platform) = adapter(&dir, None);
        platform.fail.store(true, Ordering::SeqCst);

        let resp = a.handle(TriggerEvent::default(), monday_nine()).await;
        assert_eq!(resp.status_code, 500);
        assert!(resp.body["error"]
            .as_str()
            .unwrap()
            .contains("SUBREDDIT_NOTALLOWED"));

        let wrapped = resp.to_platform_json();
        assert_eq!(wrapped["statusCode"], 500);
        assert!(wrapped["body"].is_string());
    }

    #[tokio::test]
    async fn analytics_returns_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = adapter(&dir, None);
        a.handle(TriggerEvent::default(), monday_nine()).await;

        let ev = TriggerEvent {
            action: "analytics".into(),
            ..TriggerEvent::default()
        };
        let resp = a.handle(ev, monday_nine()).await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["overview"]["total_threads"], 1);
    }

    #[tokio::test]
    async fn lambda_and_netlify_entry_points() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = adapter(&dir, Some("k"));

        let resp = a
            .handle_lambda(json!({ "action": "analytics" }), monday_nine())
            .await;
        assert_eq!(resp.status_code, 200);

        let resp = a
            .handle_lambda(json!({ "action": 7 }), monday_nine())
            .await;
        assert_eq!(resp.status_code, 400);

        let resp = a
            .handle_netlify(json!({ "body": "{\"action\":\"nope\"}" }), monday_nine())
            .await;
        assert_eq!(resp.status_code, 400);
        assert!(resp.body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn vercel_get_returns_info() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = adapter(&dir, Some("k"));
        let resp = a.handle_vercel("GET", b"", None, monday_nine()).await;
        assert_eq!(resp.status_code, 200);
        assert!(resp.body.get("message").is_some());

        let resp = a
            .handle_vercel("POST", br#"{"action":"analytics"}"#, None, monday_nine())
            .await;
        assert_eq!(resp.status_code, 401);
    }
}
