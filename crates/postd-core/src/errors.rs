/// Core error type for the dispatcher.
///
/// Adapter crates map their transport errors into this type so the dispatcher
/// can branch on failure kind (retry next tick vs surface) without inspecting
/// message strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no credential found: {0}")]
    AuthMissing(String),

    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("invalid webhook signature")]
    SignatureInvalid,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("state lock error: {0}")]
    Lock(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the remote side reported a conflicting revision (stale sha).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::RemoteRejected { status: 409 | 422, .. })
    }

    /// True when nothing was changed remotely and the next tick may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_) | Error::Lock(_))
    }

    /// Network failure or timeout of an outbound call: nothing changed remotely.
    pub fn unavailable(op: &str, e: impl std::fmt::Display) -> Self {
        Error::RemoteUnavailable(format!("{op}: {e}"))
    }

    /// Non-2xx HTTP answer: 4xx is `RemoteRejected`, anything else `RemoteUnavailable`.
    /// The response body is cut to the first 300 characters.
    pub fn from_status(op: &str, status: u16, body: &str) -> Self {
        let body: String = body.chars().take(MAX_BODY_CHARS).collect();
        if (400..500).contains(&status) {
            Error::RemoteRejected {
                status,
                message: format!("{op}: {body}"),
            }
        } else {
            Error::RemoteUnavailable(format!("{op}: {status} {body}"))
        }
    }
}

const MAX_BODY_CHARS: usize = 300;

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_rejections_and_the_rest_unavailable() {
        let e = Error::from_status("github contents put", 409, "sha mismatch");
        assert!(e.is_conflict());
        assert!(!e.is_retryable());
        assert_eq!(
            e.to_string(),
            "remote rejected request (409): github contents put: sha mismatch"
        );

        let e = Error::from_status("reddit new", 503, "");
        assert!(e.is_retryable());
        assert!(matches!(e, Error::RemoteUnavailable(ref m) if m.starts_with("reddit new: 503")));
    }

    #[test]
    fn long_bodies_are_cut() {
        let body = "x".repeat(1000);
        match Error::from_status("op", 400, &body) {
            Error::RemoteRejected { message, .. } => {
                assert_eq!(message.len(), "op: ".len() + 300)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
