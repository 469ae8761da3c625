use std::sync::{Arc, OnceLock};
use std::{error::Error, fmt};

#[derive(Clone)]
pub enum AiError {
    Http(Arc<reqwest::Error>),
    Json(Arc<serde_json::Error>),
    Url(url::ParseError),
    InvalidConfig(String),
    Timeout,
    Cancelled,
    UnexpectedResponse(String),
}

impl AiError {
    /// Whether the backend could not be reached at all (refused connection or timeout).
    ///
    /// Such failures are surfaced as "service unavailable" and never retried here.
    pub fn is_unavailable(&self) -> bool {
        match self {
            AiError::Timeout => true,
            AiError::Http(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(Arc::new(err))
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<url::ParseError> for AiError {
    fn from(err: url::ParseError) -> Self {
        Self::Url(err)
    }
}

/// Strip query strings from any URL embedded in `text`.
///
/// `reqwest` errors include the request URL, and API keys sometimes travel as query
/// parameters.
pub(crate) fn sanitize_error_text(text: &str) -> String {
    static URL_QUERY_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    match URL_QUERY_RE.get_or_init(|| regex::Regex::new(r"(https?://[^\s?#)]+)\?[^\s)]*").ok()) {
        Some(re) => re.replace_all(text, "$1").into_owned(),
        None => text.to_owned(),
    }
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::Http(err) => {
                let sanitized = sanitize_error_text(&err.to_string());
                write!(f, "http error: {sanitized}")
            }
            AiError::Json(err) => write!(f, "json error: {err}"),
            AiError::Url(err) => write!(f, "url error: {err}"),
            AiError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            AiError::Timeout => f.write_str("request timed out"),
            AiError::Cancelled => f.write_str("request cancelled"),
            AiError::UnexpectedResponse(msg) => {
                let sanitized = sanitize_error_text(msg);
                write!(f, "unexpected response: {sanitized}")
            }
        }
    }
}

impl fmt::Debug for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::Http(err) => f
                .debug_struct("AiError::Http")
                .field("message", &sanitize_error_text(&err.to_string()))
                .field("status", &err.status().map(|s| s.as_u16()))
                .field("is_timeout", &err.is_timeout())
                .field("is_connect", &err.is_connect())
                .finish(),
            AiError::Json(err) => f
                .debug_struct("AiError::Json")
                .field("message", &err.to_string())
                .finish(),
            AiError::Url(err) => f.debug_tuple("AiError::Url").field(err).finish(),
            AiError::InvalidConfig(msg) => f
                .debug_struct("AiError::InvalidConfig")
                .field("message", msg)
                .finish(),
            AiError::Timeout => f.write_str("AiError::Timeout"),
            AiError::Cancelled => f.write_str("AiError::Cancelled"),
            AiError::UnexpectedResponse(msg) => f
                .debug_struct("AiError::UnexpectedResponse")
                .field("message", &sanitize_error_text(msg))
                .finish(),
        }
    }
}

impl Error for AiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AiError::Url(err) => Some(err),
            // reqwest errors carry unsanitized URLs; keep them out of source chains.
            AiError::Http(_)
            | AiError::Json(_)
            | AiError::InvalidConfig(_)
            | AiError::Timeout
            | AiError::Cancelled
            | AiError::UnexpectedResponse(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn refused_connection_is_unavailable_and_display_strips_query() {
        let secret = "sk-verysecret-0123456789";

        // Bind an ephemeral port, then close it so the connection is refused.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let port = listener.local_addr().expect("listener addr").port();
        drop(listener);

        let url = format!("http://127.0.0.1:{port}/api/chat?key={secret}");
        let reqwest_err = reqwest::Client::new()
            .get(url)
            .timeout(Duration::from_millis(500))
            .send()
            .await
            .expect_err("expected request to fail");

        let ai_err = AiError::from(reqwest_err);
        assert!(ai_err.is_unavailable(), "got {ai_err:?}");

        let message = ai_err.to_string();
        assert!(!message.contains(secret), "{message}");
        let debug = format!("{ai_err:?}");
        assert!(!debug.contains(secret), "{debug}");
        assert!(ai_err.source().is_none());
    }

    #[test]
    fn semantic_failures_are_not_unavailable() {
        assert!(AiError::Timeout.is_unavailable());
        assert!(!AiError::Cancelled.is_unavailable());
        assert!(!AiError::UnexpectedResponse("nope".into()).is_unavailable());
        assert!(!AiError::InvalidConfig("bad".into()).is_unavailable());
    }

    #[test]
    fn sanitize_keeps_url_path() {
        assert_eq!(
            sanitize_error_text("error sending request for url (http://h:1/api/chat?key=abc)"),
            "error sending request for url (http://h:1/api/chat)"
        );
    }
}
