use std::path::PathBuf;
use std::sync::OnceLock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {message}")]
    Json { message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        // Dream titles are user text; keep string values out of error messages.
        Self::Json {
            message: sanitize_json_error_message(&err.to_string()),
        }
    }
}

fn sanitize_json_error_message(message: &str) -> String {
    static QUOTED: OnceLock<Option<regex::Regex>> = OnceLock::new();
    match QUOTED.get_or_init(|| regex::Regex::new(r#""(?:[^"\\]|\\.)*""#).ok()) {
        Some(re) => re.replace_all(message, "<redacted>").into_owned(),
        None => message.to_owned(),
    }
}
