use url::Url;

use crate::AiError;

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> AiError {
    if err.is_timeout() {
        AiError::Timeout
    } else {
        AiError::from(err)
    }
}

/// Join `path` onto `base`, treating `base` as a directory whether or not it has a
/// trailing slash.
pub(crate) fn join_endpoint(base: &Url, path: &str) -> Result<Url, AiError> {
    let base_str = base.as_str().trim_end_matches('/').to_string();
    let base = Url::parse(&format!("{base_str}/"))?;
    Ok(base.join(path.trim_start_matches('/'))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_endpoint_keeps_base_path() {
        let base = Url::parse("http://localhost:11434/proxy").unwrap();
        assert_eq!(
            join_endpoint(&base, "/api/chat").unwrap().as_str(),
            "http://localhost:11434/proxy/api/chat"
        );

        let base = Url::parse("http://localhost:11434/").unwrap();
        assert_eq!(
            join_endpoint(&base, "api/embed").unwrap().as_str(),
            "http://localhost:11434/api/embed"
        );
    }
}
