//! Adapter invocation errors

use thiserror::Error;

/// A single provider call failed.
///
/// These never reach callers directly: the fallback chain records them
/// against the provider and moves on.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connection, TLS or request-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The SMTP relay rejected a command
    #[error("SMTP {code}: {message}")]
    Smtp { code: u16, message: String },

    /// Credentials were rejected or could not be exchanged
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response did not have the expected shape
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The input is something this provider cannot handle
    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Build an [`AdapterError::Http`], truncating long bodies
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        AdapterError::Http {
            status,
            body: truncate_body(body.into()),
        }
    }
}

const MAX_BODY_LEN: usize = 512;

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_BODY_LEN {
        let mut cut = MAX_BODY_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        // Strip the URL; it may carry an API key in its query string
        AdapterError::Transport(e.without_url().to_string())
    }
}

/// Turn a non-success response into [`AdapterError::Http`]
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(AdapterError::Auth(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate_body(body)
        )));
    }
    Err(AdapterError::http(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_http_bodies_are_truncated() {
        let err = AdapterError::http(500, "x".repeat(2000));
        match err {
            AdapterError::Http { status, body } => {
                assert_eq!(status, 500);
                assert!(body.len() <= 515);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_long_auth_bodies_are_truncated() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("é".repeat(2000)))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        match check_status(response).await {
            Err(AdapterError::Auth(message)) => {
                assert!(message.starts_with("HTTP 401: "));
                assert!(message.len() <= "HTTP 401: ".len() + MAX_BODY_LEN + 3);
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.status())),
        }
    }

    #[test]
    fn test_display_includes_status() {
        assert_eq!(
            AdapterError::http(503, "busy").to_string(),
            "HTTP 503: busy"
        );
    }
}
