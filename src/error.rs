//! Errors surfaced through a governed request's future.
//!
//! Every outbound call made through a [`Governor`](crate::governor::Governor)
//! resolves to exactly one of these. Rate-limit rejections never appear here
//! unless the retry cap is exhausted, in which case they surface as
//! [`HttpError::Http`] with status 429.

use http::StatusCode;

/// Longest body excerpt kept on an error.
const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The governor has no transport, or the request could not be built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network-level failure below HTTP (DNS, reset, timeout).
    #[error("transport error on {route}: {message}")]
    Transport { route: String, message: String },

    /// Non-2xx status from the remote API.
    #[error("HTTP {status} on {route}: {body}")]
    Http {
        status: StatusCode,
        body: String,
        route: String,
    },

    /// The body did not have the expected shape.
    #[error("failed to decode response from {route}: {message}")]
    Decoding { route: String, message: String },
}

impl HttpError {
    /// Status code for [`HttpError::Http`], `None` for everything else.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn decoding(route: &str, err: impl std::fmt::Display, body: &[u8]) -> Self {
        HttpError::Decoding {
            route: route.to_string(),
            message: format!("{}: {}", err, excerpt(body)),
        }
    }

    pub(crate) fn http(route: &str, status: StatusCode, body: &[u8]) -> Self {
        HttpError::Http {
            status,
            body: excerpt(body),
            route: route.to_string(),
        }
    }
}

/// Lossy UTF-8 view of the first [`BODY_EXCERPT_LEN`] characters of `body`.
fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_EXCERPT_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_for_http_variant() {
        let err = HttpError::http("cards", StatusCode::NOT_FOUND, b"nope");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

        let err = HttpError::Configuration("no transport".into());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn body_excerpt_is_capped() {
        let body = "x".repeat(1000);
        match HttpError::http("cards", StatusCode::BAD_REQUEST, body.as_bytes()) {
            HttpError::Http { body, .. } => assert_eq!(body.len(), BODY_EXCERPT_LEN),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn display_mentions_route() {
        let err = HttpError::Transport {
            route: "sets/:id".into(),
            message: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "transport error on sets/:id: connection reset"
        );
    }
}
