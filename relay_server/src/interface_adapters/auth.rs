// Static bearer token check applied before a WebSocket upgrade.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => f.write_str("missing authorization header"),
            AuthError::InvalidToken => f.write_str("invalid authorization token"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    pub fn code(self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken => "invalid_token",
        }
    }
}

/// Accepts the request only when its Authorization header equals `expected`.
pub fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    // Non-ASCII header bytes can never match a configured token.
    let presented = value.to_str().map_err(|_| AuthError::InvalidToken)?;

    if presented.is_empty() {
        return Err(AuthError::MissingToken);
    }
    if presented != expected {
        return Err(AuthError::InvalidToken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn when_header_matches_token_then_request_is_authorized() {
        assert_eq!(authorize(&headers_with("s3cret"), "s3cret"), Ok(()));
    }

    #[test]
    fn when_header_is_missing_then_returns_missing_token() {
        assert_eq!(
            authorize(&HeaderMap::new(), "s3cret"),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn when_header_is_empty_then_returns_missing_token() {
        assert_eq!(
            authorize(&headers_with(""), "s3cret"),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn when_header_differs_then_returns_invalid_token() {
        assert_eq!(
            authorize(&headers_with("wrong"), "s3cret"),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            authorize(&headers_with("s3cret "), "s3cret"),
            Err(AuthError::InvalidToken)
        );
    }
}
