// JSON bodies for requests rejected before the websocket upgrade.

use super::auth::AuthError;

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    // Stable machine-readable reason, e.g. "missing_token".
    pub code: &'static str,
    pub error: String,
}

impl From<AuthError> for ErrorResponse {
    fn from(e: AuthError) -> Self {
        Self {
            code: e.code(),
            error: e.to_string(),
        }
    }
}
