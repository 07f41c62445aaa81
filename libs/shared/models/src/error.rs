use serde_json::Value;
use thiserror::Error;

/// SQLSTATE raised by Postgres when an exclusion constraint rejects a row.
pub const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Constraint violation ({code}): {message}")]
    ConstraintViolation { code: String, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl DatabaseError {
    /// Classify a non-success PostgREST response.
    ///
    /// PostgREST reports Postgres errors as `{"code": "...", "message": "..."}`;
    /// integrity violations (SQLSTATE class 23) arrive as HTTP 409.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let code = parsed
            .as_ref()
            .and_then(|v| v.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());

        match (status, code) {
            (_, Some(code)) if code.starts_with("23") => {
                DatabaseError::ConstraintViolation { code, message }
            }
            (409, code) => DatabaseError::ConstraintViolation {
                code: code.unwrap_or_default(),
                message,
            },
            (401 | 403, _) => DatabaseError::Auth(message),
            (404, _) => DatabaseError::NotFound(message),
            (status, _) if status >= 500 => DatabaseError::Transport(format!("{}: {}", status, message)),
            (status, _) => DatabaseError::Api { status, message },
        }
    }

    pub fn is_exclusion_violation(&self) -> bool {
        matches!(self, DatabaseError::ConstraintViolation { code, .. } if code == EXCLUSION_VIOLATION)
    }

    /// Whether retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Transport(_))
    }
}
