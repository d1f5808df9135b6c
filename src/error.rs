//! Error taxonomy for the client core.
//!
//! Four classes of failure reach callers: transport errors (no response
//! obtained), server errors (well-formed failure response, message passed
//! through verbatim), authentication errors (token retrieval failed or was
//! rejected), and not-found/permission errors on single-item reads. The
//! cache layer stores these and re-exposes them to every reader of the
//! affected key; it never retries on its own.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  /// Request failed before a response was obtained.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The backend returned a failure status with a message payload.
  #[error("server error ({status}): {message}")]
  Server { status: u16, message: String },

  /// Token retrieval failed at call time, or the backend rejected the token.
  /// Never retried automatically; the caller decides whether to re-login.
  #[error("authentication error: {0}")]
  Auth(String),

  /// The requested entity does not exist.
  #[error("not found")]
  NotFound,

  /// The caller is not allowed to access this entity.
  #[error("permission denied")]
  Forbidden,

  /// A response or cached payload could not be decoded.
  #[error("decode error: {0}")]
  Decode(#[from] serde_json::Error),
}

impl ApiError {
  /// Classify a non-success HTTP status, passing the body message through.
  pub fn from_status(status: StatusCode, message: String) -> Self {
    match status {
      StatusCode::UNAUTHORIZED => ApiError::Auth(if message.is_empty() {
        "token rejected".to_string()
      } else {
        message
      }),
      StatusCode::FORBIDDEN => ApiError::Forbidden,
      StatusCode::NOT_FOUND => ApiError::NotFound,
      _ => ApiError::Server {
        status: status.as_u16(),
        message,
      },
    }
  }

  /// Whether this failure should prompt a re-login rather than a generic
  /// error message.
  pub fn is_auth(&self) -> bool {
    matches!(self, ApiError::Auth(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert!(matches!(
      ApiError::from_status(StatusCode::NOT_FOUND, String::new()),
      ApiError::NotFound
    ));
    assert!(matches!(
      ApiError::from_status(StatusCode::FORBIDDEN, String::new()),
      ApiError::Forbidden
    ));
    assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_auth());

    match ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "name taken".to_string()) {
      ApiError::Server { status, message } => {
        assert_eq!(status, 422);
        assert_eq!(message, "name taken");
      }
      other => panic!("expected server error, got {other:?}"),
    }
  }

  #[test]
  fn test_server_message_passed_through() {
    let err = ApiError::from_status(
      StatusCode::BAD_REQUEST,
      "image exceeds maximum size".to_string(),
    );
    assert_eq!(
      err.to_string(),
      "server error (400): image exceeds maximum size"
    );
  }
}
