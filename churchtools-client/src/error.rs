use churchtools_core::{
    error_message_key, translated_error_message, ErrorResponse, InstallationError,
};
use churchtools_transport::TransportError;
use serde_json::Value;
use thiserror::Error;

/// Every failure the client can surface.
///
/// Session expiry and rate limiting are normally recovered inside the
/// pipeline; `Unauthorized` only reaches callers once recovery gave up.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Unauthorized: {0}")]
    Unauthorized(ErrorResponse),
    #[error("{0}")]
    Status(ErrorResponse),
    #[error("Legacy call failed: {0}")]
    LegacyCall(ErrorResponse),
    #[error("Request to '{url}' returned no JSON. Return value is:\n {body}")]
    NoJson { url: String, body: String },
    #[error(transparent)]
    Installation(#[from] InstallationError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Login task failed: {0}")]
    LoginTask(String),
}

impl ClientError {
    /// The response behind this error, when there was one.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            ClientError::Unauthorized(r) | ClientError::Status(r) | ClientError::LegacyCall(r) => {
                Some(r)
            }
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    /// Stable key for localisation, taken from the server body or the
    /// installation probe.
    pub fn message_key(&self) -> Option<String> {
        match self {
            ClientError::Installation(e) => Some(e.message_key.clone()),
            _ => self.response().and_then(|r| error_message_key(&r.body)),
        }
    }

    /// Display text, preferring the server's own (translated) message.
    pub fn translated_message(&self, translate: Option<&dyn Fn(&str, &Value) -> String>) -> String {
        self.response()
            .and_then(|r| translated_error_message(&r.body, translate))
            .unwrap_or_else(|| self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_response_accessors() {
        let err = ClientError::Status(ErrorResponse::new(
            404,
            "https://a/api/persons/9",
            json!({"message": "Not found", "messageKey": "person.notfound"}),
        ));
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.message_key().as_deref(), Some("person.notfound"));
        assert_eq!(err.translated_message(None), "Not found");
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_transport_has_no_status() {
        let err = ClientError::from(TransportError::Timeout(Duration::from_millis(15)));
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(err.translated_message(None), err.to_string());
    }

    #[test]
    fn test_installation_key() {
        let err = ClientError::from(InstallationError::offline());
        assert_eq!(err.message_key().as_deref(), Some("churchtools.url.offline"));
    }
}
