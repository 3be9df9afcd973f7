use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A non-successful HTTP response, kept whole so callers can inspect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub url: String,
    pub body: Value,
}

impl ErrorResponse {
    pub fn new(status: u16, url: impl Into<String>, body: Value) -> Self {
        ErrorResponse {
            status,
            url: url.into(),
            body,
        }
    }

    /// The server supplied `message`, looking through one `data` envelope.
    pub fn message(&self) -> Option<&str> {
        self.body
            .get("message")
            .or_else(|| self.body.get("data").and_then(|d| d.get("message")))
            .and_then(Value::as_str)
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "HTTP {} from {}: {}", self.status, self.url, message),
            None => write!(f, "HTTP {} from {}", self.status, self.url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationErrorKind {
    /// The server is an installation, but its build is below the minimum.
    TooOld,
    /// The URL does not point to an installation at all.
    Invalid,
    /// The request never produced an HTTP status.
    Offline,
}

impl InstallationErrorKind {
    pub fn message_key(&self) -> &'static str {
        match self {
            InstallationErrorKind::TooOld => "churchtools.url.invalidold",
            InstallationErrorKind::Invalid => "churchtools.url.invalid",
            InstallationErrorKind::Offline => "churchtools.url.offline",
        }
    }
}

/// Failure of an installation probe. Carries a stable message key and the
/// arguments a translation layer needs to render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct InstallationError {
    pub kind: InstallationErrorKind,
    pub message: String,
    #[serde(rename = "messageKey")]
    pub message_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl InstallationError {
    pub fn too_old(url: &str, minimal_version: &str) -> Self {
        let mut args = BTreeMap::new();
        args.insert("url".to_string(), url.to_string());
        args.insert(
            "minimalChurchToolsVersion".to_string(),
            minimal_version.to_string(),
        );
        Self::build(
            InstallationErrorKind::TooOld,
            format!(
                "The url {} points to a ChurchTools Installation, but its version is too old. \
                 At least version {} is required.",
                url, minimal_version
            ),
            args,
        )
    }

    pub fn invalid(url: &str) -> Self {
        let mut args = BTreeMap::new();
        args.insert("url".to_string(), url.to_string());
        Self::build(
            InstallationErrorKind::Invalid,
            format!(
                "The url {} does not point to a valid ChurchTools installation.",
                url
            ),
            args,
        )
    }

    pub fn offline() -> Self {
        Self::build(
            InstallationErrorKind::Offline,
            "Could not validate the url. Either the url is wrong or there is a problem with the \
             internet connection"
                .to_string(),
            BTreeMap::new(),
        )
    }

    fn build(kind: InstallationErrorKind, message: String, args: BTreeMap<String, String>) -> Self {
        InstallationError {
            kind,
            message,
            message_key: kind.message_key().to_string(),
            args,
        }
    }
}
