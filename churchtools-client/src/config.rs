use churchtools_core::trim_trailing_slash;
use std::fmt;
use std::time::Duration;

use crate::ClientError;

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const RATE_LIMIT_TIMEOUT_MS: u64 = 30_000;
pub const MINIMAL_BUILD_VERSION: u64 = 31_413;
pub const MINIMAL_VERSION: &str = "3.54.2";

/// Client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Installation base URL, e.g. `https://demo.church.tools`
    pub base_url: Option<String>,
    /// Long-lived login token used for transparent re-login
    pub login_token: Option<String>,
    /// Person the login token belongs to
    pub person_id: Option<i64>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Wait before retrying a rate limited request, in milliseconds
    pub rate_limit_timeout_ms: u64,
    /// Keep and send cookies (the server side session lives in one)
    pub with_credentials: bool,
    /// Fetch a CSRF token right after a re-login
    pub load_csrf_for_legacy: bool,
    /// Fail responses whose body is not JSON
    pub enforce_json: bool,
    /// Overrides whether requests send `X-OnlyAuthenticated`; defaults to
    /// "only when a login token is configured"
    pub needs_authentication: Option<bool>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            login_token: None,
            person_id: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            rate_limit_timeout_ms: RATE_LIMIT_TIMEOUT_MS,
            with_credentials: true,
            load_csrf_for_legacy: false,
            enforce_json: false,
            needs_authentication: None,
            user_agent: format!("churchtools-rs-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("login_token", &self.login_token.as_ref().map(|_| "<redacted>"))
            .field("person_id", &self.person_id)
            .field("timeout_ms", &self.timeout_ms)
            .field("rate_limit_timeout_ms", &self.rate_limit_timeout_ms)
            .field("with_credentials", &self.with_credentials)
            .field("load_csrf_for_legacy", &self.load_csrf_for_legacy)
            .field("enforce_json", &self.enforce_json)
            .field("needs_authentication", &self.needs_authentication)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ClientConfig {
    pub fn new_with_url(url: &str) -> Self {
        Self {
            base_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn with_login_token(mut self, token: impl Into<String>, person_id: Option<i64>) -> Self {
        self.login_token = Some(token.into());
        self.person_id = person_id;
        self
    }

    /// Read configuration from `CHURCHTOOLS_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed numbers are an error.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ClientError> {
        fn number<T: std::str::FromStr>(
            key: &str,
            raw: Option<String>,
        ) -> Result<Option<T>, ClientError> {
            raw.map(|v| {
                v.trim().parse::<T>().map_err(|_| {
                    ClientError::Config(format!("{} is not a valid number: {:?}", key, v))
                })
            })
            .transpose()
        }

        let mut config = Self {
            base_url: lookup("CHURCHTOOLS_URL"),
            login_token: lookup("CHURCHTOOLS_LOGIN_TOKEN").filter(|t| !t.is_empty()),
            person_id: number("CHURCHTOOLS_PERSON_ID", lookup("CHURCHTOOLS_PERSON_ID"))?,
            ..Default::default()
        };
        if let Some(ms) = number("CHURCHTOOLS_TIMEOUT_MS", lookup("CHURCHTOOLS_TIMEOUT_MS"))? {
            config.timeout_ms = ms;
        }
        let rate_limit = lookup("CHURCHTOOLS_RATE_LIMIT_MS");
        if let Some(ms) = number("CHURCHTOOLS_RATE_LIMIT_MS", rate_limit)? {
            config.rate_limit_timeout_ms = ms;
        }
        Ok(config)
    }
}

/// Mutable per-client session state.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub base_url: Option<String>,
    pub csrf_token: Option<String>,
    pub load_csrf_for_legacy: bool,
    pub request_timeout: Duration,
    pub rate_limit_timeout: Duration,
    pub enforce_json: bool,
    pub needs_authentication: Option<bool>,
    pub user_agent: String,
}

impl From<&ClientConfig> for Session {
    fn from(config: &ClientConfig) -> Self {
        Session {
            base_url: config
                .base_url
                .as_deref()
                .map(|u| trim_trailing_slash(u).to_string()),
            csrf_token: None,
            load_csrf_for_legacy: config.load_csrf_for_legacy,
            request_timeout: Duration::from_millis(config.timeout_ms),
            rate_limit_timeout: Duration::from_millis(config.rate_limit_timeout_ms),
            enforce_json: config.enforce_json,
            needs_authentication: config.needs_authentication,
            user_agent: config.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout_ms, 15_000);
        assert_eq!(config.rate_limit_timeout_ms, 30_000);
        assert!(config.with_credentials);
        assert!(config.user_agent.starts_with("churchtools-rs-client/"));
    }

    #[test]
    fn test_session_trims_base_url() {
        let session = Session::from(&ClientConfig::new_with_url("https://demo.church.tools/"));
        assert_eq!(session.base_url.as_deref(), Some("https://demo.church.tools"));
        assert_eq!(session.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::default().with_login_token("secret-token", Some(5));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("CHURCHTOOLS_URL", "https://demo.church.tools"),
            ("CHURCHTOOLS_LOGIN_TOKEN", "abc"),
            ("CHURCHTOOLS_PERSON_ID", "42"),
            ("CHURCHTOOLS_RATE_LIMIT_MS", "500"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://demo.church.tools"));
        assert_eq!(config.login_token.as_deref(), Some("abc"));
        assert_eq!(config.person_id, Some(42));
        assert_eq!(config.rate_limit_timeout_ms, 500);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = ClientConfig::from_lookup(|k| {
            (k == "CHURCHTOOLS_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
