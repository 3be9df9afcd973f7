//! Response classification and the recovery stages behind every request.
//!
//! A response is either passed on, treated as an expired session (re-login
//! with the login token, then one retry) or treated as rate limited (wait,
//! then retry until the server lets the request through). Each stage is
//! installed and replaced on its own.

use churchtools_core::{unwrap_data, ErrorResponse, Params};
use churchtools_transport::{HttpRequest, HttpResponse, Method, TransportError};
use futures::FutureExt;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{ClientInner, RequestOptions, UnauthenticatedInfo, CSRF_HEADER};
use crate::ClientError;

pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_RATE_LIMITED: u16 = 429;
/// Query flag marking the re-login probe itself.
pub const RETRY_LOGIN_PARAM: &str = "X-retry-login";
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    SessionExpired,
    RateLimited,
}

/// Whether the server considers the session gone.
///
/// Besides a plain 401 some endpoints answer with a successful status and a
/// `"Session expired!"` message.
pub fn is_session_expired(response: &HttpResponse) -> bool {
    response.status == STATUS_UNAUTHORIZED
        || (response.is_success()
            && response.body.get("message").and_then(Value::as_str)
                == Some(SESSION_EXPIRED_MESSAGE))
}

pub fn classify(response: &HttpResponse) -> Verdict {
    if is_session_expired(response) {
        Verdict::SessionExpired
    } else if response.status == STATUS_RATE_LIMITED {
        Verdict::RateLimited
    } else {
        Verdict::Pass
    }
}

/// Re-login stage. Installed for every client; without a login token it
/// only reports the lost session.
#[derive(Clone, Default)]
pub struct SessionRecovery {
    pub login_token: Option<String>,
    pub person_id: Option<i64>,
}

impl SessionRecovery {
    pub fn new(login_token: Option<String>, person_id: Option<i64>) -> Self {
        Self {
            login_token: login_token.filter(|t| !t.is_empty()),
            person_id,
        }
    }
}

impl fmt::Debug for SessionRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecovery")
            .field("login_token", &self.login_token.as_ref().map(|_| "<redacted>"))
            .field("person_id", &self.person_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRetry {
    pub backoff: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryChain {
    pub session: Option<SessionRecovery>,
    pub rate_limit: Option<RateLimitRetry>,
}

fn into_result(response: HttpResponse) -> Result<HttpResponse, ClientError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status(ErrorResponse::new(
            response.status,
            response.url,
            response.body,
        )))
    }
}

fn expired(response: HttpResponse) -> ErrorResponse {
    ErrorResponse::new(STATUS_UNAUTHORIZED, response.url, response.body)
}

impl ClientInner {
    /// One transport round trip bounded by the request timeout.
    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let timeout = request.timeout;
        match tokio::time::timeout(timeout, self.transport.execute(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout(timeout).into()),
        }
    }

    /// Send, waiting out rate limits while the retry stage is installed.
    pub(crate) async fn send_with_backoff(
        &self,
        request: &HttpRequest,
    ) -> Result<HttpResponse, ClientError> {
        loop {
            let response = self.send(request.clone()).await?;
            if classify(&response) == Verdict::RateLimited {
                let stage = self.recovery.read().rate_limit;
                if let Some(stage) = stage {
                    warn!(
                        url = %request.url,
                        backoff_ms = stage.backoff.as_millis() as u64,
                        "Rate limit reached, retrying after backoff"
                    );
                    tokio::time::sleep(stage.backoff).await;
                    continue;
                }
            }
            return Ok(response);
        }
    }

    /// Full pipeline: transport, rate limit retry and session recovery.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        request: HttpRequest,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.send_with_backoff(&request).await?;
        match classify(&response) {
            Verdict::SessionExpired => self.recover_session(request, response).await,
            Verdict::Pass | Verdict::RateLimited => into_result(response),
        }
    }

    /// Pipeline without session recovery, used by the login itself.
    async fn send_unrecovered(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let response = self.send_with_backoff(&request).await?;
        if is_session_expired(&response) {
            let failure = expired(response);
            if request.query_flag(RETRY_LOGIN_PARAM) {
                debug!("Login with login token was rejected");
                self.notify_unauthenticated(&failure);
            }
            return Err(ClientError::Unauthorized(failure));
        }
        into_result(response)
    }

    async fn recover_session(
        self: &Arc<Self>,
        mut request: HttpRequest,
        response: HttpResponse,
    ) -> Result<HttpResponse, ClientError> {
        let anomaly = expired(response);
        let stage = self.recovery.read().session.clone();
        let Some(stage) = stage else {
            return Err(ClientError::Unauthorized(anomaly));
        };
        if request.query_flag(RETRY_LOGIN_PARAM) {
            self.notify_unauthenticated(&anomaly);
            return Err(ClientError::Unauthorized(anomaly));
        }
        let Some(token) = stage.login_token else {
            debug!(url = %anomaly.url, "Session expired and no login token configured");
            self.notify_unauthenticated(&anomaly);
            return Err(ClientError::Unauthorized(anomaly));
        };

        warn!(url = %request.url, "Session expired, trying transparent re-login with login token");
        if let Err(err) = self.login_with_token(token, stage.person_id).await {
            debug!(error = %err, "Transparent re-login failed");
            return Err(ClientError::Unauthorized(anomaly));
        }

        let csrf = self.session.read().csrf_token.clone();
        match csrf {
            Some(token) => request.set_header(CSRF_HEADER, token),
            None => request.remove_header(CSRF_HEADER),
        }
        let response = self.send_with_backoff(&request).await?;
        if is_session_expired(&response) {
            let failure = expired(response);
            debug!(url = %failure.url, "Request still unauthorized after re-login");
            self.notify_unauthenticated(&failure);
            return Err(ClientError::Unauthorized(failure));
        }
        into_result(response)
    }

    /// Log in with the token, joining a login that is already running.
    ///
    /// Deferred requests stay parked until the attempt settles.
    pub(crate) async fn login_with_token(
        self: &Arc<Self>,
        token: String,
        person_id: Option<i64>,
    ) -> Result<(), ClientError> {
        let this = Arc::clone(self);
        let settled = Arc::clone(self);
        let login = self.login.join_or_start(
            move || {
                this.gate.begin_login();
                async move { this.relogin(&token, person_id).await }.boxed()
            },
            move || settled.gate.end_login(),
        );
        login.await
    }

    async fn relogin(&self, token: &str, person_id: Option<i64>) -> Result<(), ClientError> {
        let mut query = Params::new();
        query.insert("login_token".to_string(), json!(token));
        if let Some(person_id) = person_id {
            query.insert("user_id".to_string(), json!(person_id));
        }
        query.insert("no_url_rewrite".to_string(), json!(true));
        query.insert(RETRY_LOGIN_PARAM.to_string(), json!(true));

        let url = self.build_url("/whoami")?;
        let probe = self
            .prepare(Method::Get, url, &RequestOptions::default())
            .with_query(query);
        self.send_unrecovered(probe).await?;
        info!("Successfully logged in again with login token");

        let (held, preload) = {
            let session = self.session.read();
            (session.csrf_token.is_some(), session.load_csrf_for_legacy)
        };
        // A held token belongs to the old session and is fetched again on
        // demand. Only the legacy preload fetches one eagerly.
        if held || !preload {
            self.session.write().csrf_token = None;
            return Ok(());
        }
        let url = self.build_url("/csrftoken")?;
        let request = self.prepare(Method::Get, url, &RequestOptions::default());
        let response = self.send_unrecovered(request).await?;
        if let Some(token) = unwrap_data(response.body).as_str() {
            debug!("Loaded CSRF token after re-login");
            self.session.write().csrf_token = Some(token.to_string());
        }
        Ok(())
    }

    pub(crate) fn notify_unauthenticated(&self, failure: &ErrorResponse) {
        let info = UnauthenticatedInfo {
            error: Some(failure.clone()),
            url: Some(failure.url.clone()),
            base_url: self.session.read().base_url.clone(),
        };
        let listeners = self.listeners.read().clone();
        debug!(listeners = listeners.len(), "Notifying unauthenticated");
        for listener in listeners {
            listener(&info);
        }
    }
}
