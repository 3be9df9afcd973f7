// ChurchTools client
// Request facade over the resilient pipeline:
// - REST verbs with envelope unwrapping
// - Deferral of requests behind the first request and re-logins
// - CSRF handling for multipart uploads and legacy calls
// - Pagination and installation probing

use churchtools_core::{
    last_page, to_correct_url, trim_trailing_slash, unwrap_data, ErrorResponse, InstallationError,
    Params,
};
use churchtools_transport::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Session, MINIMAL_BUILD_VERSION, MINIMAL_VERSION};
use crate::deferral::{DeferralQueue, GateState};
use crate::login::LoginCoordinator;
use crate::recovery::{RateLimitRetry, RecoveryChain, SessionRecovery};
use crate::ClientError;

pub const CSRF_HEADER: &str = "CSRF-Token";
pub const ONLY_AUTHENTICATED_HEADER: &str = "X-OnlyAuthenticated";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
const INFO_PATH: &str = "/api/info";

/// What listeners learn when the session could not be recovered.
#[derive(Debug, Clone, Default)]
pub struct UnauthenticatedInfo {
    pub error: Option<ErrorResponse>,
    pub url: Option<String>,
    pub base_url: Option<String>,
}

pub type UnauthenticatedListener = Arc<dyn Fn(&UnauthenticatedInfo) + Send + Sync>;

/// Per-call overrides of the client's defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub enforce_json: Option<bool>,
    /// `Some(true)` sends `X-OnlyAuthenticated`, `Some(false)` never does
    pub needs_authentication: Option<bool>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Return the whole body instead of its `data` payload
    pub raw_response: bool,
    /// Wait behind the first request and running re-logins
    pub call_deferred: bool,
    pub request: RequestOptions,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            raw_response: false,
            call_deferred: true,
            request: RequestOptions::default(),
        }
    }
}

impl GetOptions {
    pub fn raw() -> Self {
        Self {
            raw_response: true,
            ..Default::default()
        }
    }

    pub fn immediate() -> Self {
        Self {
            call_deferred: false,
            ..Default::default()
        }
    }
}

/// Shared state behind every [`Client`] handle.
pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) session: RwLock<Session>,
    pub(crate) gate: DeferralQueue,
    pub(crate) login: Arc<LoginCoordinator>,
    pub(crate) recovery: RwLock<RecoveryChain>,
    pub(crate) listeners: RwLock<Vec<UnauthenticatedListener>>,
}

impl ClientInner {
    pub(crate) fn base_url(&self) -> Result<String, ClientError> {
        self.session
            .read()
            .base_url
            .clone()
            .ok_or_else(|| ClientError::Config("No base URL configured".to_string()))
    }

    /// Absolute URLs pass through, everything else lands under `/api`.
    pub(crate) fn build_url(&self, path: &str) -> Result<String, ClientError> {
        if path.starts_with("http") {
            return Ok(path.to_string());
        }
        Ok(format!("{}/api{}", self.base_url()?, path))
    }

    pub(crate) fn has_login_token(&self) -> bool {
        self.recovery
            .read()
            .session
            .as_ref()
            .is_some_and(|stage| stage.login_token.is_some())
    }

    pub(crate) fn prepare(
        &self,
        method: Method,
        url: String,
        options: &RequestOptions,
    ) -> HttpRequest {
        let has_token = self.has_login_token();
        let session = self.session.read();
        let mut request = HttpRequest::new(method, url)
            .with_timeout(options.timeout.unwrap_or(session.request_timeout))
            .with_header("User-Agent", session.user_agent.clone());
        let only_authenticated = options
            .needs_authentication
            .unwrap_or_else(|| session.needs_authentication.unwrap_or(has_token));
        if only_authenticated {
            request.set_header(ONLY_AUTHENTICATED_HEADER, "1");
        }
        request
    }

    /// Dispatch through recovery, then apply the JSON check.
    pub(crate) async fn execute(
        self: &Arc<Self>,
        request: HttpRequest,
        enforce_json: Option<bool>,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.dispatch(request).await?;
        let enforce = enforce_json.unwrap_or_else(|| self.session.read().enforce_json);
        if enforce && response.status != 204 && !response.is_json {
            if let Some(text) = response.body.as_str().filter(|t| !t.is_empty()) {
                return Err(ClientError::NoJson {
                    url: response.url.clone(),
                    body: text.to_string(),
                });
            }
        }
        Ok(response)
    }

    /// Return the cached CSRF token, fetching it on first use.
    pub(crate) async fn ensure_csrf_token(self: &Arc<Self>) -> Result<Option<String>, ClientError> {
        let cached = self.session.read().csrf_token.clone();
        if cached.is_some() {
            return Ok(cached);
        }
        let url = self.build_url("/csrftoken")?;
        let request = self.prepare(Method::Get, url, &RequestOptions::default());
        let response = self.execute(request, None).await?;
        let token = unwrap_data(response.body).as_str().map(str::to_string);
        if let Some(token) = &token {
            debug!("Fetched CSRF token");
            self.session.write().csrf_token = Some(token.clone());
        }
        Ok(token)
    }
}

/// Session-resilient ChurchTools client.
///
/// Cloning is cheap; clones share the session, the deferral gate and the
/// re-login coordinator.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.session.read().base_url)
            .field("gate", &self.inner.gate.state())
            .field("login", &self.inner.login)
            .finish()
    }
}

impl Client {
    /// Create a client that talks HTTP through reqwest.
    #[cfg(feature = "reqwest")]
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = churchtools_transport::ReqwestTransport::new(config.with_credentials)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    #[cfg(feature = "reqwest")]
    pub fn new_with_url(url: &str) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new_with_url(url))
    }

    /// Create a client over any transport.
    ///
    /// Session recovery is installed from the configured login token; rate
    /// limit retries stay off until [`Client::install_rate_limit_retry`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let mut recovery = RecoveryChain::default();
        recovery.session = Some(SessionRecovery::new(config.login_token.clone(), config.person_id));
        Self {
            inner: Arc::new(ClientInner {
                transport,
                session: RwLock::new(Session::from(&config)),
                gate: DeferralQueue::new(),
                login: LoginCoordinator::new(),
                recovery: RwLock::new(recovery),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn base_url(&self) -> Option<String> {
        self.inner.session.read().base_url.clone()
    }

    pub fn set_base_url(&self, url: &str) {
        self.inner.session.write().base_url = Some(trim_trailing_slash(url).to_string());
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.inner.session.read().csrf_token.clone()
    }

    pub fn gate_state(&self) -> GateState {
        self.inner.gate.state()
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        self.inner.session.write().request_timeout = timeout;
    }

    /// Change the rate limit backoff; an installed retry stage follows.
    pub fn set_rate_limit_timeout(&self, timeout: Duration) {
        self.inner.session.write().rate_limit_timeout = timeout;
        if let Some(stage) = self.inner.recovery.write().rate_limit.as_mut() {
            stage.backoff = timeout;
        }
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.inner.session.write().user_agent = user_agent.into();
    }

    pub fn set_enforce_json(&self, enforce: bool) {
        self.inner.session.write().enforce_json = enforce;
    }

    pub fn set_needs_authentication(&self, needs_authentication: Option<bool>) {
        self.inner.session.write().needs_authentication = needs_authentication;
    }

    /// Make re-logins fetch a fresh CSRF token even when none was held.
    pub fn set_load_csrf_for_legacy(&self) {
        self.inner.session.write().load_csrf_for_legacy = true;
    }

    /// Replace the session recovery stage.
    ///
    /// Without a token an expired session is reported to listeners instead
    /// of being recovered.
    pub fn install_session_recovery(&self, login_token: Option<String>, person_id: Option<i64>) {
        self.inner.recovery.write().session = Some(SessionRecovery::new(login_token, person_id));
    }

    pub fn set_login_token(&self, login_token: impl Into<String>, person_id: Option<i64>) {
        self.install_session_recovery(Some(login_token.into()), person_id);
    }

    /// Retry 429 responses after `backoff` (the configured rate limit
    /// timeout when `None`), replacing any installed retry stage.
    pub fn install_rate_limit_retry(&self, backoff: Option<Duration>) {
        let backoff = backoff.unwrap_or_else(|| self.inner.session.read().rate_limit_timeout);
        self.inner.recovery.write().rate_limit = Some(RateLimitRetry { backoff });
    }

    pub fn remove_rate_limit_retry(&self) {
        self.inner.recovery.write().rate_limit = None;
    }

    /// Register a listener for unrecoverable session loss.
    pub fn on_unauthenticated<F>(&self, listener: F)
    where
        F: Fn(&UnauthenticatedInfo) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    pub async fn get(&self, path: &str, params: Params) -> Result<Value, ClientError> {
        self.get_with(path, params, GetOptions::default()).await
    }

    pub async fn get_with(
        &self,
        path: &str,
        params: Params,
        options: GetOptions,
    ) -> Result<Value, ClientError> {
        let inner = &self.inner;
        let call = async {
            let url = inner.build_url(path)?;
            let request = inner
                .prepare(Method::Get, url, &options.request)
                .with_query(params);
            inner.execute(request, options.request.enforce_json).await
        };
        let response = if options.call_deferred {
            inner.gate.run(call).await?
        } else {
            call.await?
        };
        Ok(if options.raw_response {
            response.body
        } else {
            unwrap_data(response.body)
        })
    }

    /// Fetch every page of a paginated collection, in server order.
    ///
    /// The first failing page fails the whole call.
    pub async fn get_all_pages(
        &self,
        path: &str,
        params: Params,
        page_size: Option<u32>,
    ) -> Result<Vec<Value>, ClientError> {
        let mut params = params;
        params.insert("limit".to_string(), json!(page_size.unwrap_or(DEFAULT_PAGE_SIZE)));

        let mut items = Vec::new();
        let mut page: u64 = 1;
        loop {
            params.insert("page".to_string(), json!(page));
            let body = self.get_with(path, params.clone(), GetOptions::raw()).await?;
            let last = last_page(&body);
            match unwrap_data(body) {
                Value::Array(values) => items.extend(values),
                Value::Null => {}
                other => items.push(other),
            }
            match last {
                Some(last) if last > page => page += 1,
                _ => {
                    debug!(path, pages = page, items = items.len(), "Fetched all pages");
                    return Ok(items);
                }
            }
        }
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Post, path, body.into(), RequestOptions::default())
            .await
    }

    pub async fn post_with(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Post, path, body.into(), options).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Put, path, body.into(), RequestOptions::default())
            .await
    }

    pub async fn put_with(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Put, path, body.into(), options).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Patch, path, body.into(), RequestOptions::default())
            .await
    }

    pub async fn patch_with(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Patch, path, body.into(), options).await
    }

    pub async fn delete(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Delete, path, body.into(), RequestOptions::default())
            .await
    }

    pub async fn delete_with(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value, ClientError> {
        self.send_with_body(Method::Delete, path, body.into(), options).await
    }

    async fn send_with_body(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<Value, ClientError> {
        let inner = &self.inner;
        let response = inner
            .gate
            .run(async {
                let url = inner.build_url(path)?;
                let needs_csrf = method == Method::Post && body.is_multipart();
                let mut request = inner.prepare(method, url, &options).with_body(body);
                if needs_csrf {
                    let token = inner.ensure_csrf_token().await?;
                    request.set_header(CSRF_HEADER, token.unwrap_or_default());
                }
                inner.execute(request, options.enforce_json).await
            })
            .await?;
        Ok(unwrap_data(response.body))
    }

    /// Call a legacy AJAX module, e.g. `legacy_call("churchdb/ajax", "getMasterData", ..)`.
    ///
    /// Succeeds only when the body reports `status: "success"`, yielding its
    /// `data`. Marks the client so later re-logins preload a CSRF token.
    pub async fn legacy_call(
        &self,
        module: &str,
        func: &str,
        params: Params,
    ) -> Result<Value, ClientError> {
        let inner = &self.inner;
        inner.session.write().load_csrf_for_legacy = true;
        inner
            .gate
            .run(async {
                let url = format!("{}/?q={}", inner.base_url()?, module);
                let token = inner.ensure_csrf_token().await?;
                let mut payload = params;
                payload.insert("func".to_string(), Value::String(func.to_string()));
                let request = inner
                    .prepare(Method::Post, url, &RequestOptions::default())
                    .with_body(RequestBody::Json(Value::Object(payload)))
                    .with_header(CSRF_HEADER, token.unwrap_or_default());
                let response = inner.execute(request, None).await?;
                if response.body.get("status").and_then(Value::as_str) == Some("success") {
                    let mut body = response.body;
                    Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
                } else {
                    debug!(module, func, status = response.status, "Legacy call did not succeed");
                    Err(ClientError::LegacyCall(ErrorResponse::new(
                        response.status,
                        response.url,
                        response.body,
                    )))
                }
            })
            .await
    }

    /// Check that `url` hosts a ChurchTools installation of at least the
    /// given build, returning the base URL to use (following redirects).
    pub async fn validate_installation(
        &self,
        url: &str,
        min_build: Option<u64>,
        min_version: Option<&str>,
    ) -> Result<String, ClientError> {
        let min_build = min_build.unwrap_or(MINIMAL_BUILD_VERSION);
        let min_version = min_version.unwrap_or(MINIMAL_VERSION);
        let endpoint = format!("{}{}", to_correct_url(url), INFO_PATH);
        let options = RequestOptions {
            needs_authentication: Some(false),
            ..Default::default()
        };
        let request = self.inner.prepare(Method::Get, endpoint, &options);

        match self.inner.dispatch(request).await {
            Ok(response) => {
                let build_value = response.body.get("build");
                match build_value.and_then(parse_build) {
                    Some(build) if build >= min_build as i64 => {
                        let resolved = match response
                            .url
                            .strip_suffix(INFO_PATH)
                            .filter(|u| !u.is_empty())
                        {
                            Some(base) => base,
                            None => {
                                warn!(
                                    url = %response.url,
                                    "Redirect target is not an info endpoint, keeping {}",
                                    url
                                );
                                url
                            }
                        };
                        info!(build, url = resolved, "Installation is valid");
                        Ok(resolved.to_string())
                    }
                    _ if build_value.is_some_and(is_truthy) => {
                        Err(InstallationError::too_old(url, min_version).into())
                    }
                    _ => Err(InstallationError::invalid(url).into()),
                }
            }
            Err(ClientError::Transport(err)) => {
                debug!(error = %err, "Network error: Offline");
                Err(InstallationError::offline().into())
            }
            Err(err) => {
                debug!(error = %err, "Installation probe failed");
                Err(InstallationError::invalid(url).into())
            }
        }
    }
}

/// Leading integer of a build number, whether sent as number or text.
fn parse_build(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let end = s
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
                .map_or(s.len(), |(i, _)| i);
            s[..end].parse().ok()
        }
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
