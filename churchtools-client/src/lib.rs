//! Session-resilient async client for ChurchTools.
//!
//! [`Client`] wraps the REST API (`/api/...`) and the legacy AJAX modules.
//! Expired sessions are renewed with a login token behind the caller's back,
//! rate limited requests can be retried, and requests issued while the
//! first request or a re-login is outstanding wait their turn.

pub mod client;
pub mod config;
pub mod deferral;
pub mod error;
pub mod logging;
pub mod login;
pub mod recovery;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    Client, GetOptions, RequestOptions, UnauthenticatedInfo, UnauthenticatedListener, CSRF_HEADER,
    DEFAULT_PAGE_SIZE, ONLY_AUTHENTICATED_HEADER,
};
pub use config::{
    ClientConfig, DEFAULT_TIMEOUT_MS, MINIMAL_BUILD_VERSION, MINIMAL_VERSION, RATE_LIMIT_TIMEOUT_MS,
};
pub use deferral::{DeferralQueue, GateState};
pub use error::ClientError;
pub use logging::{init_logging, init_test_logging, LogLevel};
pub use login::LoginCoordinator;
pub use recovery::{
    classify, is_session_expired, RateLimitRetry, RecoveryChain, SessionRecovery, Verdict,
    RETRY_LOGIN_PARAM, SESSION_EXPIRED_MESSAGE,
};

pub use churchtools_core::{
    error_message_key, translated_error_message, ErrorResponse, InstallationError,
    InstallationErrorKind, Params,
};
#[cfg(feature = "reqwest")]
pub use churchtools_transport::ReqwestTransport;
pub use churchtools_transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, MultipartForm, RequestBody, TransportError,
};
