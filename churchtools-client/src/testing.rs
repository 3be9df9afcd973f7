//! In-memory transport for unit tests.

use async_trait::async_trait;
use churchtools_transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::{Client, ClientConfig};

pub(crate) type Reply = Result<HttpResponse, TransportError>;
type Responder = Box<dyn Fn(&HttpRequest) -> BoxFuture<'static, Reply> + Send + Sync>;

/// Records every request and answers it from a closure.
pub(crate) struct ScriptedTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responder: Responder,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Reply + Send + Sync + 'static,
    {
        Self::new_async(move |req| {
            let reply = respond(req);
            Box::pin(async move { reply })
        })
    }

    pub(crate) fn new_async<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> BoxFuture<'static, Reply> + Send + Sync + 'static,
    {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(respond),
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests whose URL ends with `suffix`.
    pub(crate) fn count(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Reply {
        self.requests.lock().push(request.clone());
        let reply = (self.responder)(&request);
        reply.await
    }
}

pub(crate) fn reply(request: &HttpRequest, status: u16, body: Value) -> Reply {
    Ok(HttpResponse::new(status, request.url.clone(), body))
}

pub(crate) fn test_client(transport: Arc<ScriptedTransport>, login_token: Option<&str>) -> Client {
    let mut config = ClientConfig::new_with_url("https://demo.church.tools/");
    if let Some(token) = login_token {
        config = config.with_login_token(token, None);
    }
    Client::with_transport(config, transport)
}
