use async_trait::async_trait;
use churchtools_core::encode_query;
use tracing::{debug, trace};

use crate::multipart::{MultipartForm, PartContent};
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, TransportError,
};

/// [`HttpTransport`] backed by a `reqwest::Client`.
///
/// The cookie store carries the server side session established by a
/// login, so it is enabled unless credentials are explicitly disabled.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(with_credentials: bool) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(with_credentials)
            .build()
            .map_err(|e| {
                TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn form(form: &MultipartForm) -> Result<reqwest::multipart::Form, TransportError> {
        let mut out = reqwest::multipart::Form::new();
        for part in form.parts() {
            out = match &part.content {
                PartContent::Text(value) => out.text(part.name.clone(), value.clone()),
                PartContent::File {
                    file_name,
                    content_type,
                    data,
                } => {
                    let mut file = reqwest::multipart::Part::bytes(data.to_vec());
                    if let Some(file_name) = file_name {
                        file = file.file_name(file_name.clone());
                    }
                    if let Some(content_type) = content_type {
                        file = file
                            .mime_str(content_type)
                            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                    }
                    out.part(part.name.clone(), file)
                }
            };
        }
        Ok(out)
    }

    fn map_error(err: reqwest::Error, request: &HttpRequest) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(request.timeout)
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "Sending HTTP request");

        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&encode_query(&request.query));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(form) => builder.multipart(Self::form(form)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(e, &request))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_error(e, &request))?;

        trace!("Response body:\n{}", String::from_utf8_lossy(&bytes));
        debug!(status, url = %url, "Received HTTP response");

        Ok(HttpResponse::from_bytes(status, url, &bytes))
    }
}
