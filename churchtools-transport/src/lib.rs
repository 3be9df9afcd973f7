pub mod multipart;
pub mod transport;
#[cfg(feature = "reqwest")]
pub mod http;

pub use multipart::{MultipartForm, Part, PartContent};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, TransportError,
};
#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;
