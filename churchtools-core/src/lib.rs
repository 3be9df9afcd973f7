pub mod envelope;
pub mod error;
pub mod message;
pub mod params;
pub mod url;

pub use envelope::{last_page, unwrap_data};
pub use error::{ErrorResponse, InstallationError, InstallationErrorKind};
pub use message::{error_message_key, translated_error_message};
pub use params::{encode_query, Params};
pub use url::{to_correct_url, trim_trailing_slash};
