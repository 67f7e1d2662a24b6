pub mod request;
pub mod response;

pub use request::transform_request;
pub use response::{create_stream, rewrite_response};
