pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use models::ClaudeRequest;
pub use request::transform_request;
pub use response::build_response;
pub use streaming::create_stream;
