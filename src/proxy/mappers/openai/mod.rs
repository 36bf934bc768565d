pub mod collector;
pub mod models;
pub mod request;
pub mod streaming;

pub use collector::collect_chat_response;
pub use models::{ChatCompletionRequest, TokenUsage};
pub use request::{transform_chat_request, RequestEnvelope};
pub use streaming::create_chat_sse_stream;
