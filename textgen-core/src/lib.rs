pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod prompt;
pub mod stream;
pub mod telemetry;

pub use client::Client;
pub use error::{ApiError, CoreResult, TextGenError};
pub use stream::{CompletionStream, StreamReader};
