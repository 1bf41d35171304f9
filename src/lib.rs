//! chat-relay: HTTP relay in front of chat LLM backends.
//!
//! Forwards chat requests to a local model runtime, DeepSeek or RagFlow,
//! normalizing their response envelopes and stream framings:
//!   caller → relay → upstream client → normalizer → relay → caller
//!
//! No state is kept across requests apart from the HTTP client's
//! connection pool.

pub mod config;
pub mod error;
pub mod normalize;
pub mod relay;
pub mod server;
pub mod types;
pub mod upstream;

pub use error::{RelayError, Result};
