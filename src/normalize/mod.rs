//! Upstream response normalization.
//!
//! - [`answer`]: answer extraction from complete JSON bodies
//! - [`lines`]: partial-line buffering
//! - [`stream`]: per-backend stream framing and terminal markers

pub mod answer;
pub mod lines;
pub mod stream;

pub use answer::{extract, extract_answer, Answer, AnswerShape};
pub use lines::{LineAssembler, DEFAULT_MAX_LINE_BYTES};
pub use stream::{normalize_stream, LineOutcome, RelayForm, StreamDialect};
