//! Multipart body handling for the AVS wire format
//!
//! Both directions of the protocol carry boundary-delimited multipart bodies.
//! Inbound bodies arrive incrementally on the push stream (and whole on event
//! responses); outbound bodies are assembled in memory before posting.
//!
//! - [`headers`] - case-insensitive part headers and `key=value` option parsing
//! - [`part`] - a completed [`Part`] and its charset-aware accessors
//! - [`parser`] - the incremental, resumable [`MultipartParser`]
//! - [`writer`] - the outbound [`MultipartWriter`]

pub mod headers;
pub mod parser;
pub mod part;
pub mod writer;

pub use headers::{boundary_from_content_type, HeaderValue, Headers};
pub use parser::{MultipartParser, Parts};
pub use part::{Part, PartState};
pub use writer::MultipartWriter;

use thiserror::Error;

/// Parse faults raised while reading a multipart body
///
/// A fault only affects the part being parsed when it occurred; the parser
/// skips ahead to the next boundary line and keeps going.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("Stream does not start with boundary: {line}")]
    MissingBoundary { line: String },

    #[error("Syntax error in header: no colon in {line:?}")]
    HeaderWithoutColon { line: String },

    #[error("Unexpected end of line in header")]
    UnterminatedHeader,

    #[error("Header line is not valid UTF-8")]
    InvalidHeaderEncoding,

    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("Body is not valid {charset}")]
    Decode { charset: String },

    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
