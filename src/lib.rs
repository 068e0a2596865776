//! AVS Client - Rust Implementation
//!
//! A persistent, bidirectional client for the Alexa Voice Service protocol.
//!
//! # Overview
//!
//! The server pushes directives over one long-lived HTTP/2 stream as a
//! boundary-delimited multipart body; the client posts events as multipart
//! bodies of its own. This crate provides:
//! - An incremental, resumable multipart parser and an outbound body writer
//! - Content-ID based reassembly of JSON directives with their binary attachments
//! - Connection lifecycle (open/close/reconnect) with keep-alive supervision
//! - OAuth2 refresh-token lifecycle for the bearer token
//! - A typed publish/subscribe bus for lifecycle and message events
//!
//! # Quick Start
//!
//! ```rust
//! use avs_client::multipart::MultipartParser;
//! use avs_client::reassembly::PartReassembler;
//!
//! let body = b"--b1\r\n\
//! Content-Type: application/json; charset=UTF-8\r\n\
//! \r\n\
//! {\"directive\":{\"header\":{\"namespace\":\"Speaker\",\"name\":\"SetMute\",\"messageId\":\"m1\"},\"payload\":{\"mute\":true}}}\r\n\
//! --b1--\r\n";
//!
//! let mut parser = MultipartParser::new("b1");
//! parser.push(body);
//! parser.finish();
//!
//! let reassembler = PartReassembler::new();
//! let part = parser.next_part().unwrap().unwrap();
//! let messages = reassembler.accept(part);
//!
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].name(), Some("SetMute"));
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod multipart;
pub mod observability;
pub mod protocol;
pub mod reassembly;
pub mod testing;
pub mod transport;

mod sync;

pub use auth::{AccessTokenSource, AuthError, Credentials, TokenProvider};
pub use config::*;
pub use connection::{ConnectionEvents, ConnectionManager, ConnectionSettings, ConnectionState};
pub use error::{AvsError, AvsResult};
pub use events::{EventBus, EventBusError, HandlerId};
pub use protocol::*;
pub use transport::{Transport, TransportError};
