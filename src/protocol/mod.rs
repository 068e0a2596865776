//! Protocol message types for the Alexa Voice Service
//!
//! Outbound events and their envelope, inbound messages as produced by the
//! reassembler, typed directives decoded from those messages, and the id
//! generator used to stamp outbound events.

pub mod directives;
pub mod ids;
pub mod messages;

pub use directives::*;
pub use ids::*;
pub use messages::*;
