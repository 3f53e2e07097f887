//! Hand-rolled DNS wire format: just enough of RFC 1035 to parse a tunnel
//! query and pack a reply. The generic UDP/TCP socket plumbing that hands
//! this module raw bytes lives in [`crate::server`].

pub mod message;
pub mod name;

pub use message::{Query, RData, Reply};
