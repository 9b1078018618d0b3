//! The wire protocol layer: framing, response parsing, the six step primitives, and the WPK
//! chunk streamer. Everything here is one-shot and stateless across calls; ordering and retry
//! policy live one layer up in the orchestrator.

pub mod framing;
pub mod response;
pub mod steps;
pub mod wpk;

pub use framing::{RequestChannel, UnixSocketChannel};
