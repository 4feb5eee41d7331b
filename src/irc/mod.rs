//! # IRC Layer
//!
//! Connection wiring for one or more IRC servers: line matching, channel
//! history, and the event loop that feeds the dispatcher. The wire protocol
//! itself is the irc crate's business; this layer owns per-connection state
//! and reconnection.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial release with per-server connections and reconnect backoff

pub mod client;
pub mod history;
pub mod matcher;

pub use client::{ConnectionStatus, IrcConnection};
pub use history::{ChannelMessage, ChannelTracker};
pub use matcher::{Invocation, LineMatcher};
