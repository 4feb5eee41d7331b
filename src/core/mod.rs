//! # Core Module
//!
//! Configuration and shared text utilities for the chxt bot.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial creation with config and response modules

pub mod config;
pub mod response;

// Re-export commonly used items
pub use config::{AuthConfig, Config, HistoryConfig, SandboxConfig, ServerConfig};
pub use response::{split_for_irc, truncate_line, LINE_LIMIT};
