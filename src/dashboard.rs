//! # Dashboard Surface
//!
//! Process-scoped registry of live connections, exposing the read-only
//! queries the external web dashboard consumes: connection status, channel
//! transcripts, and a send-into-channel passthrough. The HTTP layer on top
//! of this is not part of the core.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.4.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial release

use crate::dispatch::Outbound;
use crate::irc::{ChannelMessage, ConnectionStatus, IrcConnection};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// All live connections, keyed by server name
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<IrcConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, connection: Arc<IrcConnection>) {
        self.connections
            .insert(connection.name().to_string(), connection);
    }

    /// Status of every registered connection
    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        self.connections
            .iter()
            .map(|entry| entry.value().status())
            .collect()
    }

    /// Full transcript of a channel on a server, oldest first
    pub fn channel_history(&self, server: &str, channel: &str) -> Option<Vec<ChannelMessage>> {
        self.connections
            .get(server)?
            .tracker()
            .history(channel)
    }

    /// The most recent `n` messages of a channel on a server
    pub fn recent_messages(
        &self,
        server: &str,
        channel: &str,
        n: usize,
    ) -> Option<Vec<ChannelMessage>> {
        self.connections.get(server)?.tracker().recent(channel, n)
    }

    /// Send a message into a channel through the bot
    ///
    /// Goes through the same outbound path as command replies, so it shows
    /// up in the channel transcript like any other bot traffic.
    pub async fn send_message(&self, server: &str, channel: &str, text: &str) -> Result<()> {
        let connection = self
            .connections
            .get(server)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| anyhow::anyhow!("unknown server '{server}'"))?;
        connection.reply_in_channel(channel, text).await
    }
}
