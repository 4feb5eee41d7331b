//! # Channel History
//!
//! Bounded per-channel message history shared between the connection event
//! loop and the dashboard. Histories exist from channel join until the
//! connection is torn down and are never persisted.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial release with FIFO eviction at a configurable capacity

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;

/// One message in a channel transcript
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMessage {
    pub from: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-channel bounded message history
///
/// Append and eviction happen under the channel's map entry lock, so
/// concurrent inbound and outbound traffic on the same channel cannot
/// interleave a partial update.
pub struct ChannelTracker {
    channels: DashMap<String, VecDeque<ChannelMessage>>,
    capacity: usize,
}

impl ChannelTracker {
    pub fn new(capacity: usize) -> Self {
        ChannelTracker {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Start tracking a channel (idempotent)
    pub fn join(&self, channel: &str) {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(VecDeque::new);
    }

    /// Stop tracking a channel and drop its history
    pub fn part(&self, channel: &str) {
        self.channels.remove(channel);
    }

    /// Drop all histories (connection teardown)
    pub fn clear(&self) {
        self.channels.clear();
    }

    /// Whether a channel is currently tracked
    pub fn is_tracked(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Record a message in a tracked channel's history
    ///
    /// Messages for untracked channels are ignored; histories only exist
    /// between join and teardown.
    pub fn record(&self, channel: &str, from: &str, content: &str) {
        if let Some(mut history) = self.channels.get_mut(channel) {
            history.push_back(ChannelMessage {
                from: from.to_string(),
                content: content.to_string(),
                timestamp: Utc::now(),
            });
            while history.len() > self.capacity {
                history.pop_front();
            }
        }
    }

    /// Full transcript of a channel, oldest first
    pub fn history(&self, channel: &str) -> Option<Vec<ChannelMessage>> {
        self.channels
            .get(channel)
            .map(|history| history.iter().cloned().collect())
    }

    /// The most recent `n` messages of a channel, oldest first
    pub fn recent(&self, channel: &str, n: usize) -> Option<Vec<ChannelMessage>> {
        self.channels.get(channel).map(|history| {
            history
                .iter()
                .skip(history.len().saturating_sub(n))
                .cloned()
                .collect()
        })
    }

    /// Names of all tracked channels
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }
}
