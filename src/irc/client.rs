//! Per-server IRC connection
//!
//! Owns the client session for one configured server: registration, channel
//! joins, the inbound event loop, and reconnection with exponential backoff.
//! Matched command lines are dispatched as independent tasks so one slow
//! invocation never blocks the event loop or other invocations.

use crate::core::config::{HistoryConfig, ServerConfig};
use crate::core::response::split_for_irc;
use crate::dispatch::{Dispatcher, InboundMessage, Outbound};
use crate::irc::history::ChannelTracker;
use crate::irc::matcher::LineMatcher;
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use irc::client::prelude::{Client, Command, Config as IrcConfig, Message, Response};
use irc::client::Sender;
use log::{debug, error, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

/// Connection state snapshot for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub host: String,
    pub nick: String,
    pub connected: bool,
    pub channels: Vec<String>,
}

/// Reconnect delay growth, capped
struct Backoff {
    delay: Duration,
}

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

impl Backoff {
    fn new() -> Self {
        Backoff {
            delay: BACKOFF_INITIAL,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_INITIAL;
    }
}

/// One configured server connection
pub struct IrcConnection {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<ChannelTracker>,
    connected: AtomicBool,
    sender: RwLock<Option<Sender>>,
}

impl IrcConnection {
    pub fn new(
        config: ServerConfig,
        history: &HistoryConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        IrcConnection {
            config,
            dispatcher,
            tracker: Arc::new(ChannelTracker::new(history.capacity)),
            connected: AtomicBool::new(false),
            sender: RwLock::new(None),
        }
    }

    /// Identifier used for dashboard lookups
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// This connection's channel histories
    pub fn tracker(&self) -> &ChannelTracker {
        &self.tracker
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            name: self.config.name.clone(),
            host: self.config.host.clone(),
            nick: self.config.nick.clone(),
            connected: self.connected.load(Ordering::SeqCst),
            channels: self.tracker.channels(),
        }
    }

    /// Drive the connection forever, reconnecting with backoff
    pub async fn run(self: Arc<Self>) {
        let outbound: Arc<dyn Outbound> = Arc::clone(&self) as Arc<dyn Outbound>;
        let mut backoff = Backoff::new();
        loop {
            info!(
                "Connecting to {}:{} as {}",
                self.config.host, self.config.port, self.config.nick
            );

            match self.drive_session(&outbound).await {
                Ok(()) => info!("Connection to {} closed", self.config.host),
                Err(session_error) => {
                    error!("Connection to {} failed: {session_error}", self.config.host)
                }
            }

            if self.connected.swap(false, Ordering::SeqCst) {
                backoff.reset();
            }
            *self.sender.write().await = None;
            // Histories live only for the duration of a connection
            self.tracker.clear();

            let delay = backoff.next_delay();
            info!(
                "Reconnecting to {} in {}s",
                self.config.host,
                delay.as_secs()
            );
            sleep(delay).await;
        }
    }

    /// One connect-register-listen session
    async fn drive_session(&self, outbound: &Arc<dyn Outbound>) -> Result<()> {
        let irc_config = IrcConfig {
            nickname: Some(self.config.nick.clone()),
            username: Some(self.config.username.clone()),
            server: Some(self.config.host.clone()),
            port: Some(self.config.port),
            use_tls: Some(self.config.use_tls),
            channels: self.config.channels.clone(),
            nick_password: self.config.password.clone(),
            version: Some(self.config.version.clone()),
            ..IrcConfig::default()
        };

        let mut client = Client::from_config(irc_config).await?;
        client.identify()?;

        *self.sender.write().await = Some(client.sender());
        let matcher = LineMatcher::new(&self.config.command_prefix)?;
        let mut stream = client.stream()?;

        while let Some(message) = stream.next().await.transpose()? {
            self.handle_message(message, &matcher, outbound);
        }

        Ok(())
    }

    fn handle_message(
        &self,
        message: Message,
        matcher: &LineMatcher,
        outbound: &Arc<dyn Outbound>,
    ) {
        match message.command {
            Command::Response(Response::RPL_WELCOME, _) => {
                info!("Registered with {}", self.config.host);
                self.connected.store(true, Ordering::SeqCst);
            }
            Command::JOIN(ref channel, _, _) => {
                if message.source_nickname() == Some(self.config.nick.as_str()) {
                    info!("Joined {channel} on {}", self.config.host);
                    self.tracker.join(channel);
                }
            }
            Command::PART(ref channel, _) => {
                if message.source_nickname() == Some(self.config.nick.as_str()) {
                    info!("Left {channel} on {}", self.config.host);
                    self.tracker.part(channel);
                }
            }
            Command::PRIVMSG(ref target, ref text) => {
                let Some(nick) = message.source_nickname().map(str::to_string) else {
                    return;
                };
                // Private messages are neither tracked nor dispatched
                if !target.starts_with('#') {
                    debug!("Ignoring private message from {nick}");
                    return;
                }

                self.tracker.record(target, &nick, text);

                if let Some(invocation) = matcher.parse(text) {
                    let inbound = InboundMessage {
                        nick,
                        account: account_tag(&message),
                        target: target.clone(),
                        text: text.clone(),
                    };
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let outbound = Arc::clone(outbound);
                    tokio::spawn(async move {
                        dispatcher.dispatch(invocation, inbound, outbound).await;
                    });
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Outbound for IrcConnection {
    async fn reply_in_channel(&self, channel: &str, text: &str) -> Result<()> {
        let guard = self.sender.read().await;
        let sender = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("not connected to {}", self.config.host))?;

        for line in split_for_irc(text) {
            sender.send_privmsg(channel, &line)?;
            // Our own traffic belongs in the transcript too
            self.tracker.record(channel, &self.config.nick, &line);
        }
        Ok(())
    }

    async fn send_private_message(&self, nick: &str, text: &str) -> Result<()> {
        let guard = self.sender.read().await;
        let sender = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("not connected to {}", self.config.host))?;

        for line in split_for_irc(text) {
            sender.send_privmsg(nick, &line)?;
        }
        Ok(())
    }
}

/// Services-verified account identity from IRCv3 message tags, if any
fn account_tag(message: &Message) -> Option<String> {
    message
        .tags
        .as_ref()?
        .iter()
        .find(|tag| tag.0 == "account")
        .and_then(|tag| tag.1.clone())
}
