//! # Dispatch Layer
//!
//! The per-invocation state machine: a matched line is resolved against the
//! command registry, executed in the sandbox when it maps to an active
//! definition, and answered with exactly one channel reply. Each invocation
//! runs as its own task; a slow or hung script never delays dispatch of
//! unrelated invocations.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Dashboard magic-link flow behind services account verification
//! - 1.0.0: Initial release with help synthesis and custom command dispatch

pub mod resolver;

pub use resolver::{CommandResolver, Resolution, BUILTIN_COMMANDS};

use crate::core::config::AuthConfig;
use crate::database::{CommandDefinition, UserStore};
use crate::irc::matcher::Invocation;
use crate::sandbox::SandboxExecutor;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::sync::Arc;
use uuid::Uuid;

/// One inbound chat event, as delivered by the transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub nick: String,
    /// Services-verified account identity, when the network supplied one
    pub account: Option<String>,
    /// Channel (or our own nick for private messages)
    pub target: String,
    pub text: String,
}

/// Outbound primitives the dispatcher drives
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Reply in the channel where the invocation occurred
    async fn reply_in_channel(&self, channel: &str, text: &str) -> Result<()>;

    /// Direct message to a nick; never echoed to any channel
    async fn send_private_message(&self, nick: &str, text: &str) -> Result<()>;
}

/// Generic user-facing failure reply; internals go to the log only
const GENERIC_ERROR_REPLY: &str = "Error processing your request. Please try again later.";

/// Orchestrates one invocation from resolution to reply
pub struct Dispatcher {
    resolver: CommandResolver,
    executor: SandboxExecutor,
    users: Arc<dyn UserStore>,
    auth: AuthConfig,
}

impl Dispatcher {
    pub fn new(
        resolver: CommandResolver,
        executor: SandboxExecutor,
        users: Arc<dyn UserStore>,
        auth: AuthConfig,
    ) -> Self {
        Dispatcher {
            resolver,
            executor,
            users,
            auth,
        }
    }

    /// Run one invocation to completion
    ///
    /// Every path through here sends exactly one channel reply; the dash
    /// flow additionally sends private messages before that reply.
    pub async fn dispatch(
        &self,
        invocation: Invocation,
        message: InboundMessage,
        outbound: Arc<dyn Outbound>,
    ) {
        let request_id = Uuid::new_v4();
        debug!(
            "[{request_id}] {} invoked '{}{}' in {}",
            message.nick, invocation.prefix, invocation.name, message.target
        );

        let reply = match self.resolver.resolve(&invocation.name).await {
            Ok(Resolution::BuiltIn("help")) => self.help_reply(&invocation).await,
            Ok(Resolution::BuiltIn(_)) => {
                self.dash_reply(&message, outbound.as_ref(), request_id).await
            }
            Ok(Resolution::Custom(definition)) => {
                self.execute_reply(&definition, &invocation, request_id).await
            }
            Ok(Resolution::Disabled(name)) => format!("Command '{name}' is disabled."),
            Ok(Resolution::NotFound) => {
                format!("Unknown command: {}{}", invocation.prefix, invocation.name)
            }
            Err(store_error) => {
                error!("[{request_id}] Command store unavailable: {store_error}");
                GENERIC_ERROR_REPLY.to_string()
            }
        };

        if let Err(send_error) = outbound.reply_in_channel(&message.target, &reply).await {
            error!(
                "[{request_id}] Failed to reply in {}: {send_error}",
                message.target
            );
        }
    }

    /// Synthesize the help listing: built-ins plus all active custom commands
    async fn help_reply(&self, invocation: &Invocation) -> String {
        let names = match self.resolver.active_command_names().await {
            Ok(names) => names,
            Err(store_error) => {
                error!("Help listing failed, store unavailable: {store_error}");
                return GENERIC_ERROR_REPLY.to_string();
            }
        };

        let prefix = &invocation.prefix;
        let builtins = BUILTIN_COMMANDS
            .iter()
            .map(|name| format!("{prefix}{name}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut help = format!("Available commands:\nBuilt-in commands: {builtins}");
        if !names.is_empty() {
            let customs = names
                .iter()
                .map(|name| format!("{prefix}{name}"))
                .collect::<Vec<_>>()
                .join(", ");
            help.push_str(&format!("\nCustom commands: {customs}"));
        }
        help
    }

    /// Dashboard access: verified account required, link goes out by PM only
    async fn dash_reply(
        &self,
        message: &InboundMessage,
        outbound: &dyn Outbound,
        request_id: Uuid,
    ) -> String {
        let Some(account) = message.account.as_deref() else {
            return "You must be authenticated with the IRC server to use the dashboard."
                .to_string();
        };

        let user = match self.users.find_by_account(account).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                return "You don't have access to the dashboard. Please contact an administrator."
                    .to_string();
            }
            Err(store_error) => {
                error!("[{request_id}] User lookup failed: {store_error}");
                return GENERIC_ERROR_REPLY.to_string();
            }
        };

        let token = match self.users.issue_auth_token(&user).await {
            Ok(token) => token,
            Err(store_error) => {
                error!("[{request_id}] Token issue failed: {store_error}");
                return GENERIC_ERROR_REPLY.to_string();
            }
        };

        let link = format!(
            "{}/auth?token={}",
            self.auth.base_url.trim_end_matches('/'),
            token.token
        );
        let messages = [
            format!("Click this link to access the dashboard: {link}"),
            format!(
                "This link will expire in {} hours.",
                self.auth.token_ttl_hours
            ),
        ];
        for text in &messages {
            if let Err(send_error) = outbound.send_private_message(&message.nick, text).await {
                error!(
                    "[{request_id}] Failed to PM {}: {send_error}",
                    message.nick
                );
                return GENERIC_ERROR_REPLY.to_string();
            }
        }

        // The link stays out of the channel
        "Check your private messages for dashboard access instructions.".to_string()
    }

    /// Run an active definition in the sandbox and shape its reply
    async fn execute_reply(
        &self,
        definition: &CommandDefinition,
        invocation: &Invocation,
        request_id: Uuid,
    ) -> String {
        match self
            .executor
            .run(&definition.code, &invocation.argument)
            .await
        {
            Ok(output) if output.trim().is_empty() => "Command executed successfully".to_string(),
            Ok(output) => output,
            Err(failure) => {
                warn!(
                    "[{request_id}] Command '{}' failed: {failure}",
                    definition.name
                );
                format!("Error executing custom command: {failure}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SandboxConfig;
    use crate::database::{AuthToken, CommandStore, StoreError, User};
    use crate::irc::matcher::LineMatcher;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct TestStore {
        commands: Mutex<HashMap<String, CommandDefinition>>,
        users: Mutex<HashMap<String, User>>,
        tokens_issued: AtomicUsize,
        fail_lookups: AtomicUsize,
    }

    impl TestStore {
        fn with_command(self, name: &str, code: &str, is_active: bool) -> Self {
            self.commands.lock().unwrap().insert(
                name.to_string(),
                CommandDefinition {
                    name: name.to_string(),
                    code: code.to_string(),
                    description: None,
                    is_active,
                },
            );
            self
        }

        fn with_user(self, account: &str) -> Self {
            let mut users = self.users.lock().unwrap();
            let id = users.len() as i64 + 1;
            users.insert(
                account.to_string(),
                User {
                    id,
                    irc_account: account.to_string(),
                },
            );
            drop(users);
            self
        }
    }

    #[async_trait]
    impl CommandStore for TestStore {
        async fn find_by_name(&self, name: &str) -> Result<Option<CommandDefinition>, StoreError> {
            if self.fail_lookups.load(Ordering::SeqCst) > 0 {
                self.fail_lookups.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::unavailable("store offline"));
            }
            Ok(self.commands.lock().unwrap().get(name).cloned())
        }

        async fn list_active(&self) -> Result<Vec<String>, StoreError> {
            let mut names: Vec<String> = self
                .commands
                .lock()
                .unwrap()
                .values()
                .filter(|definition| definition.is_active)
                .map(|definition| definition.name.clone())
                .collect();
            names.sort();
            Ok(names)
        }
    }

    #[async_trait]
    impl UserStore for TestStore {
        async fn find_by_account(&self, account: &str) -> Result<Option<User>, StoreError> {
            Ok(self.users.lock().unwrap().get(account).cloned())
        }

        async fn issue_auth_token(&self, user: &User) -> Result<AuthToken, StoreError> {
            self.tokens_issued.fetch_add(1, Ordering::SeqCst);
            Ok(AuthToken {
                token: format!("token-for-{}", user.id),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(24),
            })
        }
    }

    #[derive(Default)]
    struct RecordingOutbound {
        replies: Mutex<Vec<(String, String)>>,
        private_messages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn reply_in_channel(&self, channel: &str, text: &str) -> Result<()> {
            self.replies
                .lock()
                .unwrap()
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_private_message(&self, nick: &str, text: &str) -> Result<()> {
            self.private_messages
                .lock()
                .unwrap()
                .push((nick.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn dispatcher(store: Arc<TestStore>) -> Dispatcher {
        Dispatcher::new(
            CommandResolver::new(Arc::clone(&store) as Arc<dyn CommandStore>),
            SandboxExecutor::new(&SandboxConfig { timeout_secs: 2 }, None),
            store as Arc<dyn UserStore>,
            AuthConfig::default(),
        )
    }

    fn channel_message(text: &str) -> InboundMessage {
        InboundMessage {
            nick: "alice".to_string(),
            account: None,
            target: "#chxt".to_string(),
            text: text.to_string(),
        }
    }

    fn authenticated_message(text: &str, account: &str) -> InboundMessage {
        InboundMessage {
            account: Some(account.to_string()),
            ..channel_message(text)
        }
    }

    async fn run_line(
        dispatcher: &Dispatcher,
        outbound: &Arc<RecordingOutbound>,
        message: InboundMessage,
    ) {
        let matcher = LineMatcher::new("!!").unwrap();
        let invocation = matcher.parse(&message.text).expect("line should match");
        dispatcher
            .dispatch(
                invocation,
                message,
                Arc::clone(outbound) as Arc<dyn Outbound>,
            )
            .await;
    }

    fn single_reply(outbound: &RecordingOutbound) -> (String, String) {
        let replies = outbound.replies.lock().unwrap();
        assert_eq!(replies.len(), 1, "every invocation replies exactly once");
        replies[0].clone()
    }

    #[tokio::test]
    async fn custom_command_replies_with_script_output() {
        let store = Arc::new(TestStore::default().with_command(
            "echo",
            "function run(arg) return arg end",
            true,
        ));
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!echo hello there")).await;

        let (channel, reply) = single_reply(&outbound);
        assert_eq!(channel, "#chxt");
        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn empty_script_output_gets_default_reply() {
        let store = Arc::new(TestStore::default().with_command(
            "quiet",
            "function run(arg) end",
            true,
        ));
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!quiet")).await;

        assert_eq!(single_reply(&outbound).1, "Command executed successfully");
    }

    #[tokio::test]
    async fn disabled_command_is_never_executed() {
        let store = Arc::new(TestStore::default().with_command(
            "old",
            "function run(arg) return 'Should not run' end",
            false,
        ));
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!old arg")).await;

        let (_, reply) = single_reply(&outbound);
        assert!(reply.contains("disabled"));
        assert!(!reply.contains("Should not run"));
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let dispatcher = dispatcher(Arc::new(TestStore::default()));
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!nonexistent arg")).await;

        assert!(single_reply(&outbound).1.contains("Unknown command"));
    }

    #[tokio::test]
    async fn failing_script_yields_short_error_reply() {
        let store = Arc::new(TestStore::default().with_command(
            "broken",
            r#"function run(arg) error("Command failed") end"#,
            true,
        ));
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!broken arg")).await;

        let (_, reply) = single_reply(&outbound);
        assert!(reply.starts_with("Error executing custom command:"));
        assert!(!reply.contains("stack traceback"));
    }

    #[tokio::test]
    async fn store_outage_yields_generic_reply() {
        let store = Arc::new(TestStore::default());
        store.fail_lookups.store(1, Ordering::SeqCst);
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!echo hi")).await;

        let (_, reply) = single_reply(&outbound);
        assert_eq!(reply, GENERIC_ERROR_REPLY);
    }

    #[tokio::test]
    async fn help_lists_builtins_and_active_customs() {
        let store = Arc::new(
            TestStore::default()
                .with_command("test1", "function run() end", true)
                .with_command("test2", "function run() end", true)
                .with_command("hidden", "function run() end", false),
        );
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!help")).await;

        let (_, reply) = single_reply(&outbound);
        assert!(reply.contains("Built-in commands: !!dash, !!help"));
        assert!(reply.contains("Custom commands: !!test1, !!test2"));
        assert!(!reply.contains("hidden"));
    }

    #[tokio::test]
    async fn dash_without_account_is_rejected_in_channel() {
        let store = Arc::new(TestStore::default().with_user("alice_account"));
        let dispatcher = dispatcher(Arc::clone(&store));
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!dash")).await;

        let (_, reply) = single_reply(&outbound);
        assert!(reply.contains("must be authenticated"));
        assert!(outbound.private_messages.lock().unwrap().is_empty());
        assert_eq!(store.tokens_issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dash_with_unregistered_account_is_rejected() {
        let store = Arc::new(TestStore::default());
        let dispatcher = dispatcher(Arc::clone(&store));
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(
            &dispatcher,
            &outbound,
            authenticated_message("!!dash", "stranger"),
        )
        .await;

        let (_, reply) = single_reply(&outbound);
        assert!(reply.contains("don't have access"));
        assert_eq!(store.tokens_issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dash_with_registered_account_sends_link_by_pm() {
        let store = Arc::new(TestStore::default().with_user("alice_account"));
        let dispatcher = dispatcher(Arc::clone(&store));
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(
            &dispatcher,
            &outbound,
            authenticated_message("!!dash", "alice_account"),
        )
        .await;

        assert_eq!(store.tokens_issued.load(Ordering::SeqCst), 1);

        let private_messages = outbound.private_messages.lock().unwrap();
        assert_eq!(private_messages.len(), 2);
        assert_eq!(private_messages[0].0, "alice");
        assert!(private_messages[0]
            .1
            .contains("http://localhost:3000/auth?token=token-for-1"));
        assert!(private_messages[1].1.contains("expire in 24 hours"));
        drop(private_messages);

        let (_, reply) = single_reply(&outbound);
        assert!(reply.contains("Check your private messages"));
        assert!(!reply.contains("token-for-1"));
    }

    #[tokio::test]
    async fn dash_cannot_be_shadowed_by_custom_command() {
        let store = Arc::new(
            TestStore::default()
                .with_command("dash", "function run() return 'shadowed' end", true),
        );
        let dispatcher = dispatcher(store);
        let outbound = Arc::new(RecordingOutbound::default());

        run_line(&dispatcher, &outbound, channel_message("!!dash")).await;

        let (_, reply) = single_reply(&outbound);
        assert!(reply.contains("must be authenticated"));
        assert!(!reply.contains("shadowed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fast_invocation_is_not_delayed_by_slow_one() {
        let store = Arc::new(
            TestStore::default()
                .with_command("slow", "function run(arg) while true do end end", true)
                .with_command("fast", "function run(arg) return 'fast' end", true),
        );
        let dispatcher = Arc::new(dispatcher(store));
        let slow_outbound = Arc::new(RecordingOutbound::default());
        let fast_outbound = Arc::new(RecordingOutbound::default());

        let slow_task = {
            let dispatcher = Arc::clone(&dispatcher);
            let outbound = Arc::clone(&slow_outbound);
            tokio::spawn(async move {
                let matcher = LineMatcher::new("!!").unwrap();
                let invocation = matcher.parse("!!slow").unwrap();
                dispatcher
                    .dispatch(
                        invocation,
                        InboundMessage {
                            nick: "alice".to_string(),
                            account: None,
                            target: "#chxt".to_string(),
                            text: "!!slow".to_string(),
                        },
                        outbound as Arc<dyn Outbound>,
                    )
                    .await;
            })
        };

        // Give the slow script a moment to start spinning
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        run_line(&dispatcher, &fast_outbound, channel_message("!!fast")).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(single_reply(&fast_outbound).1, "fast");

        slow_task.await.unwrap();
        assert!(single_reply(&slow_outbound)
            .1
            .contains("timed out"));
    }
}
