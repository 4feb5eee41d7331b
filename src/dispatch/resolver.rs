//! Command resolution
//!
//! Decides whether an invocation maps to a reserved built-in command or a
//! persisted custom command. Reserved names win unconditionally, so a
//! persisted command can never shadow a built-in.

use crate::database::{CommandDefinition, CommandStore, StoreError};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Reserved command names, always resolved without touching the store
pub const BUILTIN_COMMANDS: &[&str] = &["dash", "help"];

/// Extra attempts for transient store failures
const STORE_RETRIES: usize = 2;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Outcome of resolving a command name
#[derive(Debug, Clone)]
pub enum Resolution {
    /// One of the reserved names; behavior is fixed by the host
    BuiltIn(&'static str),
    /// An active persisted definition
    Custom(CommandDefinition),
    /// Present in the store but switched off
    Disabled(String),
    NotFound,
}

/// Resolves invocation names against built-ins and the persisted store
pub struct CommandResolver {
    store: Arc<dyn CommandStore>,
}

impl CommandResolver {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        CommandResolver { store }
    }

    /// Resolve a command name
    ///
    /// Store errors are returned as errors, never folded into `NotFound`;
    /// transient ones are retried a bounded number of times first.
    pub async fn resolve(&self, name: &str) -> Result<Resolution, StoreError> {
        if let Some(builtin) = BUILTIN_COMMANDS.iter().copied().find(|b| *b == name) {
            return Ok(Resolution::BuiltIn(builtin));
        }

        let definition = self
            .with_retry(|| self.store.find_by_name(name))
            .await?;

        Ok(match definition {
            None => Resolution::NotFound,
            Some(definition) if definition.is_active => Resolution::Custom(definition),
            Some(definition) => Resolution::Disabled(definition.name),
        })
    }

    /// Names of all currently active custom commands (for help output)
    pub async fn active_command_names(&self) -> Result<Vec<String>, StoreError> {
        self.with_retry(|| self.store.list_active()).await
    }

    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.transient && attempt < STORE_RETRIES => {
                    attempt += 1;
                    debug!("Transient store error, retry {attempt}/{STORE_RETRIES}: {error}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
