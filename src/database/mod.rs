//! # Database Layer
//!
//! SQLite-backed store for custom commands, dashboard users, and auth
//! tokens. The dispatch path only reads command definitions; writes come
//! from the external dashboard and from store tooling.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Auth tokens with fixed validity window and expiry sweeping
//! - 1.0.0: Initial release with command and user tables

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// A persisted command definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub is_active: bool,
}

/// A dashboard user keyed by services account identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub irc_account: String,
}

/// An issued dashboard auth token
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Store failure with an explicit transience classification
///
/// Only transient failures (busy/locked) are safe candidates for the
/// dispatcher's bounded retry; everything else surfaces immediately.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub message: String,
    pub transient: bool,
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError {
            message: message.into(),
            transient: false,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<sqlite::Error> for StoreError {
    fn from(error: sqlite::Error) -> Self {
        // SQLITE_BUSY (5) and SQLITE_LOCKED (6) clear on their own
        let transient = matches!(error.code, Some(5) | Some(6));
        StoreError {
            message: error.to_string(),
            transient,
        }
    }
}

/// Read access to persisted command definitions
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Look up a definition by exact name, active or not
    async fn find_by_name(&self, name: &str) -> Result<Option<CommandDefinition>, StoreError>;

    /// Names of all active definitions, sorted
    async fn list_active(&self) -> Result<Vec<String>, StoreError>;
}

/// User lookup and auth-token issuing for the dashboard flow
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_account(&self, account: &str) -> Result<Option<User>, StoreError>;

    /// Mint a single-use opaque token with the fixed validity window
    async fn issue_auth_token(&self, user: &User) -> Result<AuthToken, StoreError>;
}

/// Shared handle to the SQLite database
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<sqlite::Connection>>,
    token_ttl: Duration,
}

impl Database {
    /// Open (and initialize) the database at the given path
    pub fn open(path: &str, token_ttl_hours: i64) -> Result<Self, StoreError> {
        let connection = sqlite::open(path)?;
        let database = Database {
            connection: Arc::new(Mutex::new(connection)),
            token_ttl: Duration::hours(token_ttl_hours),
        };
        database.init_schema()?;
        info!("Database ready at {path}");
        Ok(database)
    }

    /// In-memory database for tests
    pub fn open_in_memory(token_ttl_hours: i64) -> Result<Self, StoreError> {
        let connection = sqlite::open(":memory:")?;
        let database = Database {
            connection: Arc::new(Mutex::new(connection)),
            token_ttl: Duration::hours(token_ttl_hours),
        };
        database.init_schema()?;
        Ok(database)
    }

    fn lock(&self) -> Result<MutexGuard<'_, sqlite::Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::unavailable("database lock poisoned"))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                irc_account TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                code TEXT NOT NULL,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                user_id INTEGER,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS auth_tokens (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );",
        )?;
        Ok(())
    }

    /// Create a user for a services account identity
    pub fn create_user(&self, irc_account: &str) -> Result<User, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare("INSERT INTO users (irc_account) VALUES (?)")?;
        statement.bind((1, irc_account))?;
        while statement.next()? != sqlite::State::Done {}

        let mut statement =
            connection.prepare("SELECT id FROM users WHERE irc_account = ? LIMIT 1")?;
        statement.bind((1, irc_account))?;
        statement.next()?;
        let id = statement.read::<i64, _>("id")?;

        Ok(User {
            id,
            irc_account: irc_account.to_string(),
        })
    }

    /// Create or replace a command definition
    pub fn create_command(
        &self,
        name: &str,
        code: &str,
        description: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "INSERT INTO commands (name, code, description, user_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE
             SET code = excluded.code,
                 description = excluded.description,
                 updated_at = CURRENT_TIMESTAMP",
        )?;
        statement.bind((1, name))?;
        statement.bind((2, code))?;
        statement.bind((3, description))?;
        statement.bind((4, user_id))?;
        while statement.next()? != sqlite::State::Done {}
        debug!("Stored command '{name}'");
        Ok(())
    }

    /// Enable or disable a command
    pub fn set_command_active(&self, name: &str, active: bool) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "UPDATE commands SET is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE name = ?",
        )?;
        statement.bind((1, active as i64))?;
        statement.bind((2, name))?;
        while statement.next()? != sqlite::State::Done {}
        Ok(())
    }

    /// Delete every expired auth token; returns how many were removed
    pub fn sweep_expired_tokens(&self) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let mut statement = connection.prepare("DELETE FROM auth_tokens WHERE expires_at < ?")?;
        statement.bind((1, now.as_str()))?;
        while statement.next()? != sqlite::State::Done {}

        let mut statement = connection.prepare("SELECT changes() AS swept")?;
        statement.next()?;
        let swept = statement.read::<i64, _>("swept")? as usize;
        if swept > 0 {
            debug!("Swept {swept} expired auth tokens");
        }
        Ok(swept)
    }
}

#[async_trait]
impl CommandStore for Database {
    async fn find_by_name(&self, name: &str) -> Result<Option<CommandDefinition>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT name, code, description, is_active FROM commands WHERE name = ? LIMIT 1",
        )?;
        statement.bind((1, name))?;

        if statement.next()? == sqlite::State::Row {
            Ok(Some(CommandDefinition {
                name: statement.read::<String, _>("name")?,
                code: statement.read::<String, _>("code")?,
                description: statement.read::<Option<String>, _>("description")?,
                is_active: statement.read::<i64, _>("is_active")? != 0,
            }))
        } else {
            Ok(None)
        }
    }

    async fn list_active(&self) -> Result<Vec<String>, StoreError> {
        let connection = self.lock()?;
        let mut statement =
            connection.prepare("SELECT name FROM commands WHERE is_active = 1 ORDER BY name")?;

        let mut names = Vec::new();
        while statement.next()? == sqlite::State::Row {
            names.push(statement.read::<String, _>("name")?);
        }
        Ok(names)
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_by_account(&self, account: &str) -> Result<Option<User>, StoreError> {
        let connection = self.lock()?;
        let mut statement =
            connection.prepare("SELECT id, irc_account FROM users WHERE irc_account = ? LIMIT 1")?;
        statement.bind((1, account))?;

        if statement.next()? == sqlite::State::Row {
            Ok(Some(User {
                id: statement.read::<i64, _>("id")?,
                irc_account: statement.read::<String, _>("irc_account")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn issue_auth_token(&self, user: &User) -> Result<AuthToken, StoreError> {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.token_ttl;

        let connection = self.lock()?;
        let mut statement = connection
            .prepare("INSERT INTO auth_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")?;
        statement.bind((1, token.as_str()))?;
        statement.bind((2, user.id))?;
        statement.bind((3, expires_at.to_rfc3339().as_str()))?;
        while statement.next()? != sqlite::State::Done {}

        debug!("Issued auth token for user {}", user.id);
        Ok(AuthToken { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> Database {
        Database::open_in_memory(24).expect("in-memory database should open")
    }

    #[tokio::test]
    async fn find_by_name_returns_stored_definition() {
        let db = database();
        db.create_command("echo", "function run(arg) return arg end", None, None)
            .unwrap();

        let definition = db.find_by_name("echo").await.unwrap().unwrap();
        assert_eq!(definition.name, "echo");
        assert!(definition.is_active);
        assert!(definition.code.contains("function run"));
    }

    #[tokio::test]
    async fn find_by_name_misses_unknown() {
        let db = database();
        assert!(db.find_by_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_commands_are_returned_but_inactive() {
        let db = database();
        db.create_command("old", "function run(arg) return arg end", None, None)
            .unwrap();
        db.set_command_active("old", false).unwrap();

        let definition = db.find_by_name("old").await.unwrap().unwrap();
        assert!(!definition.is_active);
    }

    #[tokio::test]
    async fn list_active_excludes_disabled() {
        let db = database();
        db.create_command("a", "function run() end", None, None)
            .unwrap();
        db.create_command("b", "function run() end", None, None)
            .unwrap();
        db.set_command_active("b", false).unwrap();

        assert_eq!(db.list_active().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn user_lookup_by_account() {
        let db = database();
        let created = db.create_user("alice_account").unwrap();

        let found = db.find_by_account("alice_account").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(db.find_by_account("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn issued_token_has_validity_window() {
        let db = database();
        let user = db.create_user("alice_account").unwrap();

        let token = db.issue_auth_token(&user).await.unwrap();
        assert!(!token.token.is_empty());

        let remaining = token.expires_at - Utc::now();
        assert!(remaining > Duration::hours(23));
        assert!(remaining <= Duration::hours(24));
    }

    #[tokio::test]
    async fn tokens_are_unique_per_issue() {
        let db = database();
        let user = db.create_user("alice_account").unwrap();

        let first = db.issue_auth_token(&user).await.unwrap();
        let second = db.issue_auth_token(&user).await.unwrap();
        assert_ne!(first.token, second.token);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_tokens() {
        let db = database();
        let user = db.create_user("alice_account").unwrap();
        db.issue_auth_token(&user).await.unwrap();

        // Plant an already-expired token next to the live one
        {
            let connection = db.lock().unwrap();
            let mut statement = connection
                .prepare("INSERT INTO auth_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")
                .unwrap();
            statement.bind((1, "stale-token")).unwrap();
            statement.bind((2, user.id)).unwrap();
            statement
                .bind((3, (Utc::now() - Duration::hours(1)).to_rfc3339().as_str()))
                .unwrap();
            while statement.next().unwrap() != sqlite::State::Done {}
        }

        assert_eq!(db.sweep_expired_tokens().unwrap(), 1);
        assert_eq!(db.sweep_expired_tokens().unwrap(), 0);
    }
}
