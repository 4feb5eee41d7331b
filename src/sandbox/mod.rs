//! # Sandbox Executor
//!
//! Runs one command script inside an isolated Lua interpreter and returns a
//! normalized result. Every execution gets a freshly created interpreter, so
//! no state survives across invocations or leaks between concurrent runs.
//!
//! Isolation is allow-list, not deny-list: the interpreter is constructed
//! with only the pure standard libraries (`string`, `table`, `math`), the
//! host functions live under the injected `chxt` table, and the invocation
//! argument under `env`. A script reaches nothing else.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Instruction-count hook so busy loops hit the time limit too
//! - 1.1.0: JSON coercion for non-string entry-point results
//! - 1.0.0: Initial release with fresh-interpreter-per-run execution

pub mod host;

pub use host::AskClient;

use crate::core::config::SandboxConfig;
use log::{debug, warn};
use mlua::{Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Value, VmState};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Name of the entry point every command script must define
const ENTRY_POINT: &str = "run";

/// Instructions executed between deadline checks
const HOOK_INSTRUCTION_INTERVAL: u32 = 8192;

/// Marker raised by the instruction hook when the deadline passes
const TIME_LIMIT_MARKER: &str = "script exceeded its time limit";

/// Longest outward-facing failure description
const FAILURE_MESSAGE_LIMIT: usize = 160;

/// Why a script execution produced no usable result
///
/// The display form is safe to forward into chat; interpreter internals are
/// logged, never shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The script ran past the configured wall-clock limit
    Timeout,
    /// The script never defined the `run` entry point
    NoEntryPoint,
    /// The script failed to parse, raised an error, or returned an
    /// unserializable value
    Script(String),
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionFailure::Timeout => write!(f, "timed out"),
            ExecutionFailure::NoEntryPoint => {
                write!(f, "script does not define a run(arg) entry point")
            }
            ExecutionFailure::Script(message) => write!(f, "{message}"),
        }
    }
}

/// Executes command scripts in isolated interpreter instances
#[derive(Clone)]
pub struct SandboxExecutor {
    timeout: Duration,
    http: reqwest::Client,
    ask: Option<AskClient>,
}

impl SandboxExecutor {
    pub fn new(config: &SandboxConfig, ask: Option<AskClient>) -> Self {
        SandboxExecutor {
            timeout: Duration::from_secs(config.timeout_secs),
            http: reqwest::Client::new(),
            ask,
        }
    }

    /// Run one script body with the given invocation argument
    ///
    /// The interpreter lives inside the returned future; whether the
    /// wall-clock timeout fires or the instruction hook aborts the script,
    /// dropping the future tears the whole instance down.
    pub async fn run(&self, code: &str, argument: &str) -> Result<String, ExecutionFailure> {
        match timeout(self.timeout, self.run_inner(code, argument)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Sandbox execution exceeded the {}s wall clock",
                    self.timeout.as_secs()
                );
                Err(ExecutionFailure::Timeout)
            }
        }
    }

    async fn run_inner(&self, code: &str, argument: &str) -> Result<String, ExecutionFailure> {
        let lua = self.fresh_interpreter(argument).map_err(|e| {
            debug!("Sandbox setup failed: {e}");
            ExecutionFailure::Script("sandbox setup failed".to_string())
        })?;

        lua.load(code)
            .set_name("command")
            .exec_async()
            .await
            .map_err(classify)?;

        let entry: Function = lua
            .globals()
            .get(ENTRY_POINT)
            .map_err(|_| ExecutionFailure::NoEntryPoint)?;

        let value: Value = entry
            .call_async(argument.to_string())
            .await
            .map_err(classify)?;

        coerce(&lua, value)
    }

    /// Build a fresh, capability-restricted interpreter
    fn fresh_interpreter(&self, argument: &str) -> mlua::Result<Lua> {
        // Allow-list: only the pure stdlibs exist inside the sandbox
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH,
            LuaOptions::default(),
        )?;

        // The base library is always present; strip its file-reading entry
        // points so the only I/O a script can reach is what `chxt` injects
        lua.globals().set("dofile", Value::Nil)?;
        lua.globals().set("loadfile", Value::Nil)?;

        host::install(&lua, &self.http, self.ask.clone())?;

        let env = lua.create_table()?;
        env.set("arg", argument)?;
        lua.globals().set("env", env)?;

        // The tokio timeout only fires at await points; the hook catches
        // scripts that spin without ever yielding
        let deadline = Instant::now() + self.timeout;
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    Err(mlua::Error::RuntimeError(TIME_LIMIT_MARKER.to_string()))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        Ok(lua)
    }
}

/// Convert an interpreter error into an outward-safe failure
fn classify(error: mlua::Error) -> ExecutionFailure {
    let message = error.to_string();
    if message.contains(TIME_LIMIT_MARKER) {
        return ExecutionFailure::Timeout;
    }

    debug!("Script error: {message}");

    // First line only; Lua appends tracebacks on the following lines
    let mut short = message.lines().next().unwrap_or("script error").to_string();
    if short.len() > FAILURE_MESSAGE_LIMIT {
        let mut end = FAILURE_MESSAGE_LIMIT;
        while !short.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        short.truncate(end);
    }
    ExecutionFailure::Script(short)
}

/// Coerce the entry point's return value to the reply string
fn coerce(lua: &Lua, value: Value) -> Result<String, ExecutionFailure> {
    match value {
        Value::Nil => Ok(String::new()),
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        other => {
            let json: serde_json::Value = lua.from_value(other).map_err(|e| {
                debug!("Unserializable script result: {e}");
                ExecutionFailure::Script("command returned an unserializable value".to_string())
            })?;
            serde_json::to_string(&json).map_err(|e| {
                debug!("Result serialization failed: {e}");
                ExecutionFailure::Script("command returned an unserializable value".to_string())
            })
        }
    }
}
