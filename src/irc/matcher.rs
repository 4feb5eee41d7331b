//! Command line matching
//!
//! Turns a raw chat line into a structured invocation, or nothing. The
//! pattern is compiled once per connection configuration and only rebuilt
//! when the server's command prefix changes.

use anyhow::Result;
use regex::Regex;

/// A chat line decoded into prefix, command name, and argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub prefix: String,
    pub name: String,
    /// Everything after the first run of whitespace following the name;
    /// empty when the line is just prefix + name
    pub argument: String,
}

/// Per-connection matcher for command lines
#[derive(Debug)]
pub struct LineMatcher {
    prefix: String,
    pattern: Regex,
}

impl LineMatcher {
    /// Compile a matcher for the given command prefix
    pub fn new(prefix: &str) -> Result<Self> {
        Ok(LineMatcher {
            prefix: prefix.to_string(),
            pattern: Self::compile(prefix)?,
        })
    }

    fn compile(prefix: &str) -> Result<Regex> {
        // The whole line must match: prefix, word-character name, then an
        // optional whitespace-separated free-form remainder
        let pattern = format!(r"^({})(\w+)(?:\s+(.*))?$", regex::escape(prefix));
        Ok(Regex::new(&pattern)?)
    }

    /// The prefix this matcher was built for
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Recompile for a new prefix (config reload)
    pub fn rebuild(&mut self, prefix: &str) -> Result<()> {
        self.pattern = Self::compile(prefix)?;
        self.prefix = prefix.to_string();
        Ok(())
    }

    /// Decode one chat line; `None` means the line is not a command
    pub fn parse(&self, line: &str) -> Option<Invocation> {
        let captures = self.pattern.captures(line)?;
        Some(Invocation {
            prefix: captures[1].to_string(),
            name: captures[2].to_string(),
            argument: captures
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }
}
