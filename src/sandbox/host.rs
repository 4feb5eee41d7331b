//! Host capability surface injected into the sandbox
//!
//! Everything a script can reach on the host is registered here, under the
//! single `chxt` global. Nothing else is injected; the interpreter is built
//! without the io/os/debug/package libraries, so any capability not in this
//! table is unreachable from script code.

use anyhow::Result;
use log::info;
use mlua::Lua;
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};

/// Client for the `chxt.ask` text-generation capability
#[derive(Clone)]
pub struct AskClient {
    model: String,
}

impl AskClient {
    pub fn new(model: impl Into<String>) -> Self {
        AskClient {
            model: model.into(),
        }
    }

    /// One-shot completion for a script-supplied prompt
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = vec![ChatCompletionMessage {
            role: ChatCompletionMessageRole::User,
            content: Some(prompt.to_string()),
            name: None,
            function_call: None,
            tool_call_id: None,
            tool_calls: None,
        }];

        let completion = ChatCompletion::builder(&self.model, messages)
            .create()
            .await
            .map_err(|e| anyhow::anyhow!("ask request failed: {e}"))?;

        completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("ask returned no content"))
    }
}

/// Register the `chxt` capability table in a fresh interpreter
///
/// Capabilities:
/// - `chxt.log(message)` - write to the host log
/// - `chxt.fetch(url)` - outbound HTTP GET, returns the body text
/// - `chxt.ask(prompt)` - text generation (only when a model is configured)
pub(crate) fn install(
    lua: &Lua,
    http: &reqwest::Client,
    ask: Option<AskClient>,
) -> mlua::Result<()> {
    let chxt = lua.create_table()?;

    let log_fn = lua.create_function(|_, message: String| {
        info!("[sandbox] {message}");
        Ok(())
    })?;
    chxt.set("log", log_fn)?;

    let client = http.clone();
    let fetch_fn = lua.create_async_function(move |_, url: String| {
        let client = client.clone();
        async move {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(mlua::Error::external)?;
            response.text().await.map_err(mlua::Error::external)
        }
    })?;
    chxt.set("fetch", fetch_fn)?;

    if let Some(ask) = ask {
        let ask_fn = lua.create_async_function(move |_, prompt: String| {
            let ask = ask.clone();
            async move { ask.complete(&prompt).await.map_err(mlua::Error::external) }
        })?;
        chxt.set("ask", ask_fn)?;
    }

    lua.globals().set("chxt", chxt)?;
    Ok(())
}
