//! OpenAI-backed reasoning.
//!
//! Sends the triggering event to a chat completion model and expects a JSON
//! reply describing what to say and do next.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::Deserialize;

use super::{ReasonError, Reasoner, Reasoning, ReasoningContext};
use crate::config::BrainConfig;

/// Model reply structure
#[derive(Debug, Deserialize)]
struct ModelReply {
    text: String,
    #[serde(default)]
    speak: Option<String>,
    #[serde(default)]
    open_url: Option<String>,
}

/// Reasoner using the OpenAI chat completions API
pub struct OpenAiReasoner {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiReasoner {
    /// Create a reasoner from config, `None` when no API key is configured
    pub fn new(config: &BrainConfig) -> Option<Self> {
        if config.openai_api_key.is_empty() {
            tracing::warn!("brain openai_api_key is empty, reasoning disabled");
            return None;
        }

        let mut openai_config = OpenAIConfig::new().with_api_key(&config.openai_api_key);

        if let Some(ref base_url) = config.openai_base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let client = Client::with_config(openai_config);

        tracing::info!(
            model = %config.model,
            timeout_secs = config.timeout_secs,
            "openai reasoner initialized"
        );

        Some(Self {
            client,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn build_system_prompt(&self) -> String {
        r#"You are the brain of a small assistant that perceives the world through other modules (a webcam "eye", a microphone "ear") and answers through a voice "mouth".

You receive one event at a time. Decide how the assistant should react.

- Keep `text` short: one or two sentences describing your reaction.
- Set `speak` to what should be said aloud, or null to stay silent.
- Set `open_url` only when opening a web page clearly helps; otherwise omit it.

Respond with a JSON object only, no other text:
{
  "text": "your reaction",
  "speak": "utterance or null",
  "open_url": "optional url"
}
"#
        .to_string()
    }

    fn build_user_prompt(&self, ctx: &ReasoningContext) -> String {
        format!(
            r#"Event `{}` from module `{}`:
```json
{}
```

Respond with JSON only."#,
            ctx.kind,
            ctx.source_module,
            serde_json::to_string_pretty(&ctx.payload).unwrap_or_default(),
        )
    }

    async fn call_model(&self, ctx: &ReasoningContext) -> Result<String, ReasonError> {
        let transport = |e: async_openai::error::OpenAIError| ReasonError::Transport(e.to_string());

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(self.build_system_prompt())
                        .build()
                        .map_err(transport)?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(self.build_user_prompt(ctx))
                        .build()
                        .map_err(transport)?,
                ),
            ])
            .temperature(0.7)
            .max_tokens(300u32)
            .build()
            .map_err(transport)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| ReasonError::Timeout(self.timeout))?
            .map_err(transport)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ReasonError::MalformedResponse("empty model response".to_string()))
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn reason(&self, ctx: &ReasoningContext) -> Result<Reasoning, ReasonError> {
        let content = self.call_model(ctx).await?;
        parse_reply(&content)
    }
}

/// Parse the model reply, tolerating prose or code fences around the JSON object
fn parse_reply(content: &str) -> Result<Reasoning, ReasonError> {
    let trimmed = content.trim();
    let json_str = if trimmed.starts_with('{') {
        trimmed
    } else {
        content
            .find('{')
            .and_then(|start| content.rfind('}').map(|end| &content[start..=end]))
            .unwrap_or(trimmed)
    };

    let reply: ModelReply = serde_json::from_str(json_str)
        .map_err(|e| ReasonError::MalformedResponse(format!("failed to parse model reply: {}", e)))?;

    if reply.text.trim().is_empty() {
        return Err(ReasonError::MalformedResponse("model reply has empty text".to_string()));
    }

    Ok(Reasoning {
        text: reply.text,
        speak: reply.speak.filter(|s| !s.trim().is_empty()),
        open_url: reply.open_url.filter(|u| !u.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let reasoning =
            parse_reply(r#"{"text": "Someone is here", "speak": "Hello there!", "open_url": null}"#)
                .unwrap();
        assert_eq!(reasoning.text, "Someone is here");
        assert_eq!(reasoning.speak.as_deref(), Some("Hello there!"));
        assert!(reasoning.open_url.is_none());
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "Sure!\n```json\n{\"text\": \"Nobody around\", \"speak\": null}\n```";
        let reasoning = parse_reply(content).unwrap();
        assert_eq!(reasoning.text, "Nobody around");
        assert!(reasoning.speak.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_reply("I cannot help with that."),
            Err(ReasonError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_text() {
        assert!(matches!(
            parse_reply(r#"{"text": "   "}"#),
            Err(ReasonError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_new_without_key() {
        let config = BrainConfig::default();
        assert!(OpenAiReasoner::new(&config).is_none());
    }
}
