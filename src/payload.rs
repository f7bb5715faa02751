//! Request payload construction

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LoadConfig;
use crate::messages::{ChatMessage, MessageSource};

/// JSON body of one chat-completion request
///
/// Optional generation parameters are omitted from the wire format when
/// unset. `stream` is forced on by the requester before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionBody {
    /// Conversation messages
    pub messages: Vec<ChatMessage>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Number of completions per request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,

    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Model name (openai.com endpoints only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Streaming mode; always true by the time the request is sent
    pub stream: bool,
}

/// Produces request bodies and their context-token counts
///
/// Message generation itself is delegated to the configured `MessageSource`;
/// the builder only attaches the run's generation parameters.
pub struct RequestBuilder {
    source: Arc<dyn MessageSource>,
    max_tokens: Option<usize>,
    completions: Option<usize>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    model: Option<String>,
}

impl RequestBuilder {
    /// Build from a run configuration and a message source.
    ///
    /// The `model` body parameter is only attached for openai.com endpoints;
    /// Azure deployments carry the model in the URL path.
    pub fn from_config(config: &LoadConfig, source: Arc<dyn MessageSource>) -> Self {
        Self {
            source,
            max_tokens: config.max_tokens,
            completions: config.completions,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            temperature: config.temperature,
            top_p: config.top_p,
            model: config.is_openai_host().then(|| config.deployment.clone()),
        }
    }

    /// Produce the next request body and its context-token count.
    pub fn next_payload(&self) -> (ChatCompletionBody, usize) {
        let (messages, context_tokens) = self.source.generate();
        let body = ChatCompletionBody {
            messages,
            max_tokens: self.max_tokens,
            n: self.completions,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            temperature: self.temperature,
            top_p: self.top_p,
            model: self.model.clone(),
            stream: false,
        };
        (body, context_tokens)
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("max_tokens", &self.max_tokens)
            .field("completions", &self.completions)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RandomMessageSource;

    fn azure_config() -> LoadConfig {
        LoadConfig {
            api_base_endpoint: "https://myresource.openai.azure.com".into(),
            api_key: "k".into(),
            deployment: "gpt-4o".into(),
            max_tokens: Some(100),
            temperature: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_optional_params_skipped_on_wire() {
        let config = azure_config();
        let builder =
            RequestBuilder::from_config(&config, Arc::new(RandomMessageSource::new(5, false)));
        let (body, tokens) = builder.next_payload();

        assert_eq!(tokens, 5);
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"max_tokens\":100"));
        assert!(json.contains("\"temperature\":1.0"));
        assert!(!json.contains("frequency_penalty"));
        assert!(!json.contains("top_p"));
        assert!(!json.contains("\"n\""));
        // Azure deployments never carry the model body parameter
        assert!(!json.contains("\"model\""));
    }

    #[test]
    fn test_model_attached_for_openai_host() {
        let config = LoadConfig {
            api_base_endpoint: "https://api.openai.com/v1/chat/completions".into(),
            ..azure_config()
        };
        let builder =
            RequestBuilder::from_config(&config, Arc::new(RandomMessageSource::new(5, false)));
        let (body, _) = builder.next_payload();
        assert_eq!(body.model.as_deref(), Some("gpt-4o"));
    }
}
