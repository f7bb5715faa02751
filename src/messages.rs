//! Chat messages and the message-generation seam

use serde::{Deserialize, Serialize};

/// One chat message in a request or response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role ("system", "user", "assistant")
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an entry with the given role and empty content,
    /// to be filled by streamed deltas.
    pub fn empty(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: String::new(),
        }
    }
}

/// Source of request messages and their context-token counts
///
/// Implementations must be shareable across concurrent dispatches, so
/// generation takes `&self`; use interior mutability or thread-safe RNG state.
pub trait MessageSource: Send + Sync {
    /// Produce the messages for one request plus their context-token count.
    fn generate(&self) -> (Vec<ChatMessage>, usize);
}

/// Generates user messages of roughly `context_tokens` whitespace-separated
/// tokens of filler text.
///
/// Whitespace tokens are a rough stand-in for model tokens; callers that need
/// exact counts should supply their own `MessageSource` backed by a real
/// tokenizer.
pub struct RandomMessageSource {
    context_tokens: usize,
    prevent_server_caching: bool,
}

const FILLER_WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliett",
    "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra", "tango",
];

impl RandomMessageSource {
    /// Create a source targeting `context_tokens` tokens per message.
    pub fn new(context_tokens: usize, prevent_server_caching: bool) -> Self {
        Self {
            context_tokens,
            prevent_server_caching,
        }
    }
}

impl MessageSource for RandomMessageSource {
    fn generate(&self) -> (Vec<ChatMessage>, usize) {
        let mut words = Vec::with_capacity(self.context_tokens);
        if self.prevent_server_caching {
            // Unique prefix so identical token budgets never hit a server cache.
            words.push(format!("{:016x}", fastrand::u64(..)));
        }
        while words.len() < self.context_tokens {
            words.push(FILLER_WORDS[fastrand::usize(..FILLER_WORDS.len())].to_string());
        }
        let tokens = words.len();
        (vec![ChatMessage::user(words.join(" "))], tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_source_token_count() {
        let source = RandomMessageSource::new(50, false);
        let (messages, tokens) = source.generate();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert_eq!(tokens, 50);
        assert_eq!(messages[0].content.split_whitespace().count(), 50);
    }

    #[test]
    fn test_random_source_cache_busting_prefix() {
        let source = RandomMessageSource::new(10, true);
        let (first, _) = source.generate();
        let (second, _) = source.generate();

        let first_word = |m: &ChatMessage| m.content.split_whitespace().next().unwrap().to_string();
        assert_ne!(first_word(&first[0]), first_word(&second[0]));
    }

    #[test]
    fn test_message_constructors() {
        let user = ChatMessage::user("hello");
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "hello");

        let empty = ChatMessage::empty("assistant");
        assert_eq!(empty.role, "assistant");
        assert!(empty.content.is_empty());
    }
}
