//! Intent classifier for agent selection.
//!
//! A single cheap chat call with a fixed prompt listing the registered
//! agents. The model answers with one agent key; anything that is not a
//! registered key is treated as "no opinion" and the caller falls back
//! to the default agent.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::traits::{ChatClient, ChatRequest};
use vb_domain::error::Result;
use vb_domain::stream::ChatEvent;
use vb_domain::tool::Message;

pub struct IntentClassifier {
    chat: Arc<dyn ChatClient>,
    model: Option<String>,
}

impl IntentClassifier {
    pub fn new(chat: Arc<dyn ChatClient>, model: Option<String>) -> Self {
        Self { chat, model }
    }

    /// Pick an agent key for the utterance, or `None` when the model's
    /// answer is not a registered key.
    ///
    /// `agents` is `(key, display_name)` pairs from the registry.
    pub async fn classify(
        &self,
        user_text: &str,
        agents: &[(String, String)],
    ) -> Result<Option<String>> {
        let listing = agents
            .iter()
            .map(|(key, display)| format!("- {key}: {display}"))
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            "You route a caller's utterance to one specialist agent.\n\
             Respond with exactly one agent key from this list and nothing else.\n\n\
             Agents:\n{listing}"
        );

        let req = ChatRequest {
            messages: vec![Message::system(system), Message::user(user_text)],
            tools: Vec::new(),
            temperature: Some(0.0),
            max_tokens: Some(16),
            model: self.model.clone(),
        };

        let mut stream = self.chat.chat_stream(&req).await?;
        let mut answer = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ChatEvent::Token { text } => answer.push_str(&text),
                ChatEvent::Finished { .. } => break,
                ChatEvent::ToolCallRequested { .. } => {}
            }
        }

        let key = answer
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .to_ascii_lowercase();

        let matched = agents
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
            .map(|(k, _)| k.clone());

        if matched.is_none() && !key.is_empty() {
            tracing::debug!(answer = %key, "classifier returned an unregistered agent key");
        }

        Ok(matched)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use vb_domain::stream::BoxStream;

    /// A chat client that replies with a fixed token sequence.
    struct CannedChat {
        reply: String,
    }

    #[async_trait::async_trait]
    impl ChatClient for CannedChat {
        async fn chat_stream(
            &self,
            _req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<ChatEvent>>> {
            let events = vec![
                Ok(ChatEvent::Token {
                    text: self.reply.clone(),
                }),
                Ok(ChatEvent::Finished {
                    reason: Some("stop".into()),
                }),
            ];
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        fn client_id(&self) -> &str {
            "canned"
        }
    }

    fn agents() -> Vec<(String, String)> {
        vec![
            ("greeter".into(), "Greeter".into()),
            ("claims".into(), "Claims".into()),
        ]
    }

    #[tokio::test]
    async fn exact_key_matches() {
        let classifier = IntentClassifier::new(Arc::new(CannedChat { reply: "claims".into() }), None);
        let picked = classifier.classify("I need to file a claim", &agents()).await.unwrap();
        assert_eq!(picked.as_deref(), Some("claims"));
    }

    #[tokio::test]
    async fn punctuation_and_case_are_tolerated() {
        let classifier =
            IntentClassifier::new(Arc::new(CannedChat { reply: " Claims.\n".into() }), None);
        let picked = classifier.classify("claim please", &agents()).await.unwrap();
        assert_eq!(picked.as_deref(), Some("claims"));
    }

    #[tokio::test]
    async fn unknown_key_is_none() {
        let classifier =
            IntentClassifier::new(Arc::new(CannedChat { reply: "billing".into() }), None);
        let picked = classifier.classify("anything", &agents()).await.unwrap();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn empty_answer_is_none() {
        let classifier = IntentClassifier::new(Arc::new(CannedChat { reply: "  ".into() }), None);
        let picked = classifier.classify("anything", &agents()).await.unwrap();
        assert!(picked.is_none());
    }
}
