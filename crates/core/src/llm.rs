//! Answer synthesis over retrieved chunks with an OpenAI-compatible chat
//! completions endpoint. All retrieved chunks are stuffed into one prompt.

use crate::config::OpenAiConfig;
use crate::models::{ChatTurn, RetrievedChunk};
use crate::traits::AnswerGenerator;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

pub fn build_messages(
    question: &str,
    context: &[RetrievedChunk],
    history: &[ChatTurn],
) -> Vec<ChatMessage> {
    let context_text = context
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::new(
        "system",
        format!("{INSTRUCTIONS}\n\n{context_text}"),
    ));
    for turn in history {
        messages.push(ChatMessage::new("user", turn.question.as_str()));
        messages.push(ChatMessage::new("assistant", turn.answer.as_str()));
    }
    messages.push(ChatMessage::new("user", question));
    messages
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct OpenAiChat {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

fn first_answer(response: ChatResponse) -> Result<String, SearchError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "openai-chat".to_string(),
            details: "response had no choices".to_string(),
        })
}

#[async_trait]
impl AnswerGenerator for OpenAiChat {
    async fn answer(
        &self,
        question: &str,
        context: &[RetrievedChunk],
        history: &[ChatTurn],
    ) -> Result<String, SearchError> {
        let messages = build_messages(question, context, history);
        debug!(
            model = %self.config.chat_model,
            context_chunks = context.len(),
            history_turns = history.len(),
            "requesting answer"
        );

        let mut request = self
            .client
            .post(self.config.endpoint("chat/completions")?)
            .json(&json!({
                "model": self.config.chat_model,
                "messages": messages,
                "temperature": self.config.temperature,
            }));

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "openai-chat".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        first_answer(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn retrieved(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: text.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            score: 1.0,
        }
    }

    #[test]
    fn context_goes_into_system_message() {
        let messages = build_messages(
            "What runtime is required?",
            &[retrieved("Requires Java 17."), retrieved("Runs on Linux.")],
            &[],
        );

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with(INSTRUCTIONS));
        assert!(messages[0].content.ends_with("Requires Java 17.\n\nRuns on Linux."));
        assert_eq!(messages[1], ChatMessage::new("user", "What runtime is required?"));
    }

    #[test]
    fn history_precedes_question() {
        let history = vec![ChatTurn {
            question: "Which database?".to_string(),
            answer: "PostgreSQL.".to_string(),
        }];
        let messages = build_messages("Which version?", &[], &history);

        let roles: Vec<_> = messages.iter().map(|message| message.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[2].content, "PostgreSQL.");
        assert_eq!(messages[3].content, "Which version?");
    }

    #[test]
    fn answer_is_first_choice_trimmed() -> Result<(), SearchError> {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": "  Java 17.\n"},
                    "finish_reason": "stop"
                }
            ]
        }))?;
        assert_eq!(first_answer(response)?, "Java 17.");

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []}))?;
        assert!(first_answer(empty).is_err());
        Ok(())
    }
}
