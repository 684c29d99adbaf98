use crate::models::Question;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation response contains no text block")]
    NoTextContent,
    #[error("generation response is not the expected JSON: {0}")]
    MalformedJson(String),
}

/// Wraps the external completion endpoint for summary and quiz generation.
/// No retries happen here; recovery is the caller's (user-triggered) concern.
pub trait TextGenerator: Send + Sync {
    fn summarize(&self, title: &str, content: &str) -> BoxFuture<'static, Result<String, GenerationError>>;

    fn generate_questions(&self, content: &str) -> BoxFuture<'static, Result<Vec<Question>, GenerationError>>;
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionsEnvelope {
    // A payload without a `questions` field parses as the empty set rather
    // than failing; only syntactically broken JSON is an error.
    #[serde(default)]
    questions: Vec<Question>,
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_questions(raw: &str) -> Result<Vec<Question>, GenerationError> {
    let cleaned = strip_code_fences(raw);
    let envelope: QuestionsEnvelope =
        serde_json::from_str(&cleaned).map_err(|e| GenerationError::MalformedJson(e.to_string()))?;
    Ok(envelope.questions)
}

fn summary_prompt(title: &str, content: &str) -> String {
    format!(
        "Please provide a concise summary (3-4 sentences) of the following article:\n\nTitle: {title}\n\nContent: {content}"
    )
}

fn quiz_prompt(content: &str) -> String {
    format!(
        "Based on this article, generate 5 multiple-choice quiz questions. Return ONLY valid JSON with no preamble or markdown:\n\n{content}\n\nFormat:\n{{\"questions\": [{{\"question\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \"correct\": 0}}]}}"
    )
}

/// Messages-endpoint client: one user-role message per call, first text
/// block of the reply wins.
#[derive(Clone)]
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicGenerator {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("GENERATION_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        let timeout_secs = std::env::var("GENERATION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
        })
    }

    async fn complete(self, prompt: String) -> Result<String, GenerationError> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let parsed: MessageResponse = response.json().await?;
        parsed
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .and_then(|block| block.text)
            .ok_or(GenerationError::NoTextContent)
    }
}

impl TextGenerator for AnthropicGenerator {
    fn summarize(&self, title: &str, content: &str) -> BoxFuture<'static, Result<String, GenerationError>> {
        let this = self.clone();
        let prompt = summary_prompt(title, content);
        Box::pin(async move { this.complete(prompt).await })
    }

    fn generate_questions(&self, content: &str) -> BoxFuture<'static, Result<Vec<Question>, GenerationError>> {
        let this = self.clone();
        let prompt = quiz_prompt(content);
        Box::pin(async move { parse_questions(&this.complete(prompt).await?) })
    }
}

/// Deterministic stand-in used when no API key is configured and in tests.
#[derive(Clone)]
pub struct MockGenerator;

impl TextGenerator for MockGenerator {
    fn summarize(&self, title: &str, _content: &str) -> BoxFuture<'static, Result<String, GenerationError>> {
        let title = title.to_string();
        Box::pin(async move {
            Ok(format!(
                "{title} covers its subject in brief. It introduces the topic, develops the main argument, and closes with the key takeaway."
            ))
        })
    }

    fn generate_questions(&self, _content: &str) -> BoxFuture<'static, Result<Vec<Question>, GenerationError>> {
        Box::pin(async move {
            let questions = (1..=5)
                .map(|i| Question {
                    question: format!("Question {i} about the article"),
                    options: vec![
                        format!("Answer {i}A"),
                        format!("Answer {i}B"),
                        format!("Answer {i}C"),
                        format!("Answer {i}D"),
                    ],
                    correct: 0,
                })
                .collect();
            Ok(questions)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fences() {
        let fenced = "```json\n{\"questions\": []}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"questions\": []}");
        let bare = "  {\"questions\": []} ";
        assert_eq!(strip_code_fences(bare), "{\"questions\": []}");
    }

    #[test]
    fn parses_question_payload() {
        let raw = r#"{"questions": [{"question": "Q", "options": ["a", "b", "c", "d"], "correct": 2}]}"#;
        let questions = parse_questions(raw).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct, 2);
    }

    #[test]
    fn missing_questions_field_is_empty_not_error() {
        assert!(parse_questions("{}").unwrap().is_empty());
        assert!(parse_questions("{\"unrelated\": 1}").unwrap().is_empty());
    }

    #[test]
    fn non_json_payload_is_an_error() {
        assert!(matches!(
            parse_questions("here are your questions!"),
            Err(GenerationError::MalformedJson(_))
        ));
    }

    #[tokio::test]
    async fn mock_generator_emits_five_decodable_questions() {
        let questions = MockGenerator.generate_questions("text").await.unwrap();
        assert_eq!(questions.len(), 5);
        assert!(questions.iter().all(|q| q.options.len() == 4 && q.correct < 4));
    }
}
