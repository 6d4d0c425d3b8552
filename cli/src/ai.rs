use std::time::Duration;

use async_trait::async_trait;
use bite_core::recognition::{FoodRecognition, parse_analysis};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const TRANSCRIPTION_MODEL: &str = "whisper-1";
const ANALYSIS_MODEL: &str = "gpt-4o";

const ANALYSIS_PROMPT: &str = "You are a nutrition expert. Analyze the user's food description \
and estimate the calories of each item. Break meals down into individual components. \
Respond with a JSON object of the form \
{\"foodItems\": [{\"name\": string, \"calories\": number}], \"totalCalories\": number}.";

#[derive(Debug, Error)]
pub enum AiError {
    #[error("request to AI service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI service returned a malformed response: {0}")]
    Payload(String),

    #[error("AI service returned an empty response")]
    Empty,
}

/// Speech-to-text plus food analysis. The server and the `analyze` command
/// only see this trait; tests swap in a scripted implementation.
#[async_trait]
pub trait FoodAnalyzer: Send + Sync {
    /// Transcribe a recorded clip. An empty string means no speech was heard.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, AiError>;

    async fn analyze(&self, text: &str) -> Result<FoodRecognition, AiError>;
}

/// Attempts and exponential backoff for transcription calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failed attempt `attempt` (zero-based): base, 2x base, 4x base...
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Transcribe with retries. Failures are retried with backoff, with no wait
/// after the final attempt. An empty transcript is a result, not a failure.
pub async fn transcribe_with_retry(
    analyzer: &dyn FoodAnalyzer,
    audio: &[u8],
    policy: RetryPolicy,
) -> Result<String, AiError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match analyzer.transcribe(audio.to_vec()).await {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::warn!(attempt = attempt + 1, attempts, error = %e, "transcription attempt failed");
                if attempt + 1 >= attempts {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_after(attempt)).await;
                attempt += 1;
            }
        }
    }
}

// --- OpenAI ---

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, AiError> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "bite/{} (calorie tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AiError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        })
    }
}

#[async_trait]
impl FoodAnalyzer for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, AiError> {
        let file = Part::bytes(audio)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .part("file", file)
            .text("model", TRANSCRIPTION_MODEL);

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let data: TranscriptionResponse = Self::check(resp).await?.json().await?;
        Ok(data.text.trim().to_string())
    }

    async fn analyze(&self, text: &str) -> Result<FoodRecognition, AiError> {
        let body = json!({
            "model": ANALYSIS_MODEL,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": ANALYSIS_PROMPT },
                {
                    "role": "user",
                    "content": format!("Analyze this food description and provide calorie estimates: \"{text}\""),
                },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let data: ChatResponse = Self::check(resp).await?.json().await?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(AiError::Empty)?;
        parse_analysis(&content, Some(text.to_string())).map_err(|e| AiError::Payload(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use bite_core::recognition::FoodItem;

    /// Analyzer that replays scripted transcription results and answers
    /// every analysis with 100 kcal per "and"-separated item.
    pub(crate) struct ScriptedAnalyzer {
        transcripts: Mutex<VecDeque<Result<String, AiError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedAnalyzer {
        pub(crate) fn new(script: Vec<Result<String, AiError>>) -> Self {
            Self {
                transcripts: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl FoodAnalyzer for ScriptedAnalyzer {
        async fn transcribe(&self, _audio: Vec<u8>) -> Result<String, AiError> {
            *self.calls.lock().unwrap() += 1;
            self.transcripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AiError::Empty))
        }

        async fn analyze(&self, text: &str) -> Result<FoodRecognition, AiError> {
            let food_items: Vec<FoodItem> = text
                .split(" and ")
                .map(|name| FoodItem {
                    name: name.trim().to_string(),
                    calories: 100.0,
                })
                .collect();
            Ok(FoodRecognition {
                transcript: Some(text.to_string()),
                total_calories: 100.0 * food_items.len() as f64,
                food_items,
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn upstream_error() -> AiError {
        AiError::Status {
            status: 503,
            body: "overloaded".to_string(),
        }
    }

    #[test]
    fn test_default_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay_after(0), Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let analyzer = ScriptedAnalyzer::new(vec![
            Err(upstream_error()),
            Err(upstream_error()),
            Ok("an apple".to_string()),
        ]);
        let text = transcribe_with_retry(&analyzer, b"RIFF", fast_policy())
            .await
            .unwrap();
        assert_eq!(text, "an apple");
        assert_eq!(analyzer.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_last_attempt() {
        let analyzer = ScriptedAnalyzer::new(vec![
            Err(upstream_error()),
            Err(upstream_error()),
            Err(upstream_error()),
            Ok("never reached".to_string()),
        ]);
        let err = transcribe_with_retry(&analyzer, b"RIFF", fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Status { status: 503, .. }));
        assert_eq!(analyzer.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_transcript_is_not_retried() {
        let analyzer = ScriptedAnalyzer::new(vec![Ok(String::new())]);
        let text = transcribe_with_retry(&analyzer, b"RIFF", fast_policy())
            .await
            .unwrap();
        assert!(text.is_empty());
        assert_eq!(analyzer.calls(), 1);
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = OpenAiClient::new("sk-test", "http://localhost:9999/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:9999/v1");
    }
}
