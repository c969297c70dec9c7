//! Title summarization through a chat-completion model.
//!
//! The [`Summarizer`] sends the configured system instruction plus the
//! title to a [`ChatBackend`], then sanitizes and decodes the reply with
//! [`comic_digest_core::completion::decode_enrichment`].
//!
//! # Retry Strategy
//!
//! [`OpenAiChat`] retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors → retry
//!
//! Backoff waits go through the injected [`Pacer`] and stop as soon as
//! the run's [`CancellationToken`] fires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use comic_digest_core::backoff::BackoffPolicy;
use comic_digest_core::completion::decode_enrichment;
use comic_digest_core::Enrichment;
use tokio_util::sync::CancellationToken;

use crate::config::SummarizerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pacing::{ensure_live, pause, Pacer, TokioPacer};

/// A chat-completion endpoint: one system message, one user message,
/// one text reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    json_response: bool,
    max_retries: u32,
    backoff: BackoffPolicy,
    pacer: Arc<dyn Pacer>,
}

impl OpenAiChat {
    pub fn new(
        config: &SummarizerConfig,
        api_key: impl Into<String>,
        pacer: Arc<dyn Pacer>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            json_response: config.json_response,
            max_retries: config.max_retries,
            // 1s, 2s, 4s, ... capped at 32s
            backoff: BackoffPolicy::exponential(Duration::from_secs(1))
                .with_max(Duration::from_secs(32)),
            pacer,
        })
    }

    /// Build a client from config. Requires `OPENAI_API_KEY`.
    pub fn from_env(config: &SummarizerConfig, pacer: Arc<dyn Pacer>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(config, api_key, pacer)
    }

    fn request_body(&self, system: &str, user: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": self.max_tokens,
        });
        if self.json_response {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = self.request_body(system, user);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay_for(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying completion");
                pause(self.pacer.as_ref(), delay, cancel).await?;
            }
            ensure_live(cancel)?;

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return first_choice_content(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("completion API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("completion API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("completion failed after retries")))
    }
}

/// Extract `choices[0].message.content` from a completion response.
pub fn first_choice_content(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("completion response has no choices[0].message.content"))
}

/// Produces an [`Enrichment`] for a title.
pub struct Summarizer {
    backend: Box<dyn ChatBackend>,
    instruction: String,
}

impl Summarizer {
    pub fn new(backend: Box<dyn ChatBackend>, instruction: impl Into<String>) -> Self {
        Self {
            backend,
            instruction: instruction.into(),
        }
    }

    pub fn from_config(config: &SummarizerConfig) -> Result<Self> {
        let instruction = config.resolve_instruction()?;
        let chat = OpenAiChat::from_env(config, Arc::new(TokioPacer))?;
        Ok(Self::new(Box::new(chat), instruction))
    }

    /// Summarize `title`. A cancelled run yields [`PipelineError::Cancelled`]
    /// rather than a per-item summarization failure.
    pub async fn summarize(
        &self,
        title: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<Enrichment> {
        ensure_live(cancel)?;
        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = self.backend.complete(&self.instruction, title, cancel) => res,
        }
        .map_err(|e| {
            if cancel.is_cancelled() {
                PipelineError::Cancelled
            } else {
                PipelineError::Summarization {
                    title: title.to_string(),
                    reason: format!("{:#}", e),
                }
            }
        })?;

        decode_enrichment(&raw).map_err(|source| PipelineError::Decode {
            title: title.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPacer, StubServer};
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, String)>>>;

    struct Canned {
        reply: Result<String, String>,
        seen: Seen,
    }

    impl Canned {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: Seen::default(),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for Canned {
        async fn complete(
            &self,
            system: &str,
            user: &str,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    #[tokio::test]
    async fn test_fenced_reply_decodes_all_fields() {
        let reply = "```json\n{\"Synopsis\":\"s\",\"Attraction\":\"a\",\"Spoilers\":\"p\",\"Genre\":\"g\",\"Characters\":\"X, Y\"}\n```";
        let s = Summarizer::new(Box::new(Canned::ok(reply)), "sys");
        let e = s.summarize("Kingdom", &CancellationToken::new()).await.unwrap();
        assert_eq!(e.synopsis, "s");
        assert_eq!(e.attraction, "a");
        assert_eq!(e.narrative_highlights, "p");
        assert_eq!(e.genre, "g");
        assert_eq!(e.characters, "X, Y");
    }

    #[tokio::test]
    async fn test_sends_instruction_and_title() {
        let backend = Canned::ok("{}");
        let seen = backend.seen.clone();
        let s = Summarizer::new(Box::new(backend), "be terse");
        s.summarize("Blue Lock", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("be terse".to_string(), "Blue Lock".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_fields_default_to_empty() {
        let s = Summarizer::new(Box::new(Canned::ok("{\"Genre\":\"Drama\"}")), "sys");
        let e = s.summarize("T", &CancellationToken::new()).await.unwrap();
        assert_eq!(e.genre, "Drama");
        assert_eq!(e.synopsis, "");
    }

    #[tokio::test]
    async fn test_non_json_is_decode_error() {
        let s = Summarizer::new(Box::new(Canned::ok("Sorry, I can't help.")), "sys");
        let err = s.summarize("T", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
        assert!(err.is_summarization());
    }

    #[tokio::test]
    async fn test_backend_failure_is_summarization_error() {
        let backend = Canned {
            reply: Err("503".into()),
            seen: Seen::default(),
        };
        let s = Summarizer::new(Box::new(backend), "sys");
        let err = s.summarize("T", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Summarization { ref title, .. } if title == "T"));
    }

    #[test]
    fn test_first_choice_content() {
        let json = serde_json::json!({"choices":[{"message":{"content":"{}"}}]});
        assert_eq!(first_choice_content(&json).unwrap(), "{}");
        assert!(first_choice_content(&serde_json::json!({"choices":[]})).is_err());
    }

    fn chat_against(base_url: &str, max_retries: u32, pacer: Arc<RecordingPacer>) -> OpenAiChat {
        let config = SummarizerConfig {
            base_url: base_url.to_string(),
            max_retries,
            timeout_secs: 5,
            ..SummarizerConfig::default()
        };
        OpenAiChat::new(&config, "sk-test", pacer).unwrap()
    }

    #[test]
    fn test_request_body_asks_for_json_object_within_token_budget() {
        let chat = chat_against("http://unused", 0, Arc::new(RecordingPacer::new()));
        let body = chat.request_body("sys", "Kingdom");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Kingdom");

        let plain = OpenAiChat::new(
            &SummarizerConfig {
                json_response: false,
                ..SummarizerConfig::default()
            },
            "sk-test",
            Arc::new(RecordingPacer::new()),
        )
        .unwrap();
        assert!(plain.request_body("sys", "T").get("response_format").is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_completion_backs_off_through_pacer() {
        let server = StubServer::start(429, "application/json", "{}").await;
        let pacer = Arc::new(RecordingPacer::new());
        let chat = chat_against(server.base_url(), 2, pacer.clone());

        let err = chat
            .complete("sys", "T", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("429"), "{}", err);
        assert_eq!(server.hits(), 3);
        assert_eq!(
            pacer.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_retry_loop_without_sleeping() {
        let server = StubServer::start(429, "application/json", "{}").await;
        let pacer = Arc::new(RecordingPacer::new());
        let chat = chat_against(server.base_url(), 2, pacer.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(chat.complete("sys", "T", &cancel).await.is_err());
        assert_eq!(server.hits(), 0);
        assert!(pacer.delays().is_empty());

        let s = Summarizer::new(Box::new(chat), "sys");
        assert!(matches!(
            s.summarize("T", &cancel).await,
            Err(PipelineError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_successful_completion_is_decoded() {
        let reply = r#"{"choices":[{"message":{"content":"{\"Genre\":\"Sports\"}"}}]}"#;
        let server = StubServer::start(200, "application/json", reply).await;
        let pacer = Arc::new(RecordingPacer::new());
        let s = Summarizer::new(Box::new(chat_against(server.base_url(), 2, pacer.clone())), "sys");

        let e = s.summarize("Blue Lock", &CancellationToken::new()).await.unwrap();
        assert_eq!(e.genre, "Sports");
        assert!(pacer.delays().is_empty());
    }

    /// Never answers.
    struct Hung;

    #[async_trait]
    impl ChatBackend for Hung {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_completion() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let s = Summarizer::new(Box::new(Hung), "sys");
        let res = tokio::time::timeout(Duration::from_secs(5), s.summarize("T", &cancel))
            .await
            .expect("summarize should return once cancelled");
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }
}
