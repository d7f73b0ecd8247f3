//! LLM 모듈 - 로컬 Ollama 채팅 모델
//!
//! 답변 생성은 단일 사용자 메시지 → 단일 응답의 비스트리밍 호출입니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 채팅 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 프롬프트 하나에 대한 응답 텍스트
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Chat
// ============================================================================

/// Ollama `/api/chat` 클라이언트
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaChat {
    /// 새 채팅 클라이언트 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 URL
    /// * `model` - 채팅 모델 이름 (예: gemma3)
    /// * `timeout` - 요청 타임아웃 (생성은 오래 걸릴 수 있음)
    pub fn new(base_url: &Url, model: &str, timeout: Duration) -> Result<Self> {
        let endpoint = base_url
            .join("api/chat")
            .context("Failed to build chat URL")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.ollama.base_url()?;
        Self::new(
            &base_url,
            &config.ollama.chat_model,
            Duration::from_secs(config.ollama.timeout_secs),
        )
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.endpoint))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("Ollama API error ({}): {}", status, message);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse chat response")?;
        tracing::debug!(
            "{} generated {} chars",
            self.model,
            parsed.message.content.chars().count()
        );
        Ok(parsed.message.content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
