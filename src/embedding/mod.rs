//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 인덱스 빌드와 질의 시점에 같은 프로바이더를 사용해야 거리 값이 의미를 가집니다.
//! 프로바이더의 `name()`이 모델 식별자로 인덱스 매니페스트에 기록됩니다.
//!
//! - `OllamaEmbedding`: 로컬 Ollama 서버 (`/api/embed`, 배치 입력 지원)
//! - `HashEmbedding`: 네트워크 없이 동작하는 해시 bag-of-words 임베딩
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config)?;
//! let vectors = embedder.embed_batch(&texts).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::{Config, EmbeddingBackend};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
/// 배치 임베딩 결과는 항목별 단일 임베딩 결과와 같아야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 모델 식별자 (인덱스 매니페스트에 기록됨)
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// 요청 타임아웃 기본값
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// 전송 실패 / 5xx 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;

/// Ollama 임베딩 구현체
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    model_id: String,
    dimension: usize,
    retry_attempts: u32,
}

/// `/api/embed` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// `/api/embed` 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 URL (예: http://localhost:11434)
    /// * `model` - 임베딩 모델 이름 (예: all-minilm)
    /// * `dimension` - 모델 출력 차원
    pub fn new(base_url: &Url, model: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let endpoint = base_url
            .join("api/embed")
            .context("Failed to build embedding URL")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            model_id: format!("ollama/{}", model),
            dimension,
            retry_attempts: MAX_RETRIES,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.ollama.base_url()?;
        Ok(Self::new(&base_url, &config.embedding.model, config.embedding.dimension)?
            .with_timeout(Duration::from_secs(config.ollama.timeout_secs))?)
    }

    /// 타임아웃 변경
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(self)
    }

    /// 재시도 횟수 변경
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// 응답 벡터 검증
    fn check_vectors(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                vectors.len(),
                expected
            );
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch: model '{}' returned {} values, expected {}",
                self.model,
                bad.len(),
                self.dimension
            );
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (전송 실패, 429, 5xx 시 지수 백오프)
        for attempt in 0..=self.retry_attempts {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.retry_attempts
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(self.endpoint.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                self.check_vectors(texts.len(), &parsed.embeddings)?;
                tracing::debug!("Embedded {} texts with {}", texts.len(), self.model_id);
                return Ok(parsed.embeddings);
            }

            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(anyhow::anyhow!("Ollama API error ({}): {}", status, message));
                continue;
            }

            // 4xx - 즉시 실패 (모델 없음 등)
            anyhow::bail!("Ollama API error ({}): {}", status, message);
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Embedding failed after {} retries", self.retry_attempts)
        }))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Hash Embedding (offline)
// ============================================================================

/// 해시 bag-of-words 임베딩
///
/// 토큰을 SHA-256으로 버킷에 매핑한 뒤 L2 정규화합니다.
/// 의미 유사도가 아닌 어휘 겹침을 측정하므로 오프라인 개발과 테스트용입니다.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
    model_id: String,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }
        Ok(Self {
            dimension,
            model_id: format!("hash-bow/{}", dimension),
        })
    }

    /// 동기 임베딩 계산
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}

/// 소문자화 + 영숫자 분리 + 3글자 미만 제거 + 복수형 's' 제거
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| {
            if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                t[..t.len() - 1].to_string()
            } else {
                t.to_string()
            }
        })
        .collect()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedding::from_config(config)?),
        EmbeddingBackend::Hash => Arc::new(HashEmbedding::new(config.embedding.dimension)?),
    };

    tracing::info!(
        "Using embedding model {} (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
