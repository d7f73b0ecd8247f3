//! 설정 모듈 - TOML 기반 런타임 설정
//!
//! 저장 위치: ~/.kcc-rag/config.toml (없으면 기본값 사용)
//!
//! 모든 필드에 기본값이 있으므로 필요한 섹션만 적으면 됩니다.
//! ```toml
//! [retrieval]
//! top_k = 5
//! relevance_threshold = 0.3
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// 설정 파일 이름
const CONFIG_FILE_NAME: &str = "config.toml";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.kcc-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kcc-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 산출물(정제 CSV, JSONL, LanceDB)이 저장되는 디렉토리
    pub data_dir: PathBuf,
    pub corpus: CorpusConfig,
    pub embedding: EmbeddingConfig,
    pub ollama: OllamaConfig,
    pub retrieval: RetrievalConfig,
    pub search: SearchConfig,
}

/// 코퍼스 정제 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorpusConfig {
    /// 원본 CSV 경로 (미지정 시 data_dir/kcc.csv)
    pub raw_csv: Option<PathBuf>,
    /// 질문/답변 최소 길이 (이 값 이하이면 제외)
    pub min_chars: usize,
    /// `question` 컬럼으로 매핑할 헤더 이름
    pub question_aliases: Vec<String>,
    /// `answer` 컬럼으로 매핑할 헤더 이름
    pub answer_aliases: Vec<String>,
}

/// 임베딩 백엔드 종류
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// 로컬 Ollama 서버 (/api/embed)
    Ollama,
    /// 오프라인 해시 임베딩
    Hash,
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    /// 인덱스 빌드 시 한 번에 임베딩할 문서 수
    pub batch_size: usize,
}

/// Ollama 서버 설정 (임베딩 + 생성 공용)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub chat_model: String,
    pub timeout_secs: u64,
}

/// 검색/관련성 판정 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub table_name: String,
    pub top_k: usize,
    /// 유사도 임계값 (거리 컷오프 = 1 - threshold)
    pub relevance_threshold: f32,
}

/// 세이프서치 단계
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    Strict,
    Moderate,
    Off,
}

impl SafeSearch {
    /// DuckDuckGo `kp` 파라미터 값
    pub fn ddg_param(self) -> &'static str {
        match self {
            SafeSearch::Strict => "1",
            SafeSearch::Moderate => "-1",
            SafeSearch::Off => "-2",
        }
    }
}

/// 웹 검색 폴백 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub region: String,
    pub safesearch: SafeSearch,
    pub max_results: usize,
    /// 프롬프트에 넣을 스니펫 수
    pub snippet_count: usize,
    pub timeout_secs: u64,
}

/// 산출물 경로 모음
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub raw_csv: PathBuf,
    pub clean_csv: PathBuf,
    /// {question, answer} JSONL - 인덱스 빌드 여부 마커로도 사용
    pub qa_jsonl: PathBuf,
    pub documents_json: PathBuf,
    pub lance_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid relevance threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidThreshold(f32),
    #[error("Invalid top_k: {0} (must be at least 1)")]
    InvalidTopK(usize),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding dimension: {0}")]
    InvalidDimension(usize),
    #[error("Invalid model name: '{0}' (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid search result cap: {0} (must be at least 1)")]
    InvalidMaxResults(usize),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid table name: '{0}'")]
    InvalidTableName(String),
}

// ============================================================================
// Defaults
// ============================================================================

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            corpus: CorpusConfig::default(),
            embedding: EmbeddingConfig::default(),
            ollama: OllamaConfig::default(),
            retrieval: RetrievalConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            raw_csv: None,
            min_chars: 10,
            question_aliases: vec!["QueryText".to_string()],
            answer_aliases: vec!["KccAns".to_string()],
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Ollama,
            model: "all-minilm".to_string(),
            dimension: 384,
            batch_size: 16,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            chat_model: "gemma3".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            table_name: "kcc_data".to_string(),
            top_k: 5,
            relevance_threshold: 0.3,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://html.duckduckgo.com".to_string(),
            region: "in-en".to_string(),
            safesearch: SafeSearch::Moderate,
            max_results: 5,
            snippet_count: 3,
            timeout_secs: 15,
        }
    }
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl Config {
    /// 기본 설정 파일 경로 (~/.kcc-rag/config.toml)
    pub fn default_path() -> PathBuf {
        get_data_dir().join(CONFIG_FILE_NAME)
    }

    /// 설정 로드
    ///
    /// `path`가 주어지면 해당 파일이 반드시 존재해야 합니다.
    /// 주어지지 않으면 기본 경로를 읽고, 파일이 없으면 기본값을 사용합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = Self::default_path();
                if !default_path.exists() {
                    tracing::debug!("No config file at {:?}, using defaults", default_path);
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// TOML 문자열에서 설정 파싱 + 검증
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let threshold = self.retrieval.relevance_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        let table = &self.retrieval.table_name;
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidTableName(table.clone()));
        }

        let batch_size = self.embedding.batch_size;
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidDimension(self.embedding.dimension));
        }

        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding.model.clone()));
        }

        if self.ollama.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.ollama.chat_model.clone()));
        }

        if self.search.max_results == 0 {
            return Err(ConfigError::InvalidMaxResults(self.search.max_results));
        }

        Url::parse(&self.search.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.search.base_url.clone()))?;
        self.ollama.base_url()?;

        Ok(())
    }

    /// 산출물 경로 계산
    pub fn artifact_paths(&self) -> ArtifactPaths {
        let raw_csv = self
            .corpus
            .raw_csv
            .clone()
            .unwrap_or_else(|| self.data_dir.join("kcc.csv"));

        ArtifactPaths {
            raw_csv,
            clean_csv: self.data_dir.join("kcc_clean.csv"),
            qa_jsonl: self.data_dir.join("kcc_qa_pairs.jsonl"),
            documents_json: self.data_dir.join("kcc_documents.json"),
            lance_dir: self.data_dir.join("vectors.lance"),
        }
    }
}

impl OllamaConfig {
    /// Ollama 서버 기본 URL
    pub fn base_url(&self) -> std::result::Result<Url, ConfigError> {
        let url_str = format!("http://{}:{}", self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

// ============================================================================
// Tests
// ============================================================================
