//! Vector Store - 벡터 인덱스 트레이트 및 타입
//!
//! 인덱스는 Document id → (Document 텍스트, 임베딩) 매핑이며,
//! 전체 교체(replace)만 지원합니다. 부분 갱신은 없습니다.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::corpus::Record;

/// Document id 접두사
pub const DOCUMENT_ID_PREFIX: &str = "kcc_";

// ============================================================================
// Types
// ============================================================================

/// 임베딩/검색 단위 문서 (`Q: ..\nA: ..`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// 안정 식별자 (`kcc_<row_index>`)
    pub id: String,
    /// 문서 텍스트
    pub text: String,
}

impl Document {
    /// 정제 테이블의 행 번호와 레코드로 문서 생성
    pub fn from_record(row_index: usize, record: &Record) -> Self {
        Self {
            id: format!("{}{}", DOCUMENT_ID_PREFIX, row_index),
            text: format!("Q: {}\nA: {}", record.question, record.answer),
        }
    }
}

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub document: Document,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 거리 점수가 붙은 검색 결과 (작을수록 유사)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    /// 코사인 거리 (1 - 코사인 유사도)
    pub distance: f32,
}

/// 질의 결과 - 거리 오름차순, 길이 ≤ top_k
pub type QueryResult = Vec<ScoredDocument>;

/// 인덱스 매니페스트
///
/// 인덱스와 함께 저장되어 빌드에 사용된 임베딩 모델을 기록합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// 임베딩 모델 식별자
    pub model: String,
    pub dimension: usize,
    /// 인덱스 엔트리 수
    pub entries: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn new(model: &str, dimension: usize, entries: usize) -> Self {
        Self {
            model: model.to_string(),
            dimension,
            entries,
            built_at: Utc::now(),
        }
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 쓰기는 `replace_all` 하나뿐이며, 진행 중인 읽기는 교체 전 전체 집합 또는
/// 교체 후 전체 집합 중 하나만 보게 됩니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 인덱스 전체 교체 (엔트리 순서 = 인덱싱 순서)
    async fn replace_all(&self, entries: &[VectorEntry], manifest: &IndexManifest)
        -> Result<usize>;

    /// k-최근접 검색 (거리 오름차순)
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<QueryResult>;

    /// 엔트리 개수
    async fn count(&self) -> Result<usize>;

    /// 저장된 문서 목록
    async fn documents(&self) -> Result<Vec<Document>>;

    /// 마지막 빌드의 매니페스트 (없으면 None)
    async fn manifest(&self) -> Result<Option<IndexManifest>>;
}

// ============================================================================
// Tests
// ============================================================================
