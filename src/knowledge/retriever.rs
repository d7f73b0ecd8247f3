//! 시맨틱 검색 + 관련도 게이트
//!
//! 질의를 인덱스와 같은 모델로 임베딩해 top-k 최근접 문서를 찾고,
//! 게이트가 거리 컷오프(`1 - threshold`) 이내의 문서만 남깁니다.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{KccError, Result};

use super::vector::{Document, QueryResult, VectorStore};

// ============================================================================
// SemanticRetriever
// ============================================================================

/// 시맨틱 검색기
pub struct SemanticRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl SemanticRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// top-k 최근접 문서 검색 (거리 오름차순)
    ///
    /// 인덱스가 다른 모델로 빌드되었으면 `ModelMismatch`를 반환합니다.
    /// 비어 있는 인덱스는 빈 결과입니다.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<QueryResult> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let manifest = self
            .store
            .manifest()
            .await
            .map_err(|e| KccError::IndexUnavailable(format!("{:#}", e)))?;

        if let Some(manifest) = manifest {
            if manifest.model != self.embedder.name() {
                return Err(KccError::ModelMismatch {
                    indexed: manifest.model,
                    active: self.embedder.name().to_string(),
                });
            }
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| KccError::Embedding(format!("{:#}", e)))?;

        let mut results = self
            .store
            .search(&embedding, top_k)
            .await
            .map_err(|e| KccError::IndexUnavailable(format!("{:#}", e)))?;

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(top_k);

        tracing::debug!(
            "Retrieved {} candidates (best distance: {:?})",
            results.len(),
            results.first().map(|r| r.distance)
        );

        Ok(results)
    }
}

// ============================================================================
// RelevanceGate
// ============================================================================

/// 관련도 게이트
///
/// 거리 ≤ `1 - threshold`인 후보만 통과시키고 순서는 유지합니다.
/// threshold가 높을수록 더 가까운 문서만 통과합니다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceGate {
    threshold: f32,
}

impl RelevanceGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// 거리 컷오프
    pub fn cutoff(&self) -> f32 {
        1.0 - self.threshold
    }

    /// 컷오프 이내 문서만 반환 (입력 순서 유지)
    pub fn filter(&self, result: &QueryResult) -> Vec<Document> {
        let cutoff = self.cutoff();
        result
            .iter()
            .filter(|scored| scored.distance <= cutoff)
            .map(|scored| scored.document.clone())
            .collect()
    }
}

/// `RelevanceGate::new(threshold).filter(result)`
pub fn filter_relevant(result: &QueryResult, threshold: f32) -> Vec<Document> {
    RelevanceGate::new(threshold).filter(result)
}

// ============================================================================
// Tests
// ============================================================================
