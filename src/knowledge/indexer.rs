//! 임베딩 인덱서 - 정제 코퍼스 → 벡터 인덱스
//!
//! - 재사용 모드: 빌드 마커(JSONL)가 있고 매니페스트가 현재 모델·마커 레코드 수와 맞으면 기존 인덱스 사용
//! - 재빌드 모드: 정규화 → 정제 CSV 읽기 → 배치 임베딩 → 인덱스 전체 교체 → 마커 기록
//!
//! 마커는 인덱스 교체가 끝난 뒤에만 기록됩니다.
//! 재사용 실패는 호출자에게 전달되지 않고 재빌드로 이어집니다.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::{ArtifactPaths, Config};
use crate::corpus::{
    count_jsonl_records, read_clean_csv, write_clean_csv, write_qa_jsonl, CorpusNormalizer,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{KccError, Result};

use super::vector::{Document, IndexManifest, VectorEntry, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 빌드 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// 기존 인덱스 재사용
    Reused,
    /// 코퍼스에서 다시 빌드
    Rebuilt,
}

/// 빌드 결과
#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    pub mode: BuildMode,
    /// 인덱스 엔트리 수
    pub entries: usize,
    /// 인덱스 임베딩 모델
    pub model: String,
}

/// 문서 export 형식 (`kcc_documents.json`)
#[derive(Debug, Serialize)]
struct DocumentExport<'a> {
    page_content: &'a str,
    metadata: ExportMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct ExportMetadata<'a> {
    source: &'static str,
    id: &'a str,
}

// ============================================================================
// EmbeddingIndexer
// ============================================================================

/// 임베딩 인덱서
///
/// 인덱스에 쓰는 유일한 주체입니다. 동시에 여러 빌드가 돌지 않도록 내부 락을 잡습니다.
pub struct EmbeddingIndexer {
    normalizer: CorpusNormalizer,
    paths: ArtifactPaths,
    batch_size: usize,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    build_lock: Mutex<()>,
}

impl EmbeddingIndexer {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            normalizer: CorpusNormalizer::new(&config.corpus),
            paths: config.artifact_paths(),
            batch_size: config.embedding.batch_size.max(1),
            embedder,
            store,
            build_lock: Mutex::new(()),
        }
    }

    /// 인덱스 빌드
    ///
    /// # Arguments
    /// * `force_reload` - true면 마커와 무관하게 재빌드
    ///
    /// # Errors
    /// 원본 없음(`SourceNotFound`), 컬럼 누락(`Schema`), 임베딩/저장소 실패
    pub async fn build_index(&self, force_reload: bool) -> Result<IndexReport> {
        let _guard = self.build_lock.lock().await;

        if !force_reload && self.paths.qa_jsonl.exists() {
            match self.try_reuse().await {
                Ok(report) => {
                    tracing::info!(
                        "Reusing existing index ({} entries, model {})",
                        report.entries,
                        report.model
                    );
                    return Ok(report);
                }
                Err(e) => {
                    tracing::warn!("Could not reuse existing index ({:#}), rebuilding", e);
                }
            }
        }

        self.rebuild().await
    }

    /// 기존 인덱스 재사용 가능 여부 확인
    async fn try_reuse(&self) -> anyhow::Result<IndexReport> {
        let manifest = self
            .store
            .manifest()
            .await?
            .ok_or_else(|| anyhow::anyhow!("no index manifest"))?;

        if manifest.model != self.embedder.name() || manifest.dimension != self.embedder.dimension()
        {
            anyhow::bail!(
                "index built with {} ({}d), active model is {} ({}d)",
                manifest.model,
                manifest.dimension,
                self.embedder.name(),
                self.embedder.dimension()
            );
        }

        let count = self.store.count().await?;
        if count != manifest.entries {
            anyhow::bail!(
                "index holds {} entries but manifest records {}",
                count,
                manifest.entries
            );
        }

        let marked = count_jsonl_records(&self.paths.qa_jsonl)?;
        if marked != manifest.entries {
            anyhow::bail!(
                "build marker lists {} records but the index was built from {}",
                marked,
                manifest.entries
            );
        }

        Ok(IndexReport {
            mode: BuildMode::Reused,
            entries: count,
            model: manifest.model,
        })
    }

    /// 코퍼스에서 인덱스 재빌드
    async fn rebuild(&self) -> Result<IndexReport> {
        let corpus = self.normalizer.normalize_file(&self.paths.raw_csv)?;

        // 이전 빌드의 마커 제거 (교체 실패 시 재사용되지 않도록)
        if self.paths.qa_jsonl.exists() {
            fs::remove_file(&self.paths.qa_jsonl)
                .map_err(|e| KccError::artifact(&self.paths.qa_jsonl, e))?;
        }

        write_clean_csv(&corpus.records, &self.paths.clean_csv)?;
        tracing::info!(
            "Cleaned corpus: {} of {} rows kept ({} dropped)",
            corpus.records.len(),
            corpus.total_rows,
            corpus.dropped()
        );

        let records = read_clean_csv(&self.paths.clean_csv)?;
        let documents: Vec<Document> = records
            .iter()
            .enumerate()
            .map(|(row, record)| Document::from_record(row, record))
            .collect();

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let embeddings = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(|e| KccError::Embedding(format!("{:#}", e)))?;

        let entries: Vec<VectorEntry> = documents
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(document, embedding)| VectorEntry {
                document,
                embedding,
            })
            .collect();

        let manifest =
            IndexManifest::new(self.embedder.name(), self.embedder.dimension(), entries.len());
        self.store
            .replace_all(&entries, &manifest)
            .await
            .map_err(|e| KccError::IndexUnavailable(format!("{:#}", e)))?;

        write_documents_json(&documents, &self.paths.documents_json)?;
        write_qa_jsonl(&records, &self.paths.qa_jsonl)?;

        tracing::info!(
            "Loaded {} Q&A pairs into the index (model {})",
            entries.len(),
            manifest.model
        );

        Ok(IndexReport {
            mode: BuildMode::Rebuilt,
            entries: entries.len(),
            model: manifest.model,
        })
    }
}

/// 고정 크기 배치로 임베딩 (출력 순서 = 입력 순서)
pub async fn embed_in_batches(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut embeddings = Vec::with_capacity(texts.len());

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        tracing::debug!("Embedding batch {}/{}", i + 1, total_batches);
        let vectors = embedder
            .embed_batch(batch)
            .await
            .with_context(|| format!("Embedding batch {} failed", i + 1))?;

        if vectors.len() != batch.len() {
            anyhow::bail!(
                "Embedding batch {} returned {} vectors for {} texts",
                i + 1,
                vectors.len(),
                batch.len()
            );
        }
        embeddings.extend(vectors);
    }

    Ok(embeddings)
}

/// 문서 목록을 JSON 배열로 저장
fn write_documents_json(documents: &[Document], path: &Path) -> Result<()> {
    let export: Vec<DocumentExport<'_>> = documents
        .iter()
        .map(|d| DocumentExport {
            page_content: &d.text,
            metadata: ExportMetadata {
                source: "kcc",
                id: &d.id,
            },
        })
        .collect();

    let json = serde_json::to_string_pretty(&export).map_err(|e| KccError::artifact(path, e))?;
    std::fs::write(path, json).map_err(|e| KccError::artifact(path, e))
}

// ============================================================================
// Tests
// ============================================================================
