//! LanceDB Vector Store - KCC 문서 벡터 인덱스
//!
//! 코사인 거리로 k-최근접 검색을 수행합니다.
//! 재빌드는 overwrite 모드로 새 데이터셋 버전을 만들기 때문에
//! 이전 버전을 읽던 검색은 중간 상태를 보지 않습니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::{Connection, CreateTableMode};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::vector::{Document, IndexManifest, QueryResult, ScoredDocument, VectorEntry, VectorStore};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    table_name: String,
    manifest_path: PathBuf,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `table_name` - 테이블 이름 (예: kcc_data)
    pub async fn open(path: &Path, table_name: &str) -> Result<Self> {
        if !path.exists() {
            tokio::fs::create_dir_all(path)
                .await
                .context("Failed to create LanceDB directory")?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            table_name: table_name.to_string(),
            manifest_path: path.join(format!("{}.manifest.json", table_name)),
        })
    }

    /// 테이블 이름
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(
        entries: &[VectorEntry],
        schema: SchemaRef,
        dimension: i32,
    ) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.document.id.as_str()).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.document.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list =
            FixedSizeListArray::try_new(field, dimension, Arc::new(values) as Arc<dyn Array>, None)
                .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&self.table_name))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(&self.table_name)
            .execute()
            .await
            .with_context(|| format!("Failed to open table '{}'", self.table_name))
    }

    /// 테이블 쓰기
    ///
    /// 비어있지 않으면 `mode`로 한 번에 생성(overwrite 포함),
    /// 비어있으면 기존 테이블을 지우고 빈 테이블을 만듭니다.
    async fn write_table(
        &self,
        entries: &[VectorEntry],
        dimension: i32,
        mode: CreateTableMode,
    ) -> Result<()> {
        let schema = Arc::new(Self::create_schema(dimension));

        if entries.is_empty() {
            self.drop_table_if_exists().await?;
            self.db
                .create_empty_table(&self.table_name, schema)
                .execute()
                .await
                .context("Failed to create empty table")?;
            return Ok(());
        }

        let batch = Self::entries_to_batch(entries, schema.clone(), dimension)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(&self.table_name, batches)
            .mode(mode)
            .execute()
            .await
            .context("Failed to write table")?;
        Ok(())
    }

    async fn drop_table_if_exists(&self) -> Result<()> {
        if self.table_exists().await {
            tracing::info!("Dropping table '{}'", self.table_name);
            self.db
                .drop_table(&self.table_name)
                .await
                .context("Failed to drop table")?;
        }
        Ok(())
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let json = serde_json::to_vec_pretty(manifest).context("Failed to serialize manifest")?;
        tokio::fs::write(&self.manifest_path, json)
            .await
            .with_context(|| format!("Failed to write manifest {:?}", self.manifest_path))
    }

    /// 테이블 교체: `mode`로 먼저 쓰고, 실패하면 지운 뒤 같은 이름으로 재생성
    async fn replace_with_mode(
        &self,
        entries: &[VectorEntry],
        manifest: &IndexManifest,
        mode: CreateTableMode,
    ) -> Result<usize> {
        let dimension = i32::try_from(manifest.dimension).context("Dimension out of range")?;

        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != manifest.dimension)
        {
            anyhow::bail!(
                "Embedding for {} has {} values, expected {}",
                bad.document.id,
                bad.embedding.len(),
                manifest.dimension
            );
        }

        if let Err(e) = self.write_table(entries, dimension, mode).await {
            tracing::warn!(
                "Could not replace table '{}' in place ({:#}), recreating",
                self.table_name,
                e
            );
            self.drop_table_if_exists().await?;
            self.write_table(entries, dimension, CreateTableMode::Create)
                .await
                .context("Failed to recreate table")?;
        }

        self.write_manifest(manifest).await?;
        Ok(entries.len())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn replace_all(
        &self,
        entries: &[VectorEntry],
        manifest: &IndexManifest,
    ) -> Result<usize> {
        self.replace_with_mode(entries, manifest, CreateTableMode::Overwrite)
            .await
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<QueryResult> {
        if limit == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;
        if table.count_rows(None).await.context("Failed to count rows")? == 0 {
            return Ok(vec![]);
        }

        let batches: Vec<RecordBatch> = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut results = Vec::new();

        for batch in batches {
            let (ids, texts) = document_columns(&batch)?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                results.push(ScoredDocument {
                    document: Document {
                        id: ids.value(i).to_string(),
                        text: texts.value(i).to_string(),
                    },
                    distance: distances.value(i),
                });
            }
        }

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(limit);
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table.count_rows(None).await.context("Failed to count rows")
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .execute()
            .await
            .context("Failed to scan table")?
            .try_collect()
            .await?;

        let mut documents = Vec::new();
        for batch in batches {
            let (ids, texts) = document_columns(&batch)?;
            for i in 0..batch.num_rows() {
                documents.push(Document {
                    id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                });
            }
        }
        Ok(documents)
    }

    async fn manifest(&self) -> Result<Option<IndexManifest>> {
        if !self.manifest_path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read(&self.manifest_path)
            .await
            .with_context(|| format!("Failed to read manifest {:?}", self.manifest_path))?;
        let manifest = serde_json::from_slice(&content).context("Failed to parse manifest")?;
        Ok(Some(manifest))
    }
}

/// RecordBatch에서 id / text 컬럼 추출
fn document_columns(batch: &RecordBatch) -> Result<(&StringArray, &StringArray)> {
    let ids = batch
        .column_by_name("id")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing id column"))?;

    let texts = batch
        .column_by_name("text")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing text column"))?;

    Ok((ids, texts))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn entry(row: usize, embedding: [f32; DIM]) -> VectorEntry {
        VectorEntry {
            document: Document {
                id: format!("kcc_{}", row),
                text: format!("Q: question {}\nA: answer {}", row, row),
            },
            embedding: embedding.to_vec(),
        }
    }

    /// `label`로 구분되는 엔트리 묶음
    fn labeled(label: &str, rows: usize) -> Vec<VectorEntry> {
        (0..rows)
            .map(|row| VectorEntry {
                document: Document {
                    id: format!("kcc_{}", row),
                    text: format!("Q: {} question {}\nA: {} answer {}", label, row, label, row),
                },
                embedding: vec![1.0, row as f32, 0.5, 0.0],
            })
            .collect()
    }

    fn as_set(documents: impl IntoIterator<Item = Document>) -> BTreeSet<(String, String)> {
        documents.into_iter().map(|d| (d.id, d.text)).collect()
    }

    async fn open_store(dir: &TempDir) -> LanceVectorStore {
        LanceVectorStore::open(&dir.path().join("vectors.lance"), "kcc_data")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 5).await.unwrap().is_empty());
        assert!(store.manifest().await.unwrap().is_none());
        assert!(store.documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_and_search_orders_by_distance() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let entries = vec![
            entry(0, [0.0, 1.0, 0.0, 0.0]),
            entry(1, [1.0, 0.0, 0.0, 0.0]),
            entry(2, [0.7, 0.7, 0.0, 0.0]),
        ];
        let manifest = IndexManifest::new("hash-bow/4", DIM, entries.len());
        assert_eq!(store.replace_all(&entries, &manifest).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 3);

        let results = store.search(&[1.0, 0.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.id, "kcc_1");
        assert_eq!(results[1].document.id, "kcc_2");
        assert!(results[0].distance < 0.01);
        assert!(results[0].distance <= results[1].distance);

        let stored = store.manifest().await.unwrap().unwrap();
        assert_eq!(stored.model, "hash-bow/4");
        assert_eq!(stored.entries, 3);
    }

    #[tokio::test]
    async fn test_replace_discards_previous_contents() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let first = vec![entry(0, [1.0, 0.0, 0.0, 0.0]), entry(1, [0.0, 1.0, 0.0, 0.0])];
        store
            .replace_all(&first, &IndexManifest::new("m", DIM, 2))
            .await
            .unwrap();

        let second = vec![entry(5, [0.0, 0.0, 1.0, 0.0])];
        store
            .replace_all(&second, &IndexManifest::new("m", DIM, 1))
            .await
            .unwrap();

        let docs = store.documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "kcc_5");
    }

    #[tokio::test]
    async fn test_replace_with_empty_entries() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .replace_all(&[entry(0, [1.0, 0.0, 0.0, 0.0])], &IndexManifest::new("m", DIM, 1))
            .await
            .unwrap();
        store
            .replace_all(&[], &IndexManifest::new("m", DIM, 0))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let bad = VectorEntry {
            document: Document {
                id: "kcc_0".to_string(),
                text: "Q: x\nA: y".to_string(),
            },
            embedding: vec![1.0, 0.0],
        };
        let result = store.replace_all(&[bad], &IndexManifest::new("m", DIM, 1)).await;
        assert!(result.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_see_whole_old_or_new_set_during_replace() {
        let dir = TempDir::new().unwrap();
        let writer = open_store(&dir).await;
        let reader = open_store(&dir).await;

        let old = labeled("old", 20);
        let new = labeled("new", 35);
        let old_set = as_set(old.iter().map(|e| e.document.clone()));
        let new_set = as_set(new.iter().map(|e| e.document.clone()));

        writer
            .replace_all(&old, &IndexManifest::new("m", DIM, old.len()))
            .await
            .unwrap();

        let done = AtomicBool::new(false);
        let write = async {
            writer
                .replace_all(&new, &IndexManifest::new("m", DIM, new.len()))
                .await
                .unwrap();
            done.store(true, Ordering::SeqCst);
        };
        let read = async {
            let mut snapshots = Vec::new();
            while !done.load(Ordering::SeqCst) {
                snapshots.push(as_set(reader.documents().await.unwrap()));
                let hits = reader.search(&[1.0, 0.0, 0.5, 0.0], 100).await.unwrap();
                snapshots.push(as_set(hits.into_iter().map(|h| h.document)));
            }
            snapshots
        };
        let ((), snapshots) = tokio::join!(write, read);

        for snapshot in &snapshots {
            assert!(
                *snapshot == old_set || *snapshot == new_set,
                "mixed read of {} entries",
                snapshot.len()
            );
        }
        assert_eq!(as_set(reader.documents().await.unwrap()), new_set);
    }

    #[tokio::test]
    async fn test_failed_write_recreates_table_under_same_name() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .replace_all(&labeled("old", 3), &IndexManifest::new("m", DIM, 3))
            .await
            .unwrap();

        // Create 모드는 테이블이 이미 있으면 실패하므로 재생성 경로를 탄다
        let new = labeled("new", 2);
        store
            .replace_with_mode(&new, &IndexManifest::new("m", DIM, 2), CreateTableMode::Create)
            .await
            .unwrap();

        assert_eq!(store.table_name(), "kcc_data");
        assert_eq!(
            as_set(store.documents().await.unwrap()),
            as_set(new.into_iter().map(|e| e.document))
        );
        assert_eq!(store.manifest().await.unwrap().unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_replace_across_dimension_change() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let wide = VectorEntry {
            document: Document {
                id: "kcc_0".to_string(),
                text: "Q: wide question\nA: wide answer".to_string(),
            },
            embedding: vec![0.5; 8],
        };
        store
            .replace_all(&[wide], &IndexManifest::new("m8", 8, 1))
            .await
            .unwrap();

        let narrow = labeled("new", 2);
        store
            .replace_all(&narrow, &IndexManifest::new("m4", DIM, 2))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.search(&[1.0, 0.0, 0.5, 0.0], 5).await.unwrap().len(), 2);
        assert_eq!(store.manifest().await.unwrap().unwrap().dimension, DIM);
    }
}
