//! Knowledge 모듈 - KCC 벡터 인덱스와 검색
//!
//! - Vector: 문서/매니페스트 타입과 저장소 트레이트
//! - Lance: LanceDB 기반 저장소 (코사인 거리)
//! - Indexer: 정제 코퍼스 → 임베딩 → 인덱스 교체
//! - Retriever: top-k 검색과 관련도 게이트

mod indexer;
mod lance;
mod retriever;
mod vector;

// Re-exports
pub use indexer::{embed_in_batches, BuildMode, EmbeddingIndexer, IndexReport};
pub use lance::LanceVectorStore;
pub use retriever::{filter_relevant, RelevanceGate, SemanticRetriever};
pub use vector::{
    Document, IndexManifest, QueryResult, ScoredDocument, VectorEntry, VectorStore,
    DOCUMENT_ID_PREFIX,
};
