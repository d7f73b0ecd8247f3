//! kcc-rag - Kisan Call Center 농업 질의응답 RAG
//!
//! KCC 질의응답 기록을 LanceDB 벡터 인덱스에 넣고, 질문과 가까운 기록이 있으면
//! 그 기록으로, 없으면 DuckDuckGo 웹 검색 결과로 Ollama 모델이 답변을 생성합니다.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod search;

// Re-exports
pub use config::{get_data_dir, ArtifactPaths, Config};
pub use corpus::{CleanedCorpus, CorpusNormalizer, Record};
pub use embedding::{create_embedder, EmbeddingProvider, HashEmbedding, OllamaEmbedding};
pub use error::{KccError, Result};
pub use knowledge::{
    filter_relevant, BuildMode, Document, EmbeddingIndexer, IndexManifest, IndexReport,
    LanceVectorStore, QueryResult, RelevanceGate, ScoredDocument, SemanticRetriever,
    VectorEntry, VectorStore,
};
pub use llm::{ChatModel, OllamaChat};
pub use pipeline::{AnswerBundle, AnswerSynthesizer, KccAssistant, Route, TracedAnswer};
pub use search::{DuckDuckGoSearch, SearchHit, WebSearch};
