//! 질의 파이프라인 - 검색 → 관련도 게이트 → 로컬 답변 | 웹 폴백
//!
//! 상태 전이 (질의 1건):
//! `RETRIEVE → GATE → LOCAL_SYNTH | WEB_SEARCH → (WEB_SYNTH | NO_RESULTS)`
//!
//! 모든 경로는 `AnswerBundle`로 끝나며, 비어 있지 않은 질의에 대해서는
//! 에러를 밖으로 던지지 않습니다.

mod prompt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{KccError, Result};
use crate::knowledge::{
    EmbeddingIndexer, IndexReport, LanceVectorStore, QueryResult, RelevanceGate,
    SemanticRetriever, VectorStore,
};
use crate::llm::{ChatModel, OllamaChat};
use crate::search::{DuckDuckGoSearch, WebSearch};

pub use prompt::{
    local_generation_failed, local_prompt, search_unavailable, web_context,
    web_generation_failed, web_prompt, NO_RESULTS_MESSAGE,
};

// ============================================================================
// Types
// ============================================================================

/// 파이프라인 출력
///
/// 두 필드가 모두 비어 있으면 "모든 경로를 시도했지만 답이 없음"을 뜻합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerBundle {
    /// KCC 코퍼스 기반 답변
    pub local_answer: Option<String>,
    /// 웹 검색 폴백 답변 (또는 안내 문구)
    pub internet_answer: Option<String>,
}

impl AnswerBundle {
    pub fn is_empty(&self) -> bool {
        self.local_answer.is_none() && self.internet_answer.is_none()
    }
}

/// 질의가 도달한 종료 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// 로컬 문서로 답변 생성
    Local,
    /// 웹 스니펫으로 답변 생성
    Web,
    /// 웹 검색 결과 없음
    NoResults,
    /// 웹 검색 실패
    SearchFailed,
}

/// 경로 정보가 붙은 답변
#[derive(Debug, Clone, PartialEq)]
pub struct TracedAnswer {
    pub bundle: AnswerBundle,
    pub route: Route,
    /// 게이트를 통과한 로컬 문서 수
    pub relevant_documents: usize,
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// 답변 생성기 - 프롬프트 하나로 채팅 모델 1회 호출
pub struct AnswerSynthesizer {
    chat: Arc<dyn ChatModel>,
}

impl AnswerSynthesizer {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// 생성 실패나 빈 응답은 `Generation` 에러
    pub async fn synthesize(&self, prompt: &str) -> Result<String> {
        let text = self
            .chat
            .generate(prompt)
            .await
            .map_err(|e| KccError::Generation(format!("{:#}", e)))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(KccError::Generation(format!(
                "{} returned an empty response",
                self.chat.name()
            )));
        }
        Ok(text.to_string())
    }
}

// ============================================================================
// KccAssistant
// ============================================================================

/// KCC 질의응답 컨텍스트
///
/// 프로세스 시작 시 한 번 만들어 모든 요청이 공유합니다.
/// 인덱스 쓰기는 인덱서 하나만, 읽기는 여러 질의가 동시에 수행할 수 있습니다.
pub struct KccAssistant {
    config: Config,
    store: Arc<dyn VectorStore>,
    indexer: EmbeddingIndexer,
    retriever: SemanticRetriever,
    gate: RelevanceGate,
    search: Arc<dyn WebSearch>,
    synthesizer: AnswerSynthesizer,
}

impl KccAssistant {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        search: Arc<dyn WebSearch>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        let indexer = EmbeddingIndexer::new(&config, embedder.clone(), store.clone());
        let retriever = SemanticRetriever::new(embedder, store.clone());
        let gate = RelevanceGate::new(config.retrieval.relevance_threshold);

        Self {
            config,
            store,
            indexer,
            retriever,
            gate,
            search,
            synthesizer: AnswerSynthesizer::new(chat),
        }
    }

    /// 설정으로 실제 구현체(Ollama, LanceDB, DuckDuckGo)를 연결
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config)?;
        let store: Arc<dyn VectorStore> = Arc::new(
            LanceVectorStore::open(
                &config.artifact_paths().lance_dir,
                &config.retrieval.table_name,
            )
            .await?,
        );
        let search: Arc<dyn WebSearch> = Arc::new(DuckDuckGoSearch::new(&config.search)?);
        let chat: Arc<dyn ChatModel> = Arc::new(OllamaChat::from_config(&config)?);

        Ok(Self::new(config, embedder, store, search, chat))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// 인덱스 빌드 (재사용 또는 재빌드)
    pub async fn build_index(&self, force_reload: bool) -> Result<IndexReport> {
        self.indexer.build_index(force_reload).await
    }

    /// 로컬 인덱스 top-k 검색 (게이트 적용 전)
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<QueryResult> {
        self.retriever.retrieve(query, top_k).await
    }

    /// 질의 응답
    ///
    /// # Errors
    /// 빈 질의(`EmptyQuery`)만 에러로 반환합니다.
    pub async fn answer(&self, query: &str) -> Result<AnswerBundle> {
        Ok(self.answer_traced(query).await?.bundle)
    }

    /// 질의 응답 + 종료 경로
    pub async fn answer_traced(&self, query: &str) -> Result<TracedAnswer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KccError::EmptyQuery);
        }

        // RETRIEVE: 인덱스 문제는 빈 결과로 보고 폴백
        let candidates = match self
            .retriever
            .retrieve(query, self.config.retrieval.top_k)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Local retrieval failed ({}), falling back to web search", e);
                Vec::new()
            }
        };

        // GATE
        let relevant = self.gate.filter(&candidates);
        tracing::debug!(
            "{} of {} candidates within distance cutoff {:.3}",
            relevant.len(),
            candidates.len(),
            self.gate.cutoff()
        );

        let mut bundle = AnswerBundle::default();

        // LOCAL_SYNTH
        if !relevant.is_empty() {
            let prompt = local_prompt(query, &relevant);
            let answer = match self.synthesizer.synthesize(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Local answer generation failed: {}", e);
                    local_generation_failed(&reason_of(e))
                }
            };
            bundle.local_answer = Some(answer);
            return Ok(self.finish(bundle, Route::Local, relevant.len()));
        }

        // WEB_SEARCH
        tracing::info!("No relevant local documents, searching the web");
        let hits = match self.search.search(query).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("{}", e);
                bundle.internet_answer = Some(search_unavailable(&reason_of(e)));
                return Ok(self.finish(bundle, Route::SearchFailed, 0));
            }
        };

        if hits.is_empty() {
            bundle.internet_answer = Some(NO_RESULTS_MESSAGE.to_string());
            return Ok(self.finish(bundle, Route::NoResults, 0));
        }

        // WEB_SYNTH
        let context = web_context(&hits, self.config.search.snippet_count);
        let prompt = web_prompt(query, &context);
        let answer = match self.synthesizer.synthesize(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Web answer generation failed: {}", e);
                web_generation_failed(&reason_of(e))
            }
        };
        bundle.internet_answer = Some(answer);
        Ok(self.finish(bundle, Route::Web, 0))
    }

    fn finish(&self, bundle: AnswerBundle, route: Route, relevant_documents: usize) -> TracedAnswer {
        tracing::info!("Answered via {:?} route", route);
        TracedAnswer {
            bundle,
            route,
            relevant_documents,
        }
    }
}

/// 안내 문구에 넣을 에러 사유 (분류 접두어 제외)
fn reason_of(error: KccError) -> String {
    match error {
        KccError::SearchUnavailable(reason) | KccError::Generation(reason) => reason,
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::embedding::HashEmbedding;
    use crate::knowledge::{Document, IndexManifest, VectorEntry};
    use crate::search::SearchHit;

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    enum SearchBehavior {
        Hits(Vec<SearchHit>),
        Fail,
    }

    struct FakeSearch {
        behavior: SearchBehavior,
        calls: AtomicUsize,
    }

    impl FakeSearch {
        fn new(behavior: SearchBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WebSearch for FakeSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                SearchBehavior::Hits(hits) => Ok(hits.clone()),
                SearchBehavior::Fail => Err(KccError::SearchUnavailable("HTTP 503".to_string())),
            }
        }
    }

    /// 받은 프롬프트를 기록하고 고정 응답을 돌려주는 채팅 모델
    struct FakeChat {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeChat {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(reason.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(reason) => Err(anyhow::anyhow!("{}", reason)),
            }
        }

        fn name(&self) -> &str {
            "fake-chat"
        }
    }

    fn hit(snippet: &str) -> SearchHit {
        SearchHit {
            title: "Banana nutrition".to_string(),
            url: "https://example.org/banana".to_string(),
            snippet: snippet.to_string(),
        }
    }

    const APHID_DOC: &str = "Q: How to control aphids on cotton?\nA: Use neem oil spray weekly.";

    async fn assistant(
        dir: &TempDir,
        documents: &[&str],
        search: Arc<FakeSearch>,
        chat: Arc<FakeChat>,
    ) -> KccAssistant {
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.embedding.dimension = 384;

        let embedder = HashEmbedding::new(384).unwrap();
        let store = LanceVectorStore::open(&config.artifact_paths().lance_dir, "kcc_data")
            .await
            .unwrap();

        let entries: Vec<VectorEntry> = documents
            .iter()
            .enumerate()
            .map(|(i, text)| VectorEntry {
                document: Document {
                    id: format!("kcc_{}", i),
                    text: text.to_string(),
                },
                embedding: embedder.embed_text(text),
            })
            .collect();
        let manifest = IndexManifest::new(embedder.name(), 384, entries.len());
        store.replace_all(&entries, &manifest).await.unwrap();

        KccAssistant::new(config, Arc::new(embedder), Arc::new(store), search, chat)
    }

    // ------------------------------------------------------------------------
    // Synthesizer
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_synthesize_trims_output() {
        let synthesizer = AnswerSynthesizer::new(FakeChat::replying("  Sow in November.\n"));
        assert_eq!(synthesizer.synthesize("p").await.unwrap(), "Sow in November.");
    }

    #[tokio::test]
    async fn test_synthesize_empty_output_is_generation_error() {
        let synthesizer = AnswerSynthesizer::new(FakeChat::replying("   "));
        let err = synthesizer.synthesize("p").await.unwrap_err();
        assert!(matches!(err, KccError::Generation(_)));
    }

    #[tokio::test]
    async fn test_synthesize_failure_is_generation_error() {
        let synthesizer = AnswerSynthesizer::new(FakeChat::failing("connection refused"));
        match synthesizer.synthesize("p").await {
            Err(KccError::Generation(reason)) => assert!(reason.contains("connection refused")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    // ------------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_relevant_local_document_takes_local_route() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Fail);
        let chat = FakeChat::replying("Neem oil works.");
        let kcc = assistant(&dir, &[APHID_DOC], search.clone(), chat.clone()).await;

        let traced = kcc.answer_traced("aphid control in cotton crop").await.unwrap();

        assert_eq!(traced.route, Route::Local);
        assert_eq!(traced.relevant_documents, 1);
        assert_eq!(traced.bundle.local_answer.as_deref(), Some("Neem oil works."));
        assert!(traced.bundle.internet_answer.is_none());
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
        assert!(chat.prompts()[0].contains(APHID_DOC));
    }

    #[tokio::test]
    async fn test_empty_index_goes_to_web() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Hits(vec![
            hit("Apply potash in splits."),
            hit("Mulch to keep moisture."),
            hit("Drip irrigation helps."),
            hit("Not used."),
        ]));
        let chat = FakeChat::replying("Use potash and mulch.");
        let kcc = assistant(&dir, &[], search.clone(), chat.clone()).await;

        let traced = kcc
            .answer_traced("best fertilizer for banana in dry season")
            .await
            .unwrap();

        assert_eq!(traced.route, Route::Web);
        assert!(traced.bundle.local_answer.is_none());
        assert_eq!(traced.bundle.internet_answer.as_deref(), Some("Use potash and mulch."));
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);

        let prompt = &chat.prompts()[0];
        assert!(prompt.contains("Apply potash in splits.\nMulch to keep moisture.\nDrip irrigation helps."));
        assert!(!prompt.contains("Not used."));
    }

    #[tokio::test]
    async fn test_unrelated_query_is_gated_out() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Hits(vec![hit("Banana needs potash.")]));
        let chat = FakeChat::replying("Potash.");
        let kcc = assistant(&dir, &[APHID_DOC], search.clone(), chat).await;

        let traced = kcc
            .answer_traced("best fertilizer for banana in dry season")
            .await
            .unwrap();

        assert_eq!(traced.route, Route::Web);
        assert!(traced.bundle.local_answer.is_none());
    }

    #[tokio::test]
    async fn test_no_search_results_returns_fixed_message() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Hits(Vec::new()));
        let chat = FakeChat::replying("unused");
        let kcc = assistant(&dir, &[], search, chat.clone()).await;

        let traced = kcc.answer_traced("qwertyuiop zxcvbnm").await.unwrap();

        assert_eq!(traced.route, Route::NoResults);
        assert!(traced.bundle.local_answer.is_none());
        assert_eq!(traced.bundle.internet_answer.as_deref(), Some(NO_RESULTS_MESSAGE));
        assert!(chat.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_hits_with_blank_snippets_still_synthesize() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Hits(vec![hit(""), hit("   ")]));
        let chat = FakeChat::replying("Banana needs potash.");
        let kcc = assistant(&dir, &[], search, chat.clone()).await;

        let traced = kcc.answer_traced("banana fertilizer").await.unwrap();

        assert_eq!(traced.route, Route::Web);
        assert_eq!(
            traced.bundle.internet_answer.as_deref(),
            Some("Banana needs potash.")
        );
        assert!(chat.prompts()[0].contains("Banana nutrition\nBanana nutrition"));
    }

    #[tokio::test]
    async fn test_search_failure_becomes_message() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Fail);
        let chat = FakeChat::replying("unused");
        let kcc = assistant(&dir, &[], search, chat).await;

        let bundle = kcc.answer("banana fertilizer").await.unwrap();

        assert!(bundle.local_answer.is_none());
        let message = bundle.internet_answer.unwrap();
        assert_eq!(message, search_unavailable("HTTP 503"));
        assert_ne!(message, NO_RESULTS_MESSAGE);
    }

    #[tokio::test]
    async fn test_local_generation_failure_becomes_placeholder() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Fail);
        let chat = FakeChat::failing("model not loaded");
        let kcc = assistant(&dir, &[APHID_DOC], search, chat).await;

        let bundle = kcc.answer("aphid control in cotton crop").await.unwrap();

        assert_eq!(
            bundle.local_answer.as_deref(),
            Some(local_generation_failed("model not loaded").as_str())
        );
        assert!(bundle.internet_answer.is_none());
    }

    #[tokio::test]
    async fn test_web_generation_failure_becomes_placeholder() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Hits(vec![hit("Apply potash.")]));
        let chat = FakeChat::failing("model not loaded");
        let kcc = assistant(&dir, &[], search, chat).await;

        let traced = kcc.answer_traced("banana fertilizer").await.unwrap();

        assert_eq!(traced.route, Route::Web);
        assert_eq!(
            traced.bundle.internet_answer.as_deref(),
            Some(web_generation_failed("model not loaded").as_str())
        );
    }

    #[tokio::test]
    async fn test_model_mismatch_falls_back_to_web() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();

        let embedder = HashEmbedding::new(384).unwrap();
        let store = LanceVectorStore::open(&config.artifact_paths().lance_dir, "kcc_data")
            .await
            .unwrap();
        let entries = vec![VectorEntry {
            document: Document {
                id: "kcc_0".to_string(),
                text: APHID_DOC.to_string(),
            },
            embedding: embedder.embed_text(APHID_DOC),
        }];
        let manifest = IndexManifest::new("ollama/all-minilm", 384, 1);
        store.replace_all(&entries, &manifest).await.unwrap();

        let search = FakeSearch::new(SearchBehavior::Hits(vec![hit("Neem oil.")]));
        let kcc = KccAssistant::new(
            config,
            Arc::new(embedder),
            Arc::new(store),
            search.clone(),
            FakeChat::replying("Spray neem."),
        );

        let traced = kcc.answer_traced("aphid control in cotton crop").await.unwrap();
        assert_eq!(traced.route, Route::Web);
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let dir = TempDir::new().unwrap();
        let search = FakeSearch::new(SearchBehavior::Fail);
        let kcc = assistant(&dir, &[APHID_DOC], search.clone(), FakeChat::replying("x")).await;

        assert!(matches!(kcc.answer("").await, Err(KccError::EmptyQuery)));
        assert!(matches!(kcc.answer("   \n\t").await, Err(KccError::EmptyQuery)));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bundle_is_empty() {
        assert!(AnswerBundle::default().is_empty());
        let bundle = AnswerBundle {
            local_answer: None,
            internet_answer: Some(NO_RESULTS_MESSAGE.to_string()),
        };
        assert!(!bundle.is_empty());
    }
}
