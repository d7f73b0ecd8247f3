//! 프롬프트 템플릿과 사용자 안내 문구

use crate::knowledge::Document;
use crate::search::SearchHit;

/// 로컬·웹 어디에서도 근거를 찾지 못했을 때의 안내
pub const NO_RESULTS_MESSAGE: &str = "⚠️ No relevant context found in local data or internet search. Please try rephrasing your query.";

/// 로컬 경로 생성 실패 안내
pub fn local_generation_failed(reason: &str) -> String {
    format!(
        "⚠️ Error generating answer from the local KCC dataset: {}",
        reason
    )
}

/// 웹 경로 생성 실패 안내
pub fn web_generation_failed(reason: &str) -> String {
    format!(
        "⚠️ Error using live internet data with the language model: {}",
        reason
    )
}

/// 웹 검색 실패 안내
pub fn search_unavailable(reason: &str) -> String {
    format!("⚠️ Live internet search is unavailable right now: {}", reason)
}

/// 로컬 문맥 프롬프트
///
/// 관련 문서를 빈 줄로 이어 붙이고, 질문 언어로 답한 뒤 영어 번역을 덧붙이도록 지시합니다.
pub fn local_prompt(query: &str, documents: &[Document]) -> String {
    let context = documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an AI assistant for the Kisan Call Center agricultural dataset.\n\
         Use the following context to answer the user's question in the same language as the context or question.\n\n\
         Then, provide the English translation of the answer below it.\n\n\
         Context:\n{context}\n\n\
         Question: {query}\n\n\
         Answer in local language and then its English translation:"
    )
}

/// 검색 결과 앞쪽 `count`개의 스니펫을 줄바꿈으로 연결
///
/// 스니펫이 비어 있으면 제목을 대신 씁니다.
pub fn web_context(hits: &[SearchHit], count: usize) -> String {
    hits.iter()
        .take(count)
        .map(|hit| {
            let snippet = hit.snippet.trim();
            if snippet.is_empty() {
                hit.title.trim()
            } else {
                snippet
            }
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 웹 문맥 프롬프트
pub fn web_prompt(query: &str, context: &str) -> String {
    format!(
        "⚠️ No relevant information was found in the local KCC dataset.\n\n\
         To assist the user, a live internet search was performed.\n\n\
         Based on the following search results, generate a helpful answer in English:\n\n\
         {context}\n\n\
         Question: {query}\n\n\
         Answer:"
    )
}
