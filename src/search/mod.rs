//! 웹 검색 폴백 - DuckDuckGo HTML 검색
//!
//! 로컬 인덱스에 관련 문서가 없을 때 사용됩니다.
//! API 키 없이 `html.duckduckgo.com/html/` 결과 페이지를 파싱합니다.
//!
//! 검색 실패(`SearchUnavailable`)와 결과 없음(`Ok(vec![])`)은 구분됩니다.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{SafeSearch, SearchConfig};
use crate::error::{KccError, Result};

static RESULT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__a").expect("valid selector"));
static SNIPPET_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__snippet").expect("valid selector"));

/// 리다이렉트 링크 (`//duckduckgo.com/l/?uddg=...`)의 기준 URL
const DDG_ORIGIN: &str = "https://duckduckgo.com";

// ============================================================================
// Types
// ============================================================================

/// 웹 검색 결과 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// 본문 요약
    pub snippet: String,
}

/// 웹 검색 트레이트
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// 검색 실행 (결과 순서 = 검색 엔진 순위)
    ///
    /// # Errors
    /// 네트워크 오류, 비정상 상태 코드, 레이트 리밋은 `SearchUnavailable`
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

// ============================================================================
// DuckDuckGo
// ============================================================================

/// DuckDuckGo HTML 검색 클라이언트
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    safesearch: SafeSearch,
    max_results: usize,
}

impl DuckDuckGoSearch {
    /// 설정으로 클라이언트 생성
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kcc-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        let endpoint = Url::parse(&config.base_url)
            .and_then(|base| base.join("html/"))
            .with_context(|| format!("Invalid search base URL: {}", config.base_url))?;

        Ok(Self {
            client,
            endpoint,
            region: config.region.clone(),
            safesearch: config.safesearch,
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        tracing::info!("Searching the web for: {}", query);

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("q", query),
                ("kl", self.region.as_str()),
                ("kp", self.safesearch.ddg_param()),
            ])
            .send()
            .await
            .map_err(|e| KccError::SearchUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        // DuckDuckGo는 차단 시 202와 확인 페이지를 돌려줌
        if status == StatusCode::ACCEPTED {
            return Err(KccError::SearchUnavailable(
                "rate limited by DuckDuckGo".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(KccError::SearchUnavailable(format!("HTTP {}", status)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| KccError::SearchUnavailable(format!("failed to read response: {}", e)))?;

        let hits = parse_results(&html, self.max_results);
        tracing::debug!("Web search returned {} results", hits.len());
        Ok(hits)
    }
}

// ============================================================================
// HTML Parsing
// ============================================================================

/// 결과 페이지에서 최대 `max`개 항목 추출 (광고 제외)
pub fn parse_results(html: &str, max: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);

    document
        .select(&RESULT_SELECTOR)
        .filter(|result| !result.value().classes().any(|c| c == "result--ad"))
        .filter_map(|result| {
            let link = result.select(&TITLE_SELECTOR).next()?;
            let title = element_text(&link);
            if title.is_empty() {
                return None;
            }

            let url = link.value().attr("href").map(resolve_href).unwrap_or_default();
            let snippet = result
                .select(&SNIPPET_SELECTOR)
                .next()
                .map(|s| element_text(&s))
                .unwrap_or_default();

            Some(SearchHit {
                title,
                url,
                snippet,
            })
        })
        .take(max)
        .collect()
}

/// 요소 텍스트 (공백 정리)
fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 결과 링크를 실제 대상 URL로 변환
///
/// `//duckduckgo.com/l/?uddg=<encoded>` 리다이렉트는 `uddg` 값을 디코딩합니다.
fn resolve_href(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("{}{}", DDG_ORIGIN, href)
    } else {
        href.to_string()
    };

    let Ok(url) = Url::parse(&absolute) else {
        return href.to_string();
    };

    if url.path() == "/l/" {
        if let Some((_, target)) = url.query_pairs().find(|(key, _)| key == "uddg") {
            return target.into_owned();
        }
    }
    url.to_string()
}

// ============================================================================
// Tests
// ============================================================================
