//! CLI 모듈
//!
//! kcc-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::corpus::CorpusNormalizer;
use crate::knowledge::{BuildMode, RelevanceGate};
use crate::pipeline::{KccAssistant, Route};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "kcc-rag")]
#[command(version, about = "Kisan Call Center 농업 질의응답 RAG", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: <데이터 디렉토리>/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 원본 CSV 정제 (정제 CSV + JSONL 생성)
    Preprocess {
        /// 원본 CSV 경로 (기본: 설정값)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// 벡터 인덱스 빌드
    Ingest {
        /// 기존 인덱스가 있어도 재빌드
        #[arg(long)]
        force: bool,
    },

    /// 질문하기 (로컬 검색 → 웹 폴백 → 답변 생성)
    Ask {
        /// 질문
        query: String,

        /// 검색 후보 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 관련도 임계값 (0.0 ~ 1.0)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// 질문 전에 인덱스 재빌드
        #[arg(long)]
        rebuild: bool,
    },

    /// 로컬 인덱스 검색 (답변 생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Preprocess { input } => cmd_preprocess(config, input),
        Commands::Ingest { force } => cmd_ingest(config, force).await,
        Commands::Ask {
            query,
            top_k,
            threshold,
            rebuild,
        } => cmd_ask(config, &query, top_k, threshold, rebuild).await,
        Commands::Search { query, top_k } => cmd_search(config, &query, top_k).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 정제 명령어 (preprocess)
fn cmd_preprocess(mut config: Config, input: Option<PathBuf>) -> Result<()> {
    if input.is_some() {
        config.corpus.raw_csv = input;
    }
    let paths = config.artifact_paths();

    println!("[*] 원본 정제 중: {}", paths.raw_csv.display());

    let corpus = CorpusNormalizer::new(&config.corpus)
        .preprocess(&paths)
        .context("코퍼스 정제 실패")?;

    println!(
        "[OK] 정제 완료: {} 행 중 {} 건 유지, {} 건 제외",
        corpus.total_rows,
        corpus.records.len(),
        corpus.dropped()
    );
    println!("     정제 CSV: {}", paths.clean_csv.display());
    println!("     JSONL: {}", paths.qa_jsonl.display());

    Ok(())
}

/// 인덱스 빌드 명령어 (ingest)
async fn cmd_ingest(config: Config, force: bool) -> Result<()> {
    println!(
        "[*] 인덱스 빌드 중 (모델: {}, 배치: {})",
        config.embedding.model, config.embedding.batch_size
    );

    let assistant = KccAssistant::from_config(config)
        .await
        .context("KccAssistant 초기화 실패")?;

    let report = assistant
        .build_index(force)
        .await
        .context("인덱스 빌드 실패")?;

    match report.mode {
        BuildMode::Reused => println!(
            "[OK] 기존 인덱스 재사용: {} 건 ({})",
            report.entries, report.model
        ),
        BuildMode::Rebuilt => println!(
            "[OK] 인덱스 재빌드 완료: {} 건 ({})",
            report.entries, report.model
        ),
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    mut config: Config,
    query: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
    rebuild: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("질문이 비어 있습니다");
    }

    if let Some(k) = top_k {
        config.retrieval.top_k = k;
    }
    if let Some(t) = threshold {
        config.retrieval.relevance_threshold = t;
    }
    config.validate()?;

    let assistant = KccAssistant::from_config(config)
        .await
        .context("KccAssistant 초기화 실패")?;

    // 인덱스 준비 실패는 치명적이지 않음 (웹 폴백으로 계속)
    if let Err(e) = assistant.build_index(rebuild).await {
        println!("[!] 인덱스 준비 실패: {}", e);
        println!("    로컬 데이터 없이 진행합니다.");
    }

    println!("[*] 질문: \"{}\"\n", query);

    let traced = assistant.answer_traced(query).await?;
    let bundle = traced.bundle;

    if let Some(ref answer) = bundle.local_answer {
        println!("=== Advice from KCC Database ===\n");
        println!("{}\n", answer);
        println!("(관련 문서 {} 건)", traced.relevant_documents);
    }

    if let Some(ref answer) = bundle.internet_answer {
        println!("=== Fallback Answer from Live Internet Search ===\n");
        println!("{}\n", answer);
    }

    if bundle.is_empty() {
        println!("[!] 로컬 데이터와 웹 검색 모두에서 답을 찾지 못했습니다.");
    }

    let route = match traced.route {
        Route::Local => "로컬 KCC 데이터",
        Route::Web => "웹 검색",
        Route::NoResults => "웹 검색 (결과 없음)",
        Route::SearchFailed => "웹 검색 (실패)",
    };
    println!("[*] 경로: {}", route);

    Ok(())
}

/// 검색 명령어 (search)
///
/// 로컬 인덱스 top-k 결과와 관련도 게이트 통과 여부를 출력합니다.
async fn cmd_search(config: Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("검색어가 비어 있습니다");
    }

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let gate = RelevanceGate::new(config.retrieval.relevance_threshold);

    let assistant = KccAssistant::from_config(config)
        .await
        .context("KccAssistant 초기화 실패")?;

    println!("[*] 검색 중: \"{}\"", query);

    let results = assistant.retrieve(query, top_k).await.context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!(
        "\n[OK] 검색 결과 ({} 건, 거리 컷오프 {:.3}):\n",
        results.len(),
        gate.cutoff()
    );

    for (i, result) in results.iter().enumerate() {
        let marker = if result.distance <= gate.cutoff() {
            "REL"
        } else {
            "---"
        };

        println!(
            "{}. [{}] [거리: {:.4}] {}",
            i + 1,
            marker,
            result.distance,
            result.document.id
        );
        println!("   내용: {}", truncate_text(&result.document.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: Config) -> Result<()> {
    println!("kcc-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let paths = config.artifact_paths();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    for (label, path) in [
        ("원본 CSV", &paths.raw_csv),
        ("정제 CSV", &paths.clean_csv),
        ("JSONL (빌드 마커)", &paths.qa_jsonl),
        ("문서 JSON", &paths.documents_json),
    ] {
        match file_size(path) {
            Some(size) => println!("[OK] {}: {} ({})", label, path.display(), format_bytes(size)),
            None => println!("[!] {}: 없음 ({})", label, path.display()),
        }
    }

    println!(
        "[*] 임베딩: {:?} / {} ({}차원)",
        config.embedding.provider, config.embedding.model, config.embedding.dimension
    );
    println!(
        "[*] 생성 모델: {} @ {}:{}",
        config.ollama.chat_model, config.ollama.host, config.ollama.port
    );
    println!(
        "[*] 검색: top_k {}, 임계값 {}",
        config.retrieval.top_k, config.retrieval.relevance_threshold
    );

    match KccAssistant::from_config(config).await {
        Ok(assistant) => {
            let store = assistant.store();
            match store.count().await {
                Ok(count) => println!("[OK] 벡터 인덱스: {} 건", count),
                Err(e) => println!("[!] 벡터 인덱스 조회 실패: {}", e),
            }
            match store.manifest().await {
                Ok(Some(manifest)) => println!(
                    "     모델: {} ({}차원), 빌드: {}",
                    manifest.model,
                    manifest.dimension,
                    manifest.built_at.format("%Y-%m-%d %H:%M")
                ),
                Ok(None) => println!("[!] 인덱스 매니페스트 없음 (ingest 필요)"),
                Err(e) => tracing::debug!("매니페스트 조회 실패: {}", e),
            }
        }
        Err(e) => {
            println!("[!] KccAssistant 초기화 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_document_text() {
        let doc = "Q: How to control aphids on cotton?\nA: Use neem oil spray weekly.";
        assert_eq!(
            truncate_text(doc, 200),
            "Q: How to control aphids on cotton? A: Use neem oil spray weekly."
        );
        assert_eq!(truncate_text(doc, 14), "Q: How to cont...");
    }

    #[test]
    fn test_truncate_unicode() {
        let hindi = "कपास में कीट नियंत्रण";
        let truncated = truncate_text(hindi, 4);
        assert_eq!(truncated, "कपास...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_format_bytes_beyond_u32() {
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5120.00 MB");
    }

    #[test]
    fn test_file_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kcc.csv");
        std::fs::write(&path, "QueryText,KccAns\n").unwrap();

        assert_eq!(file_size(&path), Some(17));
        assert_eq!(file_size(&dir.path().join("missing.csv")), None);
    }

    #[tokio::test]
    async fn test_search_rejects_blank_query() {
        let err = cmd_search(Config::default(), "  \t ", None).await.unwrap_err();
        assert!(err.to_string().contains("비어"));
    }

    #[tokio::test]
    async fn test_ask_rejects_blank_query() {
        assert!(cmd_ask(Config::default(), "", None, None, false).await.is_err());
    }

    #[test]
    fn test_parse_ask_with_overrides() {
        let cli = Cli::parse_from([
            "kcc-rag",
            "--config",
            "/tmp/kcc.toml",
            "ask",
            "aphid control",
            "-k",
            "3",
            "--threshold",
            "0.5",
            "--rebuild",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/kcc.toml")));
        match cli.command {
            Commands::Ask {
                query,
                top_k,
                threshold,
                rebuild,
            } => {
                assert_eq!(query, "aphid control");
                assert_eq!(top_k, Some(3));
                assert_eq!(threshold, Some(0.5));
                assert!(rebuild);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_ingest_force() {
        let cli = Cli::parse_from(["kcc-rag", "ingest", "--force"]);
        assert!(matches!(cli.command, Commands::Ingest { force: true }));
    }
}
