//! 코퍼스 정제 모듈 - KCC 원본 CSV 정규화
//!
//! 원본 Kisan Call Center CSV를 읽어 질문/답변 컬럼을 표준 이름으로 매핑하고,
//! 공백을 정리한 뒤 너무 짧은 행을 제거합니다.
//!
//! 산출물:
//! - 정제 CSV (`question`, `answer` 두 컬럼)
//! - `{question, answer}` JSONL (입력 행 순서 그대로)

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ArtifactPaths, CorpusConfig};
use crate::error::{KccError, Result};

/// 표준 질문 컬럼 이름
pub const QUESTION_COLUMN: &str = "question";
/// 표준 답변 컬럼 이름
pub const ANSWER_COLUMN: &str = "answer";

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

// ============================================================================
// Types
// ============================================================================

/// 질문/답변 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub question: String,
    pub answer: String,
}

/// 정제 결과
#[derive(Debug, Clone, Default)]
pub struct CleanedCorpus {
    /// 살아남은 레코드 (입력 행 순서 유지)
    pub records: Vec<Record>,
    /// 읽은 전체 데이터 행 수
    pub total_rows: usize,
}

impl CleanedCorpus {
    /// 제거된 행 수
    pub fn dropped(&self) -> usize {
        self.total_rows.saturating_sub(self.records.len())
    }
}

// ============================================================================
// CorpusNormalizer
// ============================================================================

/// 코퍼스 정규화기
#[derive(Debug, Clone)]
pub struct CorpusNormalizer {
    min_chars: usize,
    question_aliases: Vec<String>,
    answer_aliases: Vec<String>,
}

impl Default for CorpusNormalizer {
    fn default() -> Self {
        Self::new(&CorpusConfig::default())
    }
}

impl CorpusNormalizer {
    pub fn new(config: &CorpusConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            question_aliases: config.question_aliases.clone(),
            answer_aliases: config.answer_aliases.clone(),
        }
    }

    /// 원본 CSV → 정제 CSV + JSONL
    ///
    /// 원본 파일이 없으면 `SourceNotFound`, 필수 컬럼이 없으면 `Schema` 에러입니다.
    pub fn preprocess(&self, paths: &ArtifactPaths) -> Result<CleanedCorpus> {
        let corpus = self.normalize_file(&paths.raw_csv)?;

        write_clean_csv(&corpus.records, &paths.clean_csv)?;
        write_qa_jsonl(&corpus.records, &paths.qa_jsonl)?;

        tracing::info!(
            "Cleaned corpus: {} of {} rows kept ({} dropped) -> {:?}",
            corpus.records.len(),
            corpus.total_rows,
            corpus.dropped(),
            paths.clean_csv
        );

        Ok(corpus)
    }

    /// 파일에서 정규화
    pub fn normalize_file(&self, path: &Path) -> Result<CleanedCorpus> {
        if !path.exists() {
            return Err(KccError::SourceNotFound(path.to_path_buf()));
        }

        let file = fs::File::open(path).map_err(|e| KccError::artifact(path, e))?;
        self.normalize(file)
    }

    /// 임의의 리더에서 정규화
    pub fn normalize<R: Read>(&self, reader: R) -> Result<CleanedCorpus> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| KccError::Schema(format!("unreadable header row: {}", e)))?
            .clone();
        let (question_idx, answer_idx) = self.resolve_columns(&headers)?;

        let mut corpus = CleanedCorpus::default();

        for (row, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| KccError::Schema(format!("malformed row {}: {}", row + 1, e)))?;
            corpus.total_rows += 1;

            // 누락된 셀은 빈 문자열로 취급
            let question = clean_text(record.get(question_idx).unwrap_or(""));
            let answer = clean_text(record.get(answer_idx).unwrap_or(""));

            if self.is_long_enough(&question) && self.is_long_enough(&answer) {
                corpus.records.push(Record { question, answer });
            }
        }

        Ok(corpus)
    }

    /// 필터 정책: 비어있지 않고 min_chars 초과
    fn is_long_enough(&self, text: &str) -> bool {
        !text.is_empty() && text.chars().count() > self.min_chars
    }

    /// 헤더에서 질문/답변 컬럼 위치 결정
    fn resolve_columns(&self, headers: &csv::StringRecord) -> Result<(usize, usize)> {
        let find = |canonical: &str, aliases: &[String]| -> Option<usize> {
            headers.iter().position(|h| {
                let h = h.trim().trim_start_matches('\u{feff}');
                h.eq_ignore_ascii_case(canonical)
                    || aliases.iter().any(|a| h.eq_ignore_ascii_case(a.trim()))
            })
        };

        let question_idx = find(QUESTION_COLUMN, &self.question_aliases);
        let answer_idx = find(ANSWER_COLUMN, &self.answer_aliases);

        match (question_idx, answer_idx) {
            (Some(q), Some(a)) => Ok((q, a)),
            (q, a) => {
                let mut missing = Vec::new();
                if q.is_none() {
                    missing.push(QUESTION_COLUMN);
                }
                if a.is_none() {
                    missing.push(ANSWER_COLUMN);
                }
                Err(KccError::Schema(format!(
                    "missing required column(s) {:?}; found headers {:?}",
                    missing,
                    headers.iter().collect::<Vec<_>>()
                )))
            }
        }
    }
}

/// 공백 정리: 연속 공백 → 단일 공백, 앞뒤 공백 제거
pub fn clean_text(raw: &str) -> String {
    WHITESPACE_RE.replace_all(raw.trim(), " ").into_owned()
}

// ============================================================================
// Artifacts
// ============================================================================

/// 정제 CSV 쓰기 (레코드가 없어도 헤더는 기록)
pub fn write_clean_csv(records: &[Record], path: &Path) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    wtr.write_record([QUESTION_COLUMN, ANSWER_COLUMN])
        .map_err(|e| KccError::artifact(path, e))?;
    for record in records {
        wtr.write_record([record.question.as_str(), record.answer.as_str()])
            .map_err(|e| KccError::artifact(path, e))?;
    }

    let bytes = wtr.into_inner().map_err(|e| KccError::artifact(path, e))?;
    write_artifact(path, &bytes)
}

/// `{question, answer}` JSONL 쓰기
pub fn write_qa_jsonl(records: &[Record], path: &Path) -> Result<()> {
    let mut out = String::new();
    for record in records {
        let line = serde_json::to_string(record).map_err(|e| KccError::artifact(path, e))?;
        out.push_str(&line);
        out.push('\n');
    }
    write_artifact(path, out.as_bytes())
}

/// 정제 CSV 읽기
pub fn read_clean_csv(path: &Path) -> Result<Vec<Record>> {
    let file = fs::File::open(path).map_err(|e| KccError::artifact(path, e))?;
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = rdr
        .headers()
        .map_err(|e| KccError::Schema(format!("unreadable cleaned header: {}", e)))?
        .clone();
    let position = |name: &str| headers.iter().position(|h| h == name);
    let (question_idx, answer_idx) = match (position(QUESTION_COLUMN), position(ANSWER_COLUMN)) {
        (Some(q), Some(a)) => (q, a),
        _ => {
            return Err(KccError::Schema(format!(
                "cleaned corpus {:?} lacks question/answer columns",
                path
            )))
        }
    };

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result.map_err(|e| KccError::artifact(path, e))?;
        // 컬럼 수가 부족한 행은 건너뜀
        let (Some(question), Some(answer)) = (row.get(question_idx), row.get(answer_idx)) else {
            continue;
        };
        records.push(Record {
            question: question.trim().to_string(),
            answer: answer.trim().to_string(),
        });
    }

    Ok(records)
}

/// JSONL 레코드 수 (빈 줄 제외)
pub fn count_jsonl_records(path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path).map_err(|e| KccError::artifact(path, e))?;
    Ok(content.lines().filter(|line| !line.trim().is_empty()).count())
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| KccError::artifact(parent, e))?;
        }
    }
    fs::write(path, bytes).map_err(|e| KccError::artifact(path, e))
}

// ============================================================================
// Tests
// ============================================================================
