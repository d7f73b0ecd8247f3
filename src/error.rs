//! 에러 분류 - 파이프라인 전체에서 공유하는 닫힌 에러 타입
//!
//! 수집(ingestion) 단계 에러는 치명적이며 빌드를 중단합니다.
//! 질의(query) 단계의 검색/생성 에러는 컴포넌트 경계에서 잡혀
//! 사용자에게 보여줄 문자열로 변환됩니다.

use std::path::PathBuf;

use thiserror::Error;

/// 파이프라인 결과 타입
pub type Result<T> = std::result::Result<T, KccError>;

/// KCC 파이프라인 에러
#[derive(Debug, Error)]
pub enum KccError {
    /// 원본 코퍼스 파일 없음
    #[error("raw corpus not found at {}", .0.display())]
    SourceNotFound(PathBuf),

    /// 필수 컬럼 누락 등 데이터 형식 문제
    #[error("corpus schema error: {0}")]
    Schema(String),

    /// 벡터 저장소 연결/생성 실패
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// 인덱스를 만든 임베딩 모델과 현재 모델이 다름
    #[error("index was built with embedding model '{indexed}' but the active model is '{active}'")]
    ModelMismatch { indexed: String, active: String },

    /// 임베딩 계산 실패
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// 웹 검색 폴백 실패
    #[error("web search unavailable: {0}")]
    SearchUnavailable(String),

    /// 언어 모델 호출 실패
    #[error("answer generation failed: {0}")]
    Generation(String),

    /// 빈 질의
    #[error("query is empty")]
    EmptyQuery,

    /// 정제 CSV / JSONL 등 산출물 읽기·쓰기 실패
    #[error("failed to access artifact {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },
}

impl KccError {
    /// 산출물 에러 생성 헬퍼
    pub fn artifact(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Artifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// 질의 단계에서 복구 가능한 에러인지 여부
    ///
    /// 복구 가능한 에러는 AnswerBundle 안의 문자열로 변환되거나
    /// 폴백 경로로 이어집니다.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable(_)
                | Self::ModelMismatch { .. }
                | Self::Embedding(_)
                | Self::SearchUnavailable(_)
                | Self::Generation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_errors_are_fatal() {
        assert!(!KccError::SourceNotFound(PathBuf::from("kcc.csv")).is_recoverable());
        assert!(!KccError::Schema("missing question".into()).is_recoverable());
        assert!(!KccError::EmptyQuery.is_recoverable());
    }

    #[test]
    fn test_query_errors_are_recoverable() {
        assert!(KccError::SearchUnavailable("timeout".into()).is_recoverable());
        assert!(KccError::Generation("model not found".into()).is_recoverable());
        assert!(KccError::ModelMismatch {
            indexed: "a".into(),
            active: "b".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = KccError::SourceNotFound(PathBuf::from("data/kcc.csv"));
        assert_eq!(err.to_string(), "raw corpus not found at data/kcc.csv");

        let err = KccError::artifact("out/kcc_clean.csv", "permission denied");
        assert!(err.to_string().contains("kcc_clean.csv"));
        assert!(err.to_string().contains("permission denied"));
    }
}
