//! Error types for UnitForge
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// UnitForge 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 유닛 로드 관련
    // ========================================================================
    #[error("Load error: {path} - {message}")]
    Load { path: String, message: String },

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Entry point not found: {entry_point} (available: {available:?})")]
    EntryPointNotFound {
        entry_point: String,
        available: Vec<String>,
    },

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // 감시 관련
    // ========================================================================
    #[error("Watch error: {0}")]
    Watch(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 서비스 전체를 내려야 하는 에러인지 확인
    ///
    /// 유닛/호출 단위 실패는 전부 in-band로 보고되므로,
    /// 워커 풀이나 엔진 기동 실패만 치명적으로 취급합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::Config(_))
    }

    /// Load 에러 생성 헬퍼
    pub fn load(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// EntryPointNotFound 에러 생성 헬퍼
    pub fn entry_point_not_found(entry_point: impl Into<String>, available: Vec<String>) -> Self {
        Error::EntryPointNotFound {
            entry_point: entry_point.into(),
            available,
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("bad".into()).is_fatal());
        assert!(!Error::load("/tmp/a.wat", "syntax error").is_fatal());
        assert!(!Error::Timeout("30s".into()).is_fatal());
    }

    #[test]
    fn test_entry_point_error_message() {
        let err = Error::entry_point_not_found("missing", vec!["add".into(), "run".into()]);
        let msg = err.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("add"));
    }
}
