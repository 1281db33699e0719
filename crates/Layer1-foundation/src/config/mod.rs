//! Config - 서비스 설정
//!
//! 유닛 레지스트리/실행기 전반에서 쓰는 통합 설정.
//! 합리적인 기본값을 내장하고, TOML 파일에서 덮어쓸 수 있습니다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const SERVICE_CONFIG_FILE: &str = "unitforge.toml";

// ============================================================================
// ServiceConfig (통합)
// ============================================================================

/// UnitForge 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServiceConfig {
    /// 워커 풀 크기 (동시 실행 상한)
    pub max_workers: usize,

    /// 호출 기본 타임아웃 (초)
    pub call_timeout_secs: u64,

    /// 리로드 디바운스 윈도우 (밀리초)
    pub debounce_ms: u64,

    /// epoch 틱 주기 (밀리초) - 폭주한 호출을 트랩시키는 해상도
    pub epoch_tick_ms: u64,

    /// 기동 시 기본으로 감시할 디렉토리들
    pub watch_dirs: Vec<PathBuf>,

    /// 하위 디렉토리 재귀 감시 여부
    pub watch_recursive: bool,

    /// 허용 파일 패턴 (allow-list)
    pub include_patterns: Vec<String>,

    /// 제외 패턴 (deny-list) - 빌드 산출물, VCS, 로그, 테스트 파일 등
    pub exclude_patterns: Vec<String>,

    /// 자동 발견이 빈손일 때 시도하는 관례적 진입점 이름들
    pub fallback_entry_points: Vec<String>,

    /// 이벤트 버스 히스토리 크기
    pub event_history_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            call_timeout_secs: 30,
            debounce_ms: 500,
            epoch_tick_ms: 10,
            watch_dirs: vec![PathBuf::from("./units")],
            watch_recursive: true,
            include_patterns: vec!["*.wat".into(), "*.wasm".into()],
            exclude_patterns: vec![
                ".git".into(),
                ".svn".into(),
                ".hg".into(),
                "target".into(),
                "node_modules".into(),
                "logs".into(),
                "*.tmp".into(),
                "*.swp".into(),
                "*.bak".into(),
                "test_*".into(),
                "*_test.wat".into(),
                "*_test.wasm".into(),
            ],
            fallback_entry_points: vec![
                "main".into(),
                "run".into(),
                "handle".into(),
                "process".into(),
                "execute".into(),
                "_start".into(),
            ],
            event_history_size: 100,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// TOML 파일에서 로드
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig =
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        if self.debounce_ms == 0 {
            return Err(Error::Config("debounce_ms must be at least 1".into()));
        }
        if self.epoch_tick_ms == 0 {
            return Err(Error::Config("epoch_tick_ms must be at least 1".into()));
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
        }
        Ok(())
    }

    // ========================================================================
    // 편의 접근자
    // ========================================================================

    /// 호출 기본 타임아웃
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// 디바운스 윈도우
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// epoch 틱 주기
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms)
    }
}
