//! Unit types - 코드 유닛 핵심 타입
//!
//! 레지스트리가 추적하는 유닛 한 개(= 로드 가능한 소스 파일 한 개)의
//! 상태/메타데이터/통계와, 실행 요청/결과 타입을 정의합니다.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;
use wasmtime::{FuncType, Module};

// ============================================================================
// UnitStatus - 유닛 상태
// ============================================================================

/// 유닛 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// 아직 로드되지 않음
    Unloaded,

    /// 로드 완료 (진입점 호출 가능)
    Loaded,

    /// 로드 실패 (error_message 설정됨)
    Error,

    /// 리로드 진행 중
    Reloading,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loaded => write!(f, "loaded"),
            Self::Error => write!(f, "error"),
            Self::Reloading => write!(f, "reloading"),
        }
    }
}

// ============================================================================
// UnitMetadata - 로드 시점에 채워지는 메타데이터
// ============================================================================

/// 로드 성공 시 기록되는 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMetadata {
    /// 소스 파일 크기 (바이트)
    pub file_size: u64,

    /// 발견된 진입점 이름들
    pub entry_point_names: Vec<String>,

    /// 소스 라인 수 (텍스트 소스만, 바이너리는 0)
    pub line_count: usize,

    /// 로드 시각
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

// ============================================================================
// CallStats - 호출 누적 통계
// ============================================================================

/// 유닛별 호출 누적 통계
///
/// 유닛이 등록되어 있는 동안 단조 증가하며, 리로드를 거쳐도 보존됩니다.
/// (경로가 퇴출될 때만 소멸)
#[derive(Debug, Clone, Default)]
pub struct CallStats {
    pub call_count: u64,
    pub total_time: Duration,
    pub last_call_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CallStats {
    /// 평균 호출 시간 (호출이 없으면 0)
    pub fn avg_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.call_count as u32
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.call_count += 1;
        self.total_time += elapsed;
        self.last_call_at = Some(chrono::Utc::now());
    }
}

// ============================================================================
// CodeUnit - 레지스트리 항목
// ============================================================================

/// 코드 유닛 - 독립적으로 로드/리로드되는 소스 파일 하나
///
/// `path`가 유일 식별자이며 유닛 수명 동안 불변입니다.
/// `module`/`entry_points`는 `Loaded` 상태에서만 채워지고,
/// 리로드 시 통째로 교체됩니다 (이전 `Module` 핸들은 드롭으로 해제).
#[derive(Clone)]
pub struct CodeUnit {
    /// 유일 식별자 (절대 경로)
    pub path: PathBuf,

    /// 파일명에서 유도한 논리 이름 (이름 조회용)
    pub logical_name: String,

    /// 현재 상태
    pub status: UnitStatus,

    /// 컴파일된 모듈 (Loaded 상태에서만 Some)
    pub module: Option<Module>,

    /// 진입점 이름 -> 시그니처
    pub entry_points: BTreeMap<String, FuncType>,

    /// 로드 메타데이터 (Loaded 상태에서만 Some)
    pub metadata: Option<UnitMetadata>,

    /// 마지막 성공 로드 시점의 파일 수정 시각 (중복 리로드 스킵용)
    pub last_modified: Option<SystemTime>,

    /// 에러 메시지 (Error 상태에서만 Some)
    pub error_message: Option<String>,

    /// 호출 누적 통계
    pub stats: CallStats,
}

impl CodeUnit {
    /// 미로드 상태의 새 유닛 생성
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let logical_name = Self::logical_name_of(&path);
        Self {
            path,
            logical_name,
            status: UnitStatus::Unloaded,
            module: None,
            entry_points: BTreeMap::new(),
            metadata: None,
            last_modified: None,
            error_message: None,
            stats: CallStats::default(),
        }
    }

    /// 경로에서 논리 이름 유도 (확장자 제거한 파일명)
    pub fn logical_name_of(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    /// 진입점 이름 목록
    pub fn entry_point_names(&self) -> Vec<String> {
        self.entry_points.keys().cloned().collect()
    }

    /// API 응답용 요약으로 변환
    pub fn summary(&self) -> UnitSummary {
        UnitSummary {
            name: self.logical_name.clone(),
            path: self.path.to_string_lossy().into_owned(),
            status: self.status,
            entry_points: self.entry_point_names(),
            file_size: self.metadata.as_ref().map(|m| m.file_size),
            line_count: self.metadata.as_ref().map(|m| m.line_count),
            loaded_at: self.metadata.as_ref().map(|m| m.loaded_at),
            call_count: self.stats.call_count,
            avg_time_ms: self.stats.avg_time().as_secs_f64() * 1000.0,
            last_call_at: self.stats.last_call_at,
            error: self.error_message.clone(),
        }
    }
}

// ============================================================================
// UnitSummary - API 응답용 요약
// ============================================================================

/// 유닛 요약 (직렬화 가능, 전송 계층에 그대로 노출)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub name: String,
    pub path: String,
    pub status: UnitStatus,
    pub entry_points: Vec<String>,
    pub file_size: Option<u64>,
    pub line_count: Option<usize>,
    pub loaded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub call_count: u64,
    pub avg_time_ms: f64,
    pub last_call_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

// ============================================================================
// WatchedDirectory - 감시 중인 루트
// ============================================================================

/// 감시 중인 루트 디렉토리
///
/// 패턴은 등록 시점의 설정 스냅샷입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedDirectory {
    pub path: PathBuf,
    pub recursive: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

// ============================================================================
// ExecutionRequest / ExecutionResult
// ============================================================================

/// 실행 요청
///
/// 유닛은 경로 또는 논리 이름으로 참조합니다 (둘 중 하나는 필수).
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// 유닛 경로 (path 참조)
    pub path: Option<PathBuf>,

    /// 유닛 논리 이름 (name 참조)
    pub name: Option<String>,

    /// 호출할 진입점 이름
    pub entry_point: String,

    /// 위치 인자
    pub args: Vec<Value>,

    /// 키워드 인자
    pub kwargs: Map<String, Value>,

    /// 타임아웃 오버라이드 (없으면 서비스 기본값)
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    /// 논리 이름으로 요청 생성
    pub fn by_name(name: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            entry_point: entry_point.into(),
            ..Default::default()
        }
    }

    /// 경로로 요청 생성
    pub fn by_path(path: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            entry_point: entry_point.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 실행 결과
///
/// 유닛 단위 실패(미등록, 진입점 없음, 트랩, 타임아웃)는 전부
/// 이 구조체로 in-band 보고되며 호출자 스택으로 전파되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// 상관관계 추적용 요청 식별자
    pub request_id: Uuid,

    /// 반환 값 (성공 시)
    pub value: Option<Value>,

    /// 에러 설명 (실패 시)
    pub error: Option<String>,

    /// 진입점 미존재 시, 실제 존재하는 진입점 목록
    pub available_entry_points: Option<Vec<String>>,

    /// 실행된 유닛의 논리 이름 (해석된 경우)
    pub unit: Option<String>,

    /// 경과 벽시계 시간
    pub elapsed: Duration,

    /// 타임아웃으로 실패했는지 여부
    pub timed_out: bool,
}

impl ExecutionResult {
    /// 성공 결과
    pub fn ok(request_id: Uuid, unit: String, value: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            request_id,
            value: Some(value),
            error: None,
            available_entry_points: None,
            unit: Some(unit),
            elapsed,
            timed_out: false,
        }
    }

    /// 일반 실패 결과
    pub fn failure(request_id: Uuid, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            request_id,
            value: None,
            error: Some(error.into()),
            available_entry_points: None,
            unit: None,
            elapsed,
            timed_out: false,
        }
    }

    /// 진입점 미존재 결과 (존재하는 진입점 열거)
    pub fn entry_point_not_found(
        request_id: Uuid,
        entry_point: &str,
        available: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            request_id,
            value: None,
            error: Some(format!("entry point not found: {}", entry_point)),
            available_entry_points: Some(available),
            unit: None,
            elapsed,
            timed_out: false,
        }
    }

    /// 타임아웃 결과 - elapsed는 설정된 제한값을 그대로 싣습니다
    pub fn timeout(request_id: Uuid, bound: Duration) -> Self {
        Self {
            success: false,
            request_id,
            value: None,
            error: Some(format!("execution timeout ({:.1}s)", bound.as_secs_f64())),
            available_entry_points: None,
            unit: None,
            elapsed: bound,
            timed_out: true,
        }
    }
}

// ============================================================================
// 경로 유틸리티
// ============================================================================

/// 경로를 절대 경로로 정규화
///
/// 존재하는 경로는 canonicalize, 아니면 현재 디렉토리 기준으로 결합합니다.
pub fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
