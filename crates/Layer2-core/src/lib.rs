//! # unitforge-core
//!
//! UnitForge 핵심 런타임:
//! - 유닛 레지스트리와 핫 리로드
//! - 경계 있는 실행 (워커 풀 + 타임아웃)
//! - 운영 지표와 수명주기 이벤트
//!
//! 일반적인 사용은 [`UnitService`] 파사드 하나로 충분합니다:
//!
//! ```no_run
//! use unitforge_core::{ExecutionRequest, UnitService};
//! use unitforge_foundation::ServiceConfig;
//!
//! # async fn run() -> unitforge_foundation::Result<()> {
//! let service = UnitService::new(ServiceConfig::default())?;
//! service.start().await?;
//!
//! let result = service
//!     .execute(ExecutionRequest::by_name("math", "add")
//!         .with_args(vec![serde_json::json!(10), serde_json::json!(20)]))
//!     .await;
//! assert!(result.success);
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod unit;

// ============================================================================
// 주요 타입 재노출
// ============================================================================
pub use unit::{
    ChangeEvent, ChangeKind, EventBus, ExecutionEngine, ExecutionRequest, ExecutionResult,
    LoadOutcome, MetricsSnapshot, ReloadReport, UnitEvent, UnitEventHandler, UnitEventType,
    UnitService, UnitStatus, UnitStore, UnitSummary, WatchedDirectory,
};

// Foundation 재노출
pub use unitforge_foundation::{Error, Result, ServiceConfig};

/// 크레이트 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
