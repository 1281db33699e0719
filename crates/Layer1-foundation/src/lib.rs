//! # unitforge-foundation
//!
//! Foundation layer for UnitForge:
//! - Error: 중앙 에러 타입과 `Result` alias
//! - Config: 서비스 설정 (워커 풀, 타임아웃, 디바운스, 감시 패턴)
//! - Logging: tracing 구독자 초기화
//!
//! 레지스트리/실행기 본체는 Layer2(`unitforge-core`)에 있습니다.

pub mod config;
pub mod error;
pub mod logging;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{ServiceConfig, SERVICE_CONFIG_FILE};
