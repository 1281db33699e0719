//! Logging - tracing 구독자 초기화
//!
//! 임베더가 자체 구독자를 깔지 않는 경우를 위한 기본 초기화.
//! `RUST_LOG` 환경변수로 필터를 제어합니다.

use tracing_subscriber::{fmt, EnvFilter};

/// 기본 필터 (RUST_LOG 미설정 시)
pub const DEFAULT_LOG_FILTER: &str = "info,unitforge_core=debug";

/// 전역 구독자 초기화
///
/// 이미 구독자가 설치되어 있으면 조용히 넘어갑니다 (테스트에서 반복 호출 안전).
pub fn init() {
    init_with_filter(DEFAULT_LOG_FILTER);
}

/// 지정한 기본 필터로 전역 구독자 초기화
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    if fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
    {
        tracing::debug!("Tracing subscriber installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        init_with_filter("warn");
    }
}
