//! 로깅 초기화 모듈
//!
//! 모니터 자신의 로그를 JSON 형식으로 stdout과 일별 파일에 출력합니다.
//! 파일은 감시 대상 로그 디렉토리의 `monitor/` 하위 디렉토리에 쓰므로
//! 감시 중인 파일과 섞이지 않습니다.

use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,log_monitor=debug";

/// 로깅 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// 일별 로그 파일 디렉토리
    pub dir: PathBuf,
    /// 파일명 접두사 (`<prefix>.YYYY-MM-DD`)
    pub file_prefix: String,
    /// `EnvFilter` 지시문
    pub filter: String,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// - `MONITOR_SELF_LOG_DIR`: 로그 디렉토리 (기본값 `<MONITOR_LOG_DIR>/monitor`)
    /// - `RUST_LOG`: 필터 (기본값 `info,log_monitor=debug`)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let dir = get("MONITOR_SELF_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(get("MONITOR_LOG_DIR").unwrap_or_else(|| "logs".to_string()))
                    .join("monitor")
            });

        Self {
            dir,
            file_prefix: "monitor.log".to_string(),
            filter: get("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        }
    }
}

/// 로깅 시스템을 초기화합니다.
///
/// 반환되는 `WorkerGuard`를 main에서 유지해야 종료 시 버퍼링된 로그가 손실되지 않습니다.
/// 이미 초기화된 경우(테스트 등)에는 경고만 출력하고 계속 진행합니다.
pub fn init_logging(settings: &LogSettings) -> WorkerGuard {
    let file_appender = rolling::daily(&settings.dir, &settings.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|e| {
        eprintln!(
            "Invalid log filter '{}': {}, falling back to '{}'",
            settings.filter, e, DEFAULT_FILTER
        );
        EnvFilter::new(DEFAULT_FILTER)
    });

    let stdout_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::new(Rfc3339))
        .with_current_span(true);

    let file_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::new(Rfc3339))
        .with_current_span(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Logging not initialized: {}", e);
    }

    guard
}
