use log_monitor::config::MonitorConfig;
use log_monitor::event::LogCategory;
use log_monitor::monitoring::Monitor;
use log_monitor::notify::{Notifier, NotifierSet};
use log_monitor::shutdown::shutdown_signal;
use log_monitor::utils::{init_logging, LogSettings};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // 1. 환경변수 로드
    dotenvy::dotenv().ok();

    // 2. 로깅 초기화 (guard는 종료 시까지 유지)
    let _guard = init_logging(&LogSettings::from_env());

    // 3. 설정 로드
    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    // 4. 알림 채널 구성
    let notifier: Arc<dyn Notifier> = Arc::new(NotifierSet::from_config(&config));

    // 5. 모니터 구성: 보안(인증 실패, rate limit)과 에러 로그를 분리
    let groups: [(&str, &[LogCategory]); 2] = [
        ("security", &[LogCategory::Security, LogCategory::RateLimit]),
        ("error", &[LogCategory::Error]),
    ];

    let mut monitors = Vec::new();
    for (name, categories) in groups {
        let enabled: Vec<LogCategory> = categories
            .iter()
            .copied()
            .filter(|c| config.alert.is_enabled(*c))
            .collect();
        if enabled.is_empty() {
            tracing::info!(monitor = name, "No enabled categories, monitor skipped");
            continue;
        }

        let mut monitor = enabled
            .into_iter()
            .fold(
                Monitor::new(name, config.alert.clone(), Arc::clone(&notifier)),
                |monitor, category| monitor.with_source(category, config.log_path(category)),
            )
            .with_poll_interval(config.poll_interval)
            .with_stop_timeout(config.stop_timeout);

        if let Err(e) = monitor.start() {
            tracing::error!(monitor = name, error = %e, "Failed to start monitor");
            continue;
        }
        monitors.push(monitor);
    }

    if monitors.is_empty() {
        tracing::warn!("No monitors running, exiting");
        return;
    }

    // 6. 종료 시그널 대기 후 정리
    shutdown_signal().await;

    for monitor in monitors.iter_mut() {
        monitor.stop().await;
    }
    tracing::info!("Log monitor shut down");
}
