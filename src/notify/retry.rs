use backoff::{future::retry_notify, ExponentialBackoff};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::utils::AppError;

/// 알림 전송 재시도 정책
///
/// 시도 사이의 대기 시간은 `initial_backoff`에서 시작해 매번 두 배가 됩니다.
/// (기본값: 1s, 2s, 4s ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 첫 시도를 포함한 최대 시도 횟수
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 한 번의 시도에 허용되는 최대 시간
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// 지수 백오프 설정 생성
    ///
    /// 시도 횟수로 종료를 결정하므로 경과 시간 제한은 두지 않습니다.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// 재시도 로직을 적용한 비동기 작업 실행
///
/// `operation`은 1부터 시작하는 시도 번호를 받습니다. 각 시도는
/// `attempt_timeout`으로 제한되며, `AppError::is_retryable()`인 오류만
/// `max_attempts`까지 재시도합니다.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, AppError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;
    let operation = &operation;

    retry_notify(
        policy.create_backoff(),
        || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let result = match timeout(policy.attempt_timeout, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(format!(
                    "attempt {} exceeded {:?}",
                    attempt, policy.attempt_timeout
                ))),
            };

            match result {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        },
        |e: AppError, delay: Duration| {
            warn!(error = %e, delay_ms = delay.as_millis() as u64, "Retryable error, will retry...");
        },
    )
    .await
}
