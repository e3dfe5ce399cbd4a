//! 重试策略与执行器
//!
//! 提供有界的指数退避重试机制，用于瞬时故障（SMTP 超时、网络抖动等）的自动恢复。
//! 退避等待期间监听关闭信号：信号一旦触发便不再发起新的尝试，
//! 但已经交给下游的那一次尝试总会完整执行，不会被强行中断。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{MAX_RETRY_ATTEMPTS, RetryConfig};

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 首次失败后等 `initial_delay`，之后每次失败等待时间乘以 `backoff_multiplier`，
/// 不加抖动。默认 3 次尝试，两次等待分别为 1 秒和 2 秒。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次执行），至少为 1
    pub max_attempts: u32,
    /// 第一次失败后的等待时间
    pub initial_delay: Duration,
    /// 每次失败后的退避倍数
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let backoff_multiplier =
            if config.backoff_multiplier.is_finite() && config.backoff_multiplier >= 1.0 {
                config.backoff_multiplier
            } else {
                1.0
            };
        Self {
            max_attempts: config.max_attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// 计算第 N 次失败后的等待时间（failed_attempt 从 0 开始）
    ///
    /// 公式: initial_delay * backoff_multiplier^failed_attempt
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(failed_attempt).unwrap_or(i32::MAX);
        let delay_ms = base_ms * self.backoff_multiplier.powi(exponent);
        // 浮点转整数饱和：溢出取 u64::MAX，NaN 与负数取 0
        Duration::from_millis(delay_ms as u64)
    }

    /// 已执行 `attempts_made` 次后是否还允许再尝试
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// 完整失败序列中的全部退避时间，长度为 max_attempts - 1
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|n| self.delay_for_attempt(n))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RetryState — 单次调用内的瞬时状态
// ---------------------------------------------------------------------------

/// 单次重试序列的状态，随执行器调用结束而丢弃
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    next_delay: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            next_delay: policy.initial_delay,
        }
    }

    /// 记录一次失败后的下一次等待时间
    fn advance(&mut self, policy: &RetryPolicy) {
        self.next_delay = policy.delay_for_attempt(self.attempt.saturating_sub(1));
    }
}

/// 重试执行结果
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// 最后一次尝试的结果
    pub result: Result<T, E>,
    /// 实际执行的尝试次数
    pub attempts: u32,
    /// 是否因关闭信号提前结束重试
    pub interrupted: bool,
}

// ---------------------------------------------------------------------------
// retry_with_policy — 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 带重试的异步执行器
///
/// `operation` 的参数为当前尝试序号（从 1 开始）。仅在操作返回可重试错误时才重试，
/// 不可重试的错误直接返回。退避等待可被 `shutdown` 打断。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    shutdown: &watch::Receiver<bool>,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut state = RetryState::new(policy);
    let mut shutdown = shutdown.clone();

    loop {
        state.attempt += 1;

        let err = match operation(state.attempt).await {
            Ok(value) => {
                if state.attempt > 1 {
                    info!(operation = operation_name, attempt = state.attempt, "操作在重试后成功");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: state.attempt,
                    interrupted: false,
                };
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            warn!(
                operation = operation_name,
                attempt = state.attempt,
                error = %err,
                "操作失败且不可重试，直接返回错误"
            );
            return RetryOutcome {
                result: Err(err),
                attempts: state.attempt,
                interrupted: false,
            };
        }

        if !policy.should_retry(state.attempt) {
            warn!(
                operation = operation_name,
                attempt = state.attempt,
                max_attempts = policy.max_attempts,
                error = %err,
                "已达最大尝试次数，放弃重试"
            );
            return RetryOutcome {
                result: Err(err),
                attempts: state.attempt,
                interrupted: false,
            };
        }

        state.advance(policy);
        warn!(
            operation = operation_name,
            attempt = state.attempt,
            max_attempts = policy.max_attempts,
            delay_ms = state.next_delay.as_millis() as u64,
            error = %err,
            "操作失败，将在退避后重试"
        );

        if wait_or_shutdown(state.next_delay, &mut shutdown).await {
            warn!(
                operation = operation_name,
                attempt = state.attempt,
                "退避等待期间收到关闭信号，停止重试"
            );
            return RetryOutcome {
                result: Err(err),
                attempts: state.attempt,
                interrupted: true,
            };
        }
    }
}

/// 等待退避时间，期间收到关闭信号返回 true
///
/// 发送端已被丢弃时不会再有信号，此时完整睡眠。
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let stopped = async {
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        biased;
        _ = stopped => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn never_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_for_attempt_exponential_backoff() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_schedule_for_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );

        let single = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert!(single.backoff_schedule().is_empty());
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        // 已经执行 3 次，不再尝试
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_from_config_clamps_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            initial_delay_ms: 500,
            backoff_multiplier: 3.0,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1500));
    }

    #[test]
    fn test_from_config_clamps_out_of_range_values() {
        let config = RetryConfig {
            max_attempts: u32::MAX,
            initial_delay_ms: 1000,
            backoff_multiplier: f64::NAN,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, MAX_RETRY_ATTEMPTS);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_for_huge_attempt_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(u32::MAX),
            Duration::from_millis(u64::MAX)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_first_try_without_sleeping() {
        let policy = RetryPolicy::default();
        let (_tx, rx) = never_shutdown();
        let start = Instant::now();

        let outcome = retry_with_policy(&policy, "test_op", &rx, |_: &String| true, |_| async {
            Ok::<_, String>(42)
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.interrupted);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_one_then_two_seconds_before_giving_up() {
        let policy = RetryPolicy::default();
        let (_tx, rx) = never_shutdown();
        let start = Instant::now();
        let call_times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = call_times.clone();

        let outcome: RetryOutcome<(), String> =
            retry_with_policy(&policy, "test_op", &rx, |_| true, |attempt| {
                recorder.lock().unwrap().push(start.elapsed());
                async move { Err(format!("第 {attempt} 次失败")) }
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err(), "第 3 次失败");
        assert_eq!(
            *call_times.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3)
            ]
        );
        // 最后一次失败后不再等待
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let policy = RetryPolicy::default();
        let (_tx, rx) = never_shutdown();
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let outcome = retry_with_policy(&policy, "test_op", &rx, |_: &String| true, |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("模拟瞬时故障".to_string())
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 99);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let policy = RetryPolicy::default();
        let (_tx, rx) = never_shutdown();

        let outcome: RetryOutcome<(), String> =
            retry_with_policy(&policy, "test_op", &rx, |_| false, |_| async {
                Err("地址被拒绝".to_string())
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_stops_new_attempts() {
        let policy = RetryPolicy::default();
        let (tx, rx) = watch::channel(false);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let handle = tokio::spawn(async move {
            retry_with_policy(&policy, "test_op", &rx, |_: &String| true, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("smtp timeout".to_string()) }
            })
            .await
        });

        // 第一次失败后进入 1 秒退避，在退避中途发出关闭信号
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();

        let outcome = handle.await.unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap_err(), "smtp timeout");
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_shutdown_sender_does_not_cut_backoff() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let outcome: RetryOutcome<(), String> =
            retry_with_policy(&policy, "test_op", &rx, |_| true, |_| async {
                Err("失败".to_string())
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.interrupted);
    }
}
