//! 优雅关闭
//!
//! 消费循环运行在独立任务上。收到外部信号后置位关闭标志，在宽限期内等待循环退出，
//! 超时则中止任务。无论循环以何种方式结束，清理步骤（关闭连接池）都会执行。

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::consumer::LoopStats;
use crate::error::NotificationError;

/// 消费循环任务的返回值
pub type LoopResult = Result<LoopStats, NotificationError>;

/// 消费循环的结束方式
#[derive(Debug)]
pub enum LoopExit {
    /// 循环自行返回（正常关闭或致命故障）
    Finished(LoopResult),
    /// 任务 panic
    Panicked(JoinError),
    /// 宽限期内未退出，已被中止
    Aborted,
}

impl From<Result<LoopResult, JoinError>> for LoopExit {
    fn from(joined: Result<LoopResult, JoinError>) -> Self {
        match joined {
            Ok(result) => Self::Finished(result),
            Err(e) => Self::Panicked(e),
        }
    }
}

/// 等待循环结束或外部信号，随后执行清理
///
/// 循环先结束时不等待信号；信号先到时走 `stop_with_grace`。
pub async fn supervise<S, C>(
    mut task: JoinHandle<LoopResult>,
    signal: S,
    shutdown_tx: &watch::Sender<bool>,
    grace: Duration,
    cleanup: C,
) -> LoopExit
where
    S: Future<Output = ()>,
    C: Future<Output = ()>,
{
    let finished = tokio::select! {
        _ = signal => None,
        joined = &mut task => Some(joined),
    };

    let exit = match finished {
        Some(joined) => LoopExit::from(joined),
        None => stop_with_grace(task, shutdown_tx, grace).await,
    };

    cleanup.await;
    exit
}

/// 置位关闭标志并在宽限期内等待循环退出，超时中止任务
pub async fn stop_with_grace(
    mut task: JoinHandle<LoopResult>,
    shutdown_tx: &watch::Sender<bool>,
    grace: Duration,
) -> LoopExit {
    shutdown_tx.send_replace(true);
    info!(grace_ms = grace.as_millis() as u64, "已通知消费循环停止");

    match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => LoopExit::from(joined),
        Err(_) => {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "消费循环未在宽限期内退出，强制中止"
            );
            task.abort();
            // 等待任务真正被取消，确保其持有的资源在清理前释放
            let _ = task.await;
            LoopExit::Aborted
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::time::Instant;

    use super::*;

    const GRACE: Duration = Duration::from_secs(10);

    fn cleanup_flag() -> (Arc<AtomicBool>, impl Future<Output = ()>) {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = flag.clone();
        (flag, async move { setter.store(true, Ordering::SeqCst) })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_loop_is_aborted_after_grace_and_cleanup_runs() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(std::future::pending::<LoopResult>());
        let (cleaned, cleanup) = cleanup_flag();
        let started = Instant::now();

        let exit = supervise(task, async {}, &shutdown_tx, GRACE, cleanup).await;

        assert!(matches!(exit, LoopExit::Aborted));
        assert_eq!(started.elapsed(), GRACE);
        assert!(*shutdown_rx.borrow());
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_loop_stops_without_waiting_for_grace() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
            Ok(LoopStats {
                received: 3,
                ..LoopStats::default()
            })
        });
        let (cleaned, cleanup) = cleanup_flag();
        let started = Instant::now();

        let exit = supervise(
            task,
            tokio::time::sleep(Duration::from_secs(1)),
            &shutdown_tx,
            GRACE,
            cleanup,
        )
        .await;

        match exit {
            LoopExit::Finished(Ok(stats)) => assert_eq!(stats.received, 3),
            other => panic!("unexpected exit: {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_error_is_returned_without_signal() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async {
            Err(NotificationError::FatalStream("Local: Fatal error".to_string()))
        });
        let (cleaned, cleanup) = cleanup_flag();

        let exit = supervise(
            task,
            std::future::pending::<()>(),
            &shutdown_tx,
            GRACE,
            cleanup,
        )
        .await;

        assert!(matches!(
            exit,
            LoopExit::Finished(Err(NotificationError::FatalStream(_)))
        ));
        assert!(!*shutdown_rx.borrow());
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_loop_is_reported() {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async {
            if true {
                panic!("consumer bug");
            }
            Ok(LoopStats::default())
        });
        let (cleaned, cleanup) = cleanup_flag();

        let exit = supervise(task, std::future::pending::<()>(), &shutdown_tx, GRACE, cleanup).await;

        assert!(matches!(exit, LoopExit::Panicked(e) if e.is_panic()));
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
