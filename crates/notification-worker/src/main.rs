//! 购买通知 worker 入口
//!
//! 启动顺序：配置 → 可观测性 → 数据库 → SMTP → Kafka 订阅 → 消费循环。
//! 收到 Ctrl+C / SIGTERM 后通知消费循环停止，在宽限期内等待其退出，最后关闭连接池。

use std::sync::Arc;

use anyhow::{Context, Result};
use notification_shared::{
    config::AppConfig, database::Database, events::EventKind, kafka::KafkaConsumer,
    observability, retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use notification_worker::{
    ConsumptionLoop, EventDispatcher, NotificationService,
    repository::PgOutcomeLog,
    sender::SmtpTransport,
    shutdown::{LoopExit, supervise},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // 1. 加载配置：config/ 目录下的 toml 文件 + NOTIFY_ 前缀环境变量
    let config = AppConfig::load("notification-worker").context("加载配置失败")?;

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        topic = %config.kafka.topic,
        consumer_group = %config.kafka.consumer_group,
        "Starting notification-worker..."
    );

    // 3. 数据库
    let db = Database::connect(&config.database).await?;
    db.health_check().await.context("数据库连通性检查失败")?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    info!("Database connection established");

    // 4. 编排器依赖
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let transport = SmtpTransport::new(&config.smtp)?;
    transport.verify().await.context("SMTP 服务器不可达")?;
    let transport = Arc::new(transport);
    let outcome_log = Arc::new(PgOutcomeLog::new(db.clone()));
    let service = Arc::new(NotificationService::new(
        transport,
        outcome_log,
        RetryPolicy::from(&config.retry),
        shutdown_rx.clone(),
    ));
    let dispatcher = EventDispatcher::new(EventKind::Purchase, service);

    // 5. Kafka 订阅
    let source = KafkaConsumer::new(&config.kafka)?;
    let consumption = ConsumptionLoop::new(source, dispatcher)
        .with_poll_timeout(config.kafka.poll_timeout())
        .subscribe(&config.kafka.topic)?;

    // 6. 消费循环运行在独立任务上，无论如何结束都关闭连接池
    let loop_task = tokio::spawn(consumption.run(shutdown_rx));
    let exit = supervise(
        loop_task,
        shutdown_signal(),
        &shutdown_tx,
        config.shutdown_grace(),
        db.close(),
    )
    .await;

    match exit {
        LoopExit::Finished(Ok(stats)) => {
            info!(
                received = stats.received,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "notification-worker shutdown complete"
            );
            Ok(())
        }
        LoopExit::Finished(Err(e)) => {
            error!(error = %e, code = e.code(), "消费循环异常退出");
            Err(e.into())
        }
        LoopExit::Panicked(e) => {
            error!(error = %e, "消费循环任务异常");
            Err(e.into())
        }
        LoopExit::Aborted => Ok(()),
    }
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
