//! 投递结果库连接
//!
//! 通知服务与核心业务共用同一个 PostgreSQL 库，只拥有 `email_logs` 一张表。
//! 写入放在单一消费任务上执行，因此每次写入（含获取连接）都有独立的时间上限，
//! 避免一次卡住的 INSERT 阻塞后续拉取。

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};

/// 连接池与写入时限
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    write_timeout: Duration,
}

impl Database {
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            write_timeout_seconds = config.write_timeout_seconds,
            "数据库连接池已创建"
        );
        Ok(Self::from_pool(pool, config.write_timeout()))
    }

    /// 包装已有连接池
    pub fn from_pool(pool: PgPool, write_timeout: Duration) -> Self {
        Self {
            pool,
            write_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 在写入时限内执行一次数据库操作
    ///
    /// 超时返回 `WriteTimeout`，操作本身的错误原样转为 `Database`。
    pub async fn bounded_write<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(result) => result.map_err(SharedError::from),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "数据库写入超时"
                );
                Err(SharedError::WriteTimeout(self.write_timeout))
            }
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }

    /// 执行 migrations/ 下的迁移脚本
    ///
    /// 迁移记录表与核心服务共用，忽略本服务不认识的已应用版本。
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("../../migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await?;

        info!(migrations = migrator.iter().count(), "数据库迁移已执行");
        Ok(())
    }
}
