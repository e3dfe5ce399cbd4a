//! 投递结果仓储
//!
//! 每个事件在重试结束后写入一条 `email_logs` 记录。

use async_trait::async_trait;
use notification_shared::database::Database;

use crate::error::NotificationError;

/// 最终投递状态，与表上的 CHECK 约束一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Sent,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(NotificationError::Persistence(format!("未知的投递状态: {other}"))),
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递结果记录
///
/// 只能通过 `sent` / `failed` 构造，保证错误信息仅在失败时存在。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    transaction_id: String,
    recipient_email: String,
    subject: String,
    status: OutcomeStatus,
    error_message: Option<String>,
}

impl OutcomeRecord {
    pub fn sent(
        transaction_id: impl Into<String>,
        recipient_email: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            recipient_email: recipient_email.into(),
            subject: subject.into(),
            status: OutcomeStatus::Sent,
            error_message: None,
        }
    }

    pub fn failed(
        transaction_id: impl Into<String>,
        recipient_email: impl Into<String>,
        subject: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            recipient_email: recipient_email.into(),
            subject: subject.into(),
            status: OutcomeStatus::Failed,
            error_message: Some(error.into()),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn recipient_email(&self) -> &str {
        &self.recipient_email
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// 从存储行还原，拒绝违反"仅失败记录带错误信息"约束的行
    fn from_row(
        (transaction_id, recipient_email, subject, status, error): (
            String,
            String,
            String,
            String,
            Option<String>,
        ),
    ) -> Result<Self, NotificationError> {
        match (status.parse::<OutcomeStatus>()?, error) {
            (OutcomeStatus::Sent, None) => Ok(Self::sent(transaction_id, recipient_email, subject)),
            (OutcomeStatus::Failed, Some(error)) if !error.is_empty() => {
                Ok(Self::failed(transaction_id, recipient_email, subject, error))
            }
            (status, _) => Err(NotificationError::Persistence(format!(
                "记录 {transaction_id} 的状态 {status} 与错误信息不一致"
            ))),
        }
    }
}

/// 投递结果日志
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    /// 写入一条记录，返回记录 ID
    async fn record(&self, record: &OutcomeRecord) -> Result<i64, NotificationError>;
}

/// PostgreSQL 投递结果仓储
///
/// 每次写入受 `Database` 的写入时限约束，超时按持久化失败处理。
pub struct PgOutcomeLog {
    db: Database,
}

impl PgOutcomeLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 按交易 ID 查询记录，按写入顺序排列
    pub async fn list_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<OutcomeRecord>, NotificationError> {
        let rows: Vec<(String, String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT transaction_id, recipient_email, subject, status, error_message
            FROM email_logs
            WHERE transaction_id = $1
            ORDER BY id
            "#,
        )
        .bind(transaction_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| NotificationError::Persistence(e.to_string()))?;

        rows.into_iter().map(OutcomeRecord::from_row).collect()
    }
}

#[async_trait]
impl OutcomeLog for PgOutcomeLog {
    async fn record(&self, record: &OutcomeRecord) -> Result<i64, NotificationError> {
        let insert = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO email_logs (transaction_id, recipient_email, subject, status, error_message)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(record.transaction_id())
        .bind(record.recipient_email())
        .bind(record.subject())
        .bind(record.status().as_str())
        .bind(record.error_message())
        .fetch_one(self.db.pool());

        self.db
            .bounded_write("insert_email_log", insert)
            .await
            .map_err(|e| NotificationError::Persistence(e.to_string()))
    }
}
