//! 通知服务错误类型
//!
//! 区分消息级错误（解码、校验、持久化，记录日志后继续消费）
//! 与流级错误（致命故障，终止消费循环）。

use thiserror::Error;

use crate::validator::ValidationError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("事件解码失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("事件校验失败: {0}")]
    Validation(#[from] ValidationError),

    #[error("邮件发送失败: {0}")]
    Transport(String),

    #[error("投递结果写入失败: {0}")]
    Persistence(String),

    #[error("消息流致命故障: {0}")]
    FatalStream(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Shared(#[from] notification_shared::error::SharedError),
}

impl NotificationError {
    /// 稳定的错误码，用于日志字段和指标标签
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::FatalStream(_) => "FATAL_STREAM",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 仅致命流故障需要终止消费循环
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalStream(_))
    }
}
