//! 邮件发送
//!
//! 通过 `MailTransport` trait 抽象投递行为，编排器只依赖该 trait。
//! `SmtpTransport` 基于 lettre 的异步 SMTP 客户端实现，单次发送受超时约束，
//! 重试由编排器负责，这里不做任何重试。

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use notification_shared::config::SmtpConfig;
use tracing::{debug, info};

use crate::error::NotificationError;
use crate::templates::RenderedMessage;

/// 邮件投递 trait
///
/// 每次调用对应一次投递尝试，返回 Ok 表示对端已确认接收。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipient: &str, message: &RenderedMessage)
    -> Result<(), NotificationError>;
}

// ---------------------------------------------------------------------------
// SMTP 实现
// ---------------------------------------------------------------------------

/// SMTP 邮件发送器
///
/// 配置了用户名时使用 STARTTLS 并携带凭据，否则以明文连接中继（本地开发用）。
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotificationError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| NotificationError::Config(format!("发件人地址无效 {}: {e}", config.from)))?;
        let timeout = Duration::from_secs(config.timeout_seconds);

        let builder = if config.username.is_empty() {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotificationError::Config(format!("SMTP 中继配置失败: {e}")))?
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
        };

        let mailer = builder.port(config.port).timeout(Some(timeout)).build();

        info!(
            host = %config.host,
            port = config.port,
            from = %config.from,
            "SMTP 发送器已创建"
        );

        Ok(Self {
            mailer,
            from,
            timeout,
        })
    }

    /// 启动时确认 SMTP 服务器可达，不可达视为启动失败
    pub async fn verify(&self) -> Result<(), NotificationError> {
        let reachable = tokio::time::timeout(self.timeout, self.mailer.test_connection())
            .await
            .map_err(|_| {
                NotificationError::Transport(format!("SMTP 连接超时（{}s）", self.timeout.as_secs()))
            })?
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        if !reachable {
            return Err(NotificationError::Transport(
                "SMTP 服务器未响应 NOOP".to_string(),
            ));
        }
        info!("SMTP 服务器连通性检查通过");
        Ok(())
    }

    fn build_message(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> Result<Message, NotificationError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotificationError::Transport(format!("收件人地址无效: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| NotificationError::Transport(format!("邮件构建失败: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> Result<(), NotificationError> {
        let email = self.build_message(recipient, message)?;

        let response = tokio::time::timeout(self.timeout, self.mailer.send(email))
            .await
            .map_err(|_| {
                NotificationError::Transport(format!("SMTP 发送超时（{}s）", self.timeout.as_secs()))
            })?
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        debug!(
            recipient = %recipient,
            code = %response.code(),
            "SMTP 服务器已确认接收"
        );
        Ok(())
    }
}
