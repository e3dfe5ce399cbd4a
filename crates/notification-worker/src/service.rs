//! 购买通知编排
//!
//! 单个事件的完整处理流程：校验 → 渲染 → 带退避重试的投递 → 写入一条投递结果。
//! 服务本身不持有跨事件的可变状态，重试计数只存在于单次调用内。

use std::sync::Arc;

use notification_shared::events::PurchaseEvent;
use notification_shared::observability::metrics as app_metrics;
use notification_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::NotificationError;
use crate::repository::{OutcomeLog, OutcomeRecord};
use crate::sender::MailTransport;
use crate::templates::PurchaseTemplate;
use crate::validator::validate_purchase;

/// 单个事件的投递结论
///
/// 投递耗尽重试次数不视为错误，结果已写入日志表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Sent { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

pub struct NotificationService {
    transport: Arc<dyn MailTransport>,
    outcome_log: Arc<dyn OutcomeLog>,
    retry_policy: RetryPolicy,
    /// 退避等待期间观察的关闭信号
    shutdown: watch::Receiver<bool>,
}

impl NotificationService {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        outcome_log: Arc<dyn OutcomeLog>,
        retry_policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            outcome_log,
            retry_policy,
            shutdown,
        }
    }

    /// 处理一条购买事件
    ///
    /// 校验失败时直接返回，不发送也不记录；校验通过后无论投递成败都恰好写入一条记录。
    #[instrument(skip_all, fields(transaction_id = %event.transaction_id))]
    pub async fn process_purchase(
        &self,
        event: &PurchaseEvent,
    ) -> Result<DeliveryOutcome, NotificationError> {
        if let Err(e) = validate_purchase(event) {
            warn!(
                user_id = %event.user_id,
                field = e.field(),
                error = %e,
                "购买事件校验失败，丢弃"
            );
            return Err(NotificationError::Validation(e));
        }

        let message = PurchaseTemplate::render(event);
        let recipient = event.user_email.as_str();
        let started = Instant::now();

        let retry = retry_with_policy(
            &self.retry_policy,
            "send_purchase_email",
            &self.shutdown,
            |e: &NotificationError| matches!(e, NotificationError::Transport(_)),
            |attempt| {
                let transport = &self.transport;
                let message = &message;
                async move {
                    debug!(attempt, recipient = %recipient, "发送购买确认邮件");
                    transport.send(recipient, message).await
                }
            },
        )
        .await;

        let (record, outcome) = match retry.result {
            Ok(()) => {
                info!(
                    attempts = retry.attempts,
                    recipient = %recipient,
                    "购买确认邮件发送成功"
                );
                (
                    OutcomeRecord::sent(&event.transaction_id, recipient, &message.subject),
                    DeliveryOutcome::Sent {
                        attempts: retry.attempts,
                    },
                )
            }
            Err(e) => {
                let detail = failure_detail(&e);
                error!(
                    attempts = retry.attempts,
                    interrupted = retry.interrupted,
                    recipient = %recipient,
                    error = %e,
                    "购买确认邮件发送失败"
                );
                (
                    OutcomeRecord::failed(
                        &event.transaction_id,
                        recipient,
                        &message.subject,
                        detail.clone(),
                    ),
                    DeliveryOutcome::Exhausted {
                        attempts: retry.attempts,
                        last_error: detail,
                    },
                )
            }
        };

        app_metrics::record_notification(
            record.status().as_str(),
            outcome.attempts(),
            started.elapsed().as_secs_f64(),
        );

        if let Err(e) = self.outcome_log.record(&record).await {
            error!(
                status = %record.status(),
                error = %e,
                "投递结果写入失败"
            );
            return Err(e);
        }

        Ok(outcome)
    }
}

/// 写入日志表的错误信息，传输错误只保留对端给出的原因
fn failure_detail(err: &NotificationError) -> String {
    match err {
        NotificationError::Transport(reason) => reason.clone(),
        other => other.to_string(),
    }
}
