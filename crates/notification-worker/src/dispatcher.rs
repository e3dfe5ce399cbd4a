//! 事件分发
//!
//! 将原始消息负载按绑定的事件类型解码为 `InboundEvent`，再路由到对应的处理函数。

use std::sync::Arc;

use notification_shared::events::{EventKind, InboundEvent};
use tracing::{debug, warn};

use crate::error::NotificationError;
use crate::service::{DeliveryOutcome, NotificationService};

pub struct EventDispatcher {
    kind: EventKind,
    service: Arc<NotificationService>,
}

impl EventDispatcher {
    pub fn new(kind: EventKind, service: Arc<NotificationService>) -> Self {
        Self { kind, service }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// 处理一条原始消息
    ///
    /// 解码失败时不调用编排器；解码成功则原样返回编排器的结果。
    pub async fn handle(&self, payload: &[u8]) -> Result<DeliveryOutcome, NotificationError> {
        let event = InboundEvent::decode(self.kind, payload).map_err(|e| {
            warn!(kind = %self.kind, payload_len = payload.len(), error = %e, "消息负载解码失败");
            NotificationError::Decode(e)
        })?;

        debug!(
            kind = %event.kind(),
            correlation_id = %event.correlation_id(),
            "事件解码成功"
        );

        match event {
            InboundEvent::Purchase(purchase) => self.service.process_purchase(&purchase).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use notification_shared::retry::RetryPolicy;
    use notification_shared::test_utils::{purchase_payload, sample_purchase};
    use tokio::sync::watch;

    use super::*;
    use crate::repository::MockOutcomeLog;
    use crate::sender::MockMailTransport;

    fn dispatcher(transport: MockMailTransport, outcome_log: MockOutcomeLog) -> EventDispatcher {
        let (_tx, rx) = watch::channel(false);
        let service = NotificationService::new(
            Arc::new(transport),
            Arc::new(outcome_log),
            RetryPolicy::default(),
            rx,
        );
        EventDispatcher::new(EventKind::Purchase, Arc::new(service))
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_service() {
        let mut transport = MockMailTransport::new();
        transport.expect_send().never();
        let mut outcome_log = MockOutcomeLog::new();
        outcome_log.expect_record().never();

        let dispatcher = dispatcher(transport, outcome_log);

        let err = dispatcher.handle(b"{not json").await.unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");

        // 缺少必填字段同样是解码错误
        let err = dispatcher
            .handle(br#"{"transaction_id":"T1","user_id":"U100"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[tokio::test]
    async fn test_purchase_is_routed_to_service() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .times(1)
            .withf(|recipient, _| recipient.to_string() == "a@b.com")
            .returning(|_, _| Ok(()));
        let mut outcome_log = MockOutcomeLog::new();
        outcome_log.expect_record().times(1).returning(|_| Ok(7));

        let dispatcher = dispatcher(transport, outcome_log);
        assert_eq!(dispatcher.kind(), EventKind::Purchase);

        let outcome = dispatcher
            .handle(&purchase_payload(&sample_purchase("T1")))
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Sent { attempts: 1 });
    }

    #[tokio::test]
    async fn test_service_error_is_propagated_unchanged() {
        let mut transport = MockMailTransport::new();
        transport.expect_send().never();
        let outcome_log = MockOutcomeLog::new();

        let dispatcher = dispatcher(transport, outcome_log);
        let mut event = sample_purchase("T1");
        event.coins_purchased = 0;

        let err = dispatcher.handle(&purchase_payload(&event)).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
