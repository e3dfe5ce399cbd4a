//! 购买通知 worker
//!
//! 从 Kafka 消费支付成功事件，发送购买确认邮件，并将每个事件的投递结果写入 PostgreSQL。
//! 投递失败按退避策略重试，重试耗尽后同样记录结果。

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod repository;
pub mod sender;
pub mod service;
pub mod shutdown;
pub mod templates;
pub mod validator;

pub use consumer::{ConsumptionLoop, LoopState, LoopStats};
pub use dispatcher::EventDispatcher;
pub use error::NotificationError;
pub use service::{DeliveryOutcome, NotificationService};
