//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 `MessageSource` 抽象：按有界等待拉取单条消息，
//! 并把流本身的故障分为可恢复与致命两类，由消费循环决定继续还是退出。

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::SharedError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给分发器。只保留分发与日志需要的字段。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            // 空负载交给解码阶段报错
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    /// 构造只含负载的消息，便于测试和内存数据源使用
    pub fn from_payload(topic: &str, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.to_string(),
            partition: 0,
            offset,
            payload: payload.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamFault — 流级故障
// ---------------------------------------------------------------------------

/// 消息流自身报告的故障
///
/// 由数据源判定是否致命：致命故障会终止消费循环，其余只记录日志。
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StreamFault {
    pub message: String,
    pub fatal: bool,
}

impl StreamFault {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

impl From<&KafkaError> for StreamFault {
    fn from(err: &KafkaError) -> Self {
        let fatal = matches!(err, KafkaError::MessageConsumptionFatal(_))
            || err.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);
        Self {
            message: err.to_string(),
            fatal,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageSource — 消息来源抽象
// ---------------------------------------------------------------------------

/// 消息来源
///
/// 消费循环是唯一的读取方，因此方法接收 `&mut self`。
#[async_trait]
pub trait MessageSource: Send {
    /// 订阅 topic，成功后才允许拉取
    fn subscribe(&mut self, topic: &str) -> Result<(), SharedError>;

    /// 在 `timeout` 内拉取下一条消息，超时无消息返回 `Ok(None)`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>, StreamFault>;

    /// 释放底层连接
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 基于 rdkafka `StreamConsumer` 的消息来源
///
/// 开启自动提交：消息一旦交给处理函数即视为已消费，失败不会导致重复拉取。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, SharedError> {
        let group_id = config.consumer_group.clone();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.trim_matches('"'))
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| SharedError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer, group_id })
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), SharedError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| SharedError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(topic, group_id = %self.group_id, "已订阅 Kafka topic");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>, StreamFault> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(borrowed)) => {
                let msg = ConsumerMessage::from_borrowed(&borrowed);
                debug!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "收到 Kafka 消息"
                );
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(StreamFault::from(&e)),
        }
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
        info!(group_id = %self.group_id, "Kafka 消费者已取消订阅");
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
