//! 消费循环
//!
//! 循环是消息流的唯一读取方：有界等待拉取消息，逐条交给分发器，
//! 在每轮开始时检查关闭信号。消息级错误只记录日志，致命流故障终止循环。
//!
//! 通过类型状态区分未订阅与已订阅的循环，只有订阅成功后才能调用 `run`。

use std::time::Duration;

use notification_shared::kafka::MessageSource;
use notification_shared::observability::metrics as app_metrics;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::NotificationError;
use crate::service::DeliveryOutcome;

/// 默认单次拉取等待时间
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// 循环当前所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Dispatching,
    Stopping,
    Stopped,
}

/// 循环退出时的处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// 拉取到的消息数
    pub received: u64,
    /// 分发成功（结果已记录）的消息数
    pub succeeded: u64,
    /// 分发返回错误的消息数
    pub failed: u64,
    /// 非致命流故障次数
    pub faults: u64,
}

/// 尚未订阅
pub struct Idle;

/// 已订阅 topic
pub struct Subscribed {
    topic: String,
}

pub struct ConsumptionLoop<S, St = Idle> {
    source: S,
    dispatcher: EventDispatcher,
    poll_timeout: Duration,
    state_tx: watch::Sender<LoopState>,
    stage: St,
}

impl<S: MessageSource> ConsumptionLoop<S, Idle> {
    pub fn new(source: S, dispatcher: EventDispatcher) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Idle);
        Self {
            source,
            dispatcher,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            state_tx,
            stage: Idle,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// 订阅 topic，成功后得到可运行的循环
    pub fn subscribe(
        mut self,
        topic: &str,
    ) -> Result<ConsumptionLoop<S, Subscribed>, NotificationError> {
        self.source.subscribe(topic)?;
        info!(topic, kind = %self.dispatcher.kind(), "已订阅 topic");

        Ok(ConsumptionLoop {
            source: self.source,
            dispatcher: self.dispatcher,
            poll_timeout: self.poll_timeout,
            state_tx: self.state_tx,
            stage: Subscribed {
                topic: topic.to_string(),
            },
        })
    }
}

impl<S, St> ConsumptionLoop<S, St> {
    /// 订阅循环阶段变化
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: LoopState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "消费循环状态变化");
        }
    }
}

impl<S: MessageSource> ConsumptionLoop<S, Subscribed> {
    pub fn topic(&self) -> &str {
        &self.stage.topic
    }

    /// 运行消费循环直到收到关闭信号或遇到致命流故障
    ///
    /// 关闭信号视为正常退出，返回处理统计；致命故障返回 `FatalStream`。
    /// 无论哪种方式退出都会关闭消息源。
    pub async fn run(
        mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<LoopStats, NotificationError> {
        info!(
            topic = %self.stage.topic,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "消费循环已启动"
        );

        let mut stats = LoopStats::default();

        let result = loop {
            if *shutdown.borrow() {
                info!("收到关闭信号，停止拉取");
                break Ok(());
            }

            self.transition(LoopState::Polling);
            let msg = match self.source.poll(self.poll_timeout).await {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(fault) if fault.fatal => {
                    app_metrics::record_stream_fault(true);
                    error!(error = %fault, "消息流出现致命故障，终止消费");
                    break Err(NotificationError::FatalStream(fault.message));
                }
                Err(fault) => {
                    stats.faults += 1;
                    app_metrics::record_stream_fault(false);
                    warn!(error = %fault, "消息流故障，继续拉取");
                    continue;
                }
            };

            stats.received += 1;
            self.transition(LoopState::Dispatching);

            match self.dispatcher.handle(&msg.payload).await {
                Ok(outcome) => {
                    stats.succeeded += 1;
                    let label = match &outcome {
                        DeliveryOutcome::Sent { .. } => "sent",
                        DeliveryOutcome::Exhausted { .. } => "exhausted",
                    };
                    app_metrics::record_consumed_message(label);
                    debug!(
                        partition = msg.partition,
                        offset = msg.offset,
                        attempts = outcome.attempts(),
                        result = label,
                        "消息处理完成"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    app_metrics::record_consumed_message(e.code());
                    error!(
                        error = %e,
                        code = e.code(),
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "处理消息失败"
                    );
                }
            }
        };

        self.transition(LoopState::Stopping);
        self.source.close();
        self.transition(LoopState::Stopped);

        info!(
            received = stats.received,
            succeeded = stats.succeeded,
            failed = stats.failed,
            faults = stats.faults,
            "消费循环已停止"
        );

        result.map(|()| stats)
    }
}
