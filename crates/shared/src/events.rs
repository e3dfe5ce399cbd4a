//! 入站事件模型
//!
//! 定义支付系统投递到 Kafka 的事件结构，以及按事件类型区分的标签化信封 `InboundEvent`。
//! 订阅的 topic 绑定一个 `EventKind`，解码时据此选择目标结构，
//! 消费端通过 match 分发而不是在运行时做类型判断。

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// EventKind — 事件类型判别值
// ---------------------------------------------------------------------------

/// 事件类型判别值
///
/// 目前只处理购买确认；退款等类型接入时在此增加变体并补充对应的处理函数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Purchase,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Purchase => "purchase",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// PurchaseEvent — 购买成功事件
// ---------------------------------------------------------------------------

/// 购买成功事件
///
/// 由反序列化创建，处理过程中不再修改。未知字段被忽略，
/// 必填字段缺失时解码失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    /// 交易 ID，同时作为日志关联键
    pub transaction_id: String,
    pub user_id: String,
    pub user_email: String,
    pub coins_purchased: i64,
    /// 上游未关联商品时发送空串，解码后与缺省一样为 None
    #[serde(
        default,
        deserialize_with = "non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub product_id: Option<String>,

    // 以下字段仅供记录，不参与校验
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel: Option<String>,
}

impl PurchaseEvent {
    /// 构造只含必填字段的事件
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        user_email: impl Into<String>,
        coins_purchased: i64,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            user_email: user_email.into(),
            coins_purchased,
            product_id: None,
            provider: None,
            country: None,
            funnel: None,
        }
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// 空串或纯空白视为字段缺省
fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

// ---------------------------------------------------------------------------
// InboundEvent — 标签化事件信封
// ---------------------------------------------------------------------------

/// 已解码的入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Purchase(PurchaseEvent),
}

impl InboundEvent {
    /// 按事件类型解码 JSON 负载
    pub fn decode(kind: EventKind, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match kind {
            EventKind::Purchase => serde_json::from_slice(payload).map(Self::Purchase),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Purchase(_) => EventKind::Purchase,
        }
    }

    /// 事件的关联键，用于日志串联
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Purchase(event) => &event.transaction_id,
        }
    }
}
