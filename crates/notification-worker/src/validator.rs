//! 购买事件校验
//!
//! 纯函数，不做任何 I/O。按固定顺序检查字段，返回第一个失败项：
//! 邮箱、交易 ID、用户 ID、金币数量。

use std::sync::LazyLock;

use notification_shared::events::PurchaseEvent;
use regex::Regex;
use thiserror::Error;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .unwrap_or_else(|e| panic!("邮箱正则表达式无效: {e}"))
});

/// 用户 ID 最短长度
pub const MIN_USER_ID_LEN: usize = 3;

/// 校验失败原因，Display 输出为 `字段: 原因`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("user_email: 邮箱为空")]
    EmptyEmail,

    #[error("user_email: 邮箱格式无效")]
    InvalidEmailFormat,

    #[error("transaction_id: 交易 ID 为空")]
    EmptyTransactionId,

    #[error("user_id: 用户 ID 为空")]
    EmptyUserId,

    #[error("user_id: 用户 ID 长度不足 {MIN_USER_ID_LEN} 个字符")]
    UserIdTooShort,

    #[error("coins_purchased: 购买金币数必须大于 0")]
    NonPositiveCoins,
}

impl ValidationError {
    /// 出错的字段名
    pub fn field(&self) -> &'static str {
        match self {
            Self::EmptyEmail | Self::InvalidEmailFormat => "user_email",
            Self::EmptyTransactionId => "transaction_id",
            Self::EmptyUserId | Self::UserIdTooShort => "user_id",
            Self::NonPositiveCoins => "coins_purchased",
        }
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::EmptyEmail);
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ValidationError::InvalidEmailFormat);
    }
    Ok(())
}

pub fn validate_transaction_id(transaction_id: &str) -> Result<(), ValidationError> {
    if transaction_id.trim().is_empty() {
        return Err(ValidationError::EmptyTransactionId);
    }
    Ok(())
}

/// 长度按字符计算，去除首尾空白后判断
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    if user_id.chars().count() < MIN_USER_ID_LEN {
        return Err(ValidationError::UserIdTooShort);
    }
    Ok(())
}

pub fn validate_coins(coins: i64) -> Result<(), ValidationError> {
    if coins <= 0 {
        return Err(ValidationError::NonPositiveCoins);
    }
    Ok(())
}

/// 校验购买事件，返回第一个不满足的规则
pub fn validate_purchase(event: &PurchaseEvent) -> Result<(), ValidationError> {
    validate_email(&event.user_email)?;
    validate_transaction_id(&event.transaction_id)?;
    validate_user_id(&event.user_id)?;
    validate_coins(event.coins_purchased)?;
    Ok(())
}
