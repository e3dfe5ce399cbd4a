//! 购买确认邮件模板
//!
//! 主题固定；正文有两种，按事件是否携带商品 ID 选择。
//! 渲染结果只依赖事件内容，同一事件多次渲染得到相同文本。

use notification_shared::events::PurchaseEvent;

/// 购买确认邮件主题
pub const PURCHASE_SUBJECT: &str = "金币购买成功！";

/// 渲染后的邮件内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

pub struct PurchaseTemplate;

impl PurchaseTemplate {
    pub fn render_subject(_event: &PurchaseEvent) -> String {
        PURCHASE_SUBJECT.to_string()
    }

    pub fn render_body(event: &PurchaseEvent) -> String {
        match event.product_id.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(product_id) => format!(
                "您好！\n\n您已成功购买 {} 枚金币（商品：{}）。\n交易编号：{}\n\n感谢您的购买！",
                event.coins_purchased, product_id, event.transaction_id
            ),
            None => format!(
                "您好！\n\n您已成功购买 {} 枚金币。\n交易编号：{}\n\n感谢您的购买！",
                event.coins_purchased, event.transaction_id
            ),
        }
    }

    pub fn render(event: &PurchaseEvent) -> RenderedMessage {
        RenderedMessage {
            subject: Self::render_subject(event),
            body: Self::render_body(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_product() {
        let event = PurchaseEvent::new("T1", "U100", "a@b.com", 50);
        let message = PurchaseTemplate::render(&event);

        assert_eq!(message.subject, PURCHASE_SUBJECT);
        assert_eq!(
            message.body,
            "您好！\n\n您已成功购买 50 枚金币。\n交易编号：T1\n\n感谢您的购买！"
        );
    }

    #[test]
    fn test_render_with_product() {
        let event = PurchaseEvent::new("T2", "U100", "a@b.com", 100).with_product("pack_100");
        let body = PurchaseTemplate::render_body(&event);

        assert!(body.contains("（商品：pack_100）"));
        assert!(body.contains("交易编号：T2"));
    }

    #[test]
    fn test_empty_product_id_uses_plain_body() {
        let payload = br#"{"transaction_id":"T1","user_id":"U100","user_email":"a@b.com","coins_purchased":50,"product_id":""}"#;
        let event: PurchaseEvent = serde_json::from_slice(payload).unwrap();

        assert_eq!(
            PurchaseTemplate::render_body(&event),
            "您好！\n\n您已成功购买 50 枚金币。\n交易编号：T1\n\n感谢您的购买！"
        );
    }

    #[test]
    fn test_metadata_does_not_change_rendering() {
        let plain = PurchaseEvent::new("T1", "U100", "a@b.com", 50);
        let mut tagged = plain.clone();
        tagged.provider = Some("stripe".to_string());
        tagged.country = Some("DE".to_string());

        assert_eq!(PurchaseTemplate::render(&plain), PurchaseTemplate::render(&tagged));
    }
}
