//! 解析完成的 binding
//!
//! 启动期构建一次，此后不可变。

use crate::broker::{ConsumeMode, MessageModel, SubscriptionExpression};

/// 投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    /// broker 客户端推送
    Push,
    /// 引擎自行拉取并管理 offset
    Pull,
}

impl std::fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryKind::Push => write!(f, "push"),
            DeliveryKind::Pull => write!(f, "pull"),
        }
    }
}

/// 消费者 binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerBinding {
    /// 注册名称
    pub name: String,
    pub consumer_group: String,
    pub topic: String,
    /// tag 过滤，保持注册时的顺序
    pub tags: Vec<String>,
    pub message_model: MessageModel,
    pub consume_mode: ConsumeMode,
    /// 重试上限
    pub max_retries: u32,
    pub delivery: DeliveryKind,
}

impl ConsumerBinding {
    pub fn subscription(&self) -> SubscriptionExpression {
        SubscriptionExpression::from_tags(self.tags.iter().cloned())
    }
}

/// 生产者 binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerBinding {
    pub name: String,
    pub producer_group: String,
    /// 未设置时需要在发送时指定
    pub topic: Option<String>,
    pub tag: Option<String>,
}
