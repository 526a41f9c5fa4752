//! 消费者契约与消费引擎
//!
//! - `MessageHandler`：业务方实现的消费者契约
//! - `MessagePipeline`：解码 → 重试熔断 → 业务处理
//! - `PushDispatcher`：推模式下 broker 投递批次到契约的适配
//! - `PullLoopEngine`：拉模式下自行管理 offset 的轮询状态机

pub mod pipeline;
pub mod pull;
pub mod push;

pub use pipeline::{MessageOutcome, MessagePipeline, MessageProcessor};
pub use pull::PullLoopEngine;
pub use push::PushDispatcher;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;

/// 可由配置提供能力给出的 binding 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKey {
    ConsumerGroup,
    Topic,
    Tag,
}

impl BindingKey {
    /// 字段名（也是 TOML 表中的键名）
    pub fn field_name(&self) -> &'static str {
        match self {
            BindingKey::ConsumerGroup => "consumer_group",
            BindingKey::Topic => "topic",
            BindingKey::Tag => "tag",
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// 配置提供能力
///
/// 声明中未给出消费组 / topic / tag 时，解析器向 binding 自身询问。
/// 返回非字符串值会导致启动失败。
pub trait BindingProvider: Send + Sync {
    fn binding_value(&self, _key: BindingKey) -> Option<toml::Value> {
        None
    }
}

impl BindingProvider for toml::Table {
    fn binding_value(&self, key: BindingKey) -> Option<toml::Value> {
        self.get(key.field_name()).cloned()
    }
}

/// 消费者契约
///
/// `Message` 即消息体的目标类型，未声明具体类型时使用 `serde_json::Value`。
/// 实现方不感知 broker。
#[async_trait]
pub trait MessageHandler: BindingProvider + 'static {
    type Message: DeserializeOwned + Send + 'static;

    /// 处理一条消息，返回业务处理是否成功
    async fn process(&self, message_key: &str, tag: &str, message: Self::Message) -> bool;
}
