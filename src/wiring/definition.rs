//! 消费者 / 生产者声明
//!
//! 声明值为空时由 handler 的配置提供能力补全，最终结果还可以被属性覆盖。

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::binding::DeliveryKind;
use crate::broker::SUBSCRIBE_ALL;
use crate::consumer::pipeline::{HandlerFactory, TypedHandler};
use crate::consumer::{BindingProvider, MessageHandler};

/// 消费者声明
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerDefinition {
    pub consumer_group: String,
    pub topic: String,
    /// 订阅的 tag，默认 `*`
    pub tags: Vec<String>,
    /// CLUSTERING / BROADCASTING
    pub message_model: String,
    /// CONCURRENT / ORDERED（兼容 CONCURRENTLY / ORDERLY）
    pub consume_mode: String,
    /// 重试上限，未设置时为 5
    pub max_retries: Option<u32>,
}

impl Default for ConsumerDefinition {
    fn default() -> Self {
        Self {
            consumer_group: String::new(),
            topic: String::new(),
            tags: vec![SUBSCRIBE_ALL.to_string()],
            message_model: "CLUSTERING".to_string(),
            consume_mode: "CONCURRENT".to_string(),
            max_retries: None,
        }
    }
}

impl ConsumerDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_message_model(mut self, model: impl Into<String>) -> Self {
        self.message_model = model.into();
        self
    }

    #[must_use]
    pub fn with_consume_mode(mut self, mode: impl Into<String>) -> Self {
        self.consume_mode = mode.into();
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// 生产者声明
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProducerDefinition {
    pub topic: String,
    pub tag: String,
}

impl ProducerDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

/// 消费者注册项
///
/// 必须通过 `push` 或 `pull` 绑定 handler，否则启动时报 `UnsupportedConsumer`。
pub struct ConsumerRegistration {
    pub(crate) name: String,
    pub(crate) definition: ConsumerDefinition,
    pub(crate) handler: Option<(DeliveryKind, Box<dyn HandlerFactory>)>,
}

impl ConsumerRegistration {
    pub fn new(name: impl Into<String>, definition: ConsumerDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
            handler: None,
        }
    }

    /// 以推模式消费
    #[must_use]
    pub fn push<H: MessageHandler>(mut self, handler: Arc<H>) -> Self {
        self.handler = Some((DeliveryKind::Push, Box::new(TypedHandler(handler))));
        self
    }

    /// 以拉模式消费
    #[must_use]
    pub fn pull<H: MessageHandler>(mut self, handler: Arc<H>) -> Self {
        self.handler = Some((DeliveryKind::Pull, Box::new(TypedHandler(handler))));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &ConsumerDefinition {
        &self.definition
    }

    pub fn delivery(&self) -> Option<DeliveryKind> {
        self.handler.as_ref().map(|(kind, _)| *kind)
    }
}

/// 生产者注册项
pub struct ProducerRegistration {
    pub(crate) name: String,
    pub(crate) definition: ProducerDefinition,
    pub(crate) provider: Option<Arc<dyn BindingProvider>>,
}

impl ProducerRegistration {
    pub fn new(name: impl Into<String>, definition: ProducerDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
            provider: None,
        }
    }

    /// 声明未给出 topic/tag 时的配置提供方
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn BindingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &ProducerDefinition {
        &self.definition
    }
}
