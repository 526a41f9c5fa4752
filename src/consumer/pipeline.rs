//! 单条消息的处理流水线

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use super::{BindingKey, MessageHandler};
use crate::broker::RawMessage;
use crate::codec;
use crate::metrics::ConsumeMetrics;
use crate::retry::RetryGuard;

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOutcome {
    /// 业务处理返回 true
    Processed,
    /// 业务处理返回 false
    Failed,
    /// 达到重试上限，不再处理，按成功确认
    Discarded,
    /// 消息体为空或无法解码，跳过
    Skipped,
}

/// 类型擦除后的消息处理器，推/拉两种模式共用
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: &RawMessage) -> MessageOutcome;

    fn metrics(&self) -> &ConsumeMetrics;
}

/// 重试熔断 → 解码 → 业务处理
pub struct MessagePipeline<H: MessageHandler> {
    name: String,
    handler: Arc<H>,
    guard: RetryGuard,
    metrics: ConsumeMetrics,
}

impl<H: MessageHandler> MessagePipeline<H> {
    pub fn new(name: impl Into<String>, handler: Arc<H>, guard: RetryGuard) -> Self {
        Self {
            name: name.into(),
            handler,
            guard,
            metrics: ConsumeMetrics::new(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: ConsumeMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    async fn run(&self, message: &RawMessage) -> MessageOutcome {
        if self.guard.should_discard(message.reconsume_count) {
            error!(
                consumer = %self.name,
                msg_id = %message.id,
                msg_key = %message.keys,
                tags = %message.tags,
                reconsume_count = message.reconsume_count,
                max_retries = self.guard.max_retries(),
                "Consumer reach the maximum number of retries, please process by manual work"
            );
            return MessageOutcome::Discarded;
        }

        debug!(
            consumer = %self.name,
            msg_id = %message.id,
            tags = %message.tags,
            reconsume_count = message.reconsume_count,
            "Received message"
        );

        let Some(payload) = codec::decode::<H::Message>(&message.body) else {
            debug!(consumer = %self.name, msg_id = %message.id, "Nothing to process, message skipped");
            return MessageOutcome::Skipped;
        };

        if self
            .handler
            .process(&message.keys, &message.tags, payload)
            .await
        {
            MessageOutcome::Processed
        } else {
            MessageOutcome::Failed
        }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageProcessor for MessagePipeline<H> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &RawMessage) -> MessageOutcome {
        let outcome = self.run(message).await;
        self.metrics.record_outcome(outcome).await;
        outcome
    }

    fn metrics(&self) -> &ConsumeMetrics {
        &self.metrics
    }
}

/// 注册期保存的类型化 handler，启动时按解析出的 binding 构建流水线
pub(crate) trait HandlerFactory: Send + Sync {
    fn binding_value(&self, key: BindingKey) -> Option<toml::Value>;

    fn build(
        &self,
        name: &str,
        guard: RetryGuard,
        metrics: ConsumeMetrics,
    ) -> Arc<dyn MessageProcessor>;
}

pub(crate) struct TypedHandler<H: MessageHandler>(pub(crate) Arc<H>);

impl<H: MessageHandler> HandlerFactory for TypedHandler<H> {
    fn binding_value(&self, key: BindingKey) -> Option<toml::Value> {
        self.0.binding_value(key)
    }

    fn build(
        &self,
        name: &str,
        guard: RetryGuard,
        metrics: ConsumeMetrics,
    ) -> Arc<dyn MessageProcessor> {
        Arc::new(MessagePipeline::new(name, self.0.clone(), guard).with_metrics(metrics))
    }
}
