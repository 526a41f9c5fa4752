//! 消息生产者
//!
//! 所有生产者 binding 共享同一个 broker 生产者客户端，`Producer` 只携带
//! 解析出的默认 topic/tag。

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::broker::{OutgoingMessage, ProducerClient, SendResult};
use crate::codec;
use crate::error::{ErrorBuilder, ErrorCode, MqError, Result};
use crate::wiring::ProducerBinding;

/// 单条消息体的默认上限（4 MiB）
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// 绑定了默认 topic/tag 的生产者
#[derive(Clone)]
pub struct Producer {
    binding: ProducerBinding,
    client: Arc<dyn ProducerClient>,
    send_timeout: Duration,
    max_message_size: usize,
}

impl Producer {
    pub fn new(binding: ProducerBinding, client: Arc<dyn ProducerClient>, send_timeout: Duration) -> Self {
        Self {
            binding,
            client,
            send_timeout,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn binding(&self) -> &ProducerBinding {
        &self.binding
    }

    pub fn topic(&self) -> Option<&str> {
        self.binding.topic.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.binding.tag.as_deref()
    }

    /// 以 JSON 编码发送到 binding 的默认 topic/tag
    pub async fn send<T>(&self, key: &str, payload: &T) -> Result<SendResult>
    where
        T: Serialize + ?Sized,
    {
        let topic = self.binding.topic.clone().ok_or_else(|| {
            ErrorBuilder::new(ErrorCode::TopicNotSpecified, "producer has no default topic")
                .param("producer", &self.binding.name)
                .build()
        })?;
        let message = OutgoingMessage {
            topic,
            tag: self.binding.tag.clone(),
            key: non_blank(key),
            body: codec::encode(payload)?,
        };
        self.send_raw(message).await
    }

    /// 以 JSON 编码发送到指定 topic
    pub async fn send_to<T>(
        &self,
        topic: &str,
        tag: Option<&str>,
        key: Option<&str>,
        payload: &T,
    ) -> Result<SendResult>
    where
        T: Serialize + ?Sized,
    {
        let message = OutgoingMessage {
            topic: topic.to_string(),
            tag: tag.and_then(non_blank),
            key: key.and_then(non_blank),
            body: codec::encode(payload)?,
        };
        self.send_raw(message).await
    }

    /// 发送已编码的消息
    pub async fn send_raw(&self, message: OutgoingMessage) -> Result<SendResult> {
        if message.topic.trim().is_empty() {
            return Err(MqError::coded(ErrorCode::TopicNotSpecified, "message topic is empty"));
        }
        if message.body.len() > self.max_message_size {
            return Err(ErrorBuilder::new(ErrorCode::MessageTooLarge, "message body exceeds limit")
                .param("size", message.body.len().to_string())
                .param("limit", self.max_message_size.to_string())
                .build());
        }

        let topic = message.topic.clone();
        match tokio::time::timeout(self.send_timeout, self.client.send(message)).await {
            Ok(Ok(result)) => {
                debug!(producer = %self.binding.name, topic = %topic, msg_id = %result.msg_id, "Message sent");
                Ok(result)
            }
            Ok(Err(err)) => {
                error!(producer = %self.binding.name, topic = %topic, error = %err, "Failed to send message");
                Err(err)
            }
            Err(_) => {
                error!(producer = %self.binding.name, topic = %topic, timeout = ?self.send_timeout, "Send message timeout");
                Err(MqError::timeout(format!(
                    "send to topic {} timed out after {:?}",
                    topic, self.send_timeout
                )))
            }
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConnector, ClientOptions, MemoryBroker};
    use serde_json::json;

    async fn producer(topic: Option<&str>) -> (MemoryBroker, Producer) {
        let broker = MemoryBroker::new();
        let client = broker
            .create_producer(&ClientOptions::new("pg", "memory://local"))
            .unwrap();
        client.start().await.unwrap();
        let binding = ProducerBinding {
            name: "orders".to_string(),
            producer_group: "pg".to_string(),
            topic: topic.map(str::to_string),
            tag: Some("created".to_string()),
        };
        (broker, Producer::new(binding, client, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn sends_to_default_topic() {
        let (broker, producer) = producer(Some("ORDER")).await;
        let result = producer.send("order-1", &json!({"id": 1})).await.unwrap();
        assert_eq!(result.queue.topic, "ORDER");
        assert_eq!(broker.message_count("ORDER"), 1);
    }

    #[tokio::test]
    async fn missing_default_topic_is_rejected() {
        let (_broker, producer) = producer(None).await;
        let err = producer.send("k", &json!({})).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TopicNotSpecified));
        assert_eq!(err.param("producer"), Some("orders"));

        producer.send_to("OTHER", None, None, &json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (_broker, producer) = producer(Some("ORDER")).await;
        let producer = producer.with_max_message_size(8);
        let err = producer
            .send("k", &json!({"payload": "more than eight bytes"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MessageTooLarge));
    }
}
