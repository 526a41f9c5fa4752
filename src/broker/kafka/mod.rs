//! Kafka broker 实现
//!
//! 此模块需要启用 `kafka` feature 才能使用。
//!
//! 与 RocketMQ 语义的对应关系：
//! - 队列 ↔ 分区，队列 offset ↔ 分区 offset
//! - tag 与重投递次数放在消息 header 中
//! - 广播模式 ↔ 每个实例独立的消费组
//! - 并发模式下的稍后重投递 ↔ 递增重投递次数后重新发送到原 topic

pub mod config;
pub mod consumer;
pub mod producer;

pub use config::KafkaBrokerConfig;

use rdkafka::Message;
use rdkafka::error::KafkaError;
use rdkafka::message::Headers;
use std::sync::Arc;

use self::consumer::{KafkaPullConsumer, KafkaPushConsumer};
use self::producer::{KafkaProducer, build_producer};
use crate::broker::{
    BrokerConnector, ClientOptions, ProducerClient, PullConsumerClient, PushConsumerClient,
    RawMessage,
};
use crate::error::{ErrorCode, MqError, Result};

/// Kafka 侧的 broker 名称（用于 `QueueId`）
pub const KAFKA_BROKER_NAME: &str = "kafka";
/// 消息 tag 的 header 名称
pub const TAG_HEADER: &str = "mq-tag";
/// 重投递次数的 header 名称
pub const RECONSUME_HEADER: &str = "mq-reconsume-times";

/// 基于 rdkafka 的连接器
#[derive(Debug, Clone, Default)]
pub struct KafkaBroker {
    config: KafkaBrokerConfig,
}

impl KafkaBroker {
    pub fn new(config: KafkaBrokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KafkaBrokerConfig {
        &self.config
    }
}

impl BrokerConnector for KafkaBroker {
    fn create_push_consumer(&self, options: &ClientOptions) -> Result<Arc<dyn PushConsumerClient>> {
        // 重投递需要把消息重新发送到原 topic
        let producer = build_producer(&options.name_server_address, &self.config)?;
        Ok(Arc::new(KafkaPushConsumer::new(options, &self.config, producer)?))
    }

    fn create_pull_consumer(&self, options: &ClientOptions) -> Result<Arc<dyn PullConsumerClient>> {
        Ok(Arc::new(KafkaPullConsumer::new(options, &self.config)?))
    }

    fn create_producer(&self, options: &ClientOptions) -> Result<Arc<dyn ProducerClient>> {
        let producer = build_producer(&options.name_server_address, &self.config)?;
        Ok(Arc::new(KafkaProducer::new(
            producer,
            options.clone(),
            self.config.request_timeout(),
        )))
    }
}

pub(crate) fn kafka_error(code: ErrorCode, err: KafkaError) -> MqError {
    MqError::broker(code, format!("kafka: {}", err))
}

/// 转换为 broker 无关的消息
pub(crate) fn to_raw_message<M: Message>(message: &M) -> RawMessage {
    let mut tags = String::new();
    let mut reconsume_count = 0;
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            let Some(value) = header.value else { continue };
            match header.key {
                TAG_HEADER => tags = String::from_utf8_lossy(value).into_owned(),
                RECONSUME_HEADER => {
                    reconsume_count = std::str::from_utf8(value)
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                }
                _ => {}
            }
        }
    }

    let born_timestamp = message
        .timestamp()
        .to_millis()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .unwrap_or_else(chrono::Utc::now);

    RawMessage {
        id: format!("{}-{}-{}", message.topic(), message.partition(), message.offset()),
        topic: message.topic().to_string(),
        keys: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default(),
        tags,
        body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        reconsume_count,
        queue_offset: message.offset(),
        born_timestamp,
    }
}
