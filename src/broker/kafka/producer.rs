//! Kafka 生产者

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::{ClientContext, Message};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::{KAFKA_BROKER_NAME, RECONSUME_HEADER, TAG_HEADER, kafka_error};
use crate::broker::{ClientOptions, OutgoingMessage, ProducerClient, QueueId, SendResult};
use crate::error::{ErrorCode, MqError, Result};

type DeliveryTx = oneshot::Sender<std::result::Result<(i32, i64), String>>;

/// 把投递回调转发给等待中的发送方
pub(crate) struct DeliveryContext;

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<DeliveryTx>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, delivery_opaque: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(message) => Ok((message.partition(), message.offset())),
            Err((err, _)) => Err(err.to_string()),
        };
        // 发送方已放弃等待
        let _ = delivery_opaque.send(outcome);
    }
}

pub(crate) type DeliveryProducer = ThreadedProducer<DeliveryContext>;

pub(crate) fn build_producer(
    bootstrap: &str,
    config: &super::KafkaBrokerConfig,
) -> Result<DeliveryProducer> {
    let producer = super::config::producer_config(bootstrap, config)
        .create_with_context(DeliveryContext)
        .map_err(|e| kafka_error(ErrorCode::ConnectionFailed, e))?;
    info!(
        bootstrap = %bootstrap,
        timeout_ms = config.message_timeout_ms,
        idempotence = config.enable_idempotence,
        compression = %config.compression_type,
        "Kafka producer created successfully"
    );
    Ok(producer)
}

/// 发送一条消息并等待 broker 确认
pub(crate) async fn send_record(
    producer: &DeliveryProducer,
    message: &OutgoingMessage,
    reconsume_count: u32,
) -> Result<SendResult> {
    let (tx, rx) = oneshot::channel();

    let mut headers = OwnedHeaders::new();
    if let Some(tag) = message.tag.as_deref() {
        headers = headers.insert(Header {
            key: TAG_HEADER,
            value: Some(tag),
        });
    }
    if reconsume_count > 0 {
        let count = reconsume_count.to_string();
        headers = headers.insert(Header {
            key: RECONSUME_HEADER,
            value: Some(count.as_str()),
        });
    }

    let mut record: BaseRecord<'_, str, [u8], Box<DeliveryTx>> =
        BaseRecord::with_opaque_to(&message.topic, Box::new(tx))
            .payload(message.body.as_slice())
            .headers(headers);
    if let Some(key) = message.key.as_deref() {
        record = record.key(key);
    }

    producer
        .send(record)
        .map_err(|(err, _)| kafka_error(ErrorCode::MessageSendFailed, err))?;

    let (partition, offset) = rx
        .await
        .map_err(|_| MqError::message_send_failed("delivery report dropped"))?
        .map_err(MqError::message_send_failed)?;

    Ok(SendResult {
        msg_id: format!("{}-{}-{}", message.topic, partition, offset),
        queue: QueueId::new(message.topic.clone(), KAFKA_BROKER_NAME, partition.max(0) as u32),
        queue_offset: offset,
    })
}

pub(crate) struct KafkaProducer {
    producer: Arc<DeliveryProducer>,
    options: ClientOptions,
    flush_timeout: Duration,
    started: AtomicBool,
}

impl KafkaProducer {
    pub(crate) fn new(producer: DeliveryProducer, options: ClientOptions, flush_timeout: Duration) -> Self {
        Self {
            producer: Arc::new(producer),
            options,
            flush_timeout,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProducerClient for KafkaProducer {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> Result<SendResult> {
        if !self.started.load(Ordering::Acquire) {
            return Err(MqError::client_not_started(&self.options.instance_name));
        }
        send_record(&self.producer, &message, 0).await
    }

    async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => info!(group = %self.options.group, "Kafka producer flushed"),
            Ok(Err(e)) => warn!(group = %self.options.group, error = %e, "Failed to flush Kafka producer"),
            Err(e) => warn!(group = %self.options.group, error = %e, "Kafka producer flush task failed"),
        }
    }
}
