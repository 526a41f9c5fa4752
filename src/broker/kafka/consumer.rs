//! Kafka 消费者
//!
//! - 拉模式：集群消费订阅 topic 随重平衡持有分区，广播消费手动 assign 全部分区，
//!   都按调用方给出的 offset 拉取并同步提交
//! - 推模式：`StreamConsumer` 订阅 topic，由后台任务逐条投递给监听器

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::producer::{DeliveryProducer, send_record};
use super::{KAFKA_BROKER_NAME, KafkaBrokerConfig, kafka_error, to_raw_message};
use crate::broker::{
    ClientOptions, ConsumeContext, ConsumeMode, ConsumeStatus, MessageListener, MessageModel, OutgoingMessage,
    PullConsumerClient, PullResult, PullStatus, PushConsumerClient, QueueId, RawMessage,
    SubscriptionExpression,
};
use crate::error::{ErrorCode, MqError, Result};

/// 已拿到至少一条消息后，继续凑批的最长等待
const BATCH_LINGER: Duration = Duration::from_millis(50);

async fn run_blocking<T, F>(code: ErrorCode, f: F) -> Result<T>
where
    F: FnOnce() -> KafkaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MqError::system(format!("kafka blocking call failed: {}", e)))?
        .map_err(|e| kafka_error(code, e))
}

fn partition_of(queue: &QueueId) -> i32 {
    queue.queue_id as i32
}

// -------- Pull Consumer --------

/// 集群模式下推进消费组协议的单次 poll 时长
const MEMBERSHIP_POLL: Duration = Duration::from_millis(100);

/// 拉模式消费者
///
/// 集群模式订阅 topic 加入消费组，`fetch_owned_queues` 返回组协调器分给本实例的分区。
/// 分配到的分区平时处于暂停状态，`pull` 时 seek 到调用方给出的 offset 并只恢复目标分区。
/// 广播模式使用实例独占的 group id，直接 assign 全部分区。
pub(crate) struct KafkaPullConsumer {
    consumer: Arc<BaseConsumer>,
    options: ClientOptions,
    request_timeout: Duration,
    started: AtomicBool,
    /// 集群模式下已订阅的 topic
    subscribed: Mutex<Option<String>>,
}

impl KafkaPullConsumer {
    pub(crate) fn new(options: &ClientOptions, config: &KafkaBrokerConfig) -> Result<Self> {
        // offset 越界时报错，由拉取循环按 OFFSET_ILLEGAL 处理
        let consumer: BaseConsumer = super::config::consumer_config(options, config, "error")
            .create()
            .map_err(|e| kafka_error(ErrorCode::ConnectionFailed, e))?;
        Ok(Self {
            consumer: Arc::new(consumer),
            options: options.clone(),
            request_timeout: config.request_timeout(),
            started: AtomicBool::new(false),
            subscribed: Mutex::new(None),
        })
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MqError::client_not_started(&self.options.instance_name))
        }
    }

    fn is_clustering(&self) -> bool {
        self.options.message_model == MessageModel::Clustering
    }

    /// 加入消费组并返回当前分到的分区
    async fn assigned_partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let subscribe = {
            let mut subscribed = lock(&self.subscribed);
            if subscribed.as_deref() == Some(topic) {
                false
            } else {
                *subscribed = Some(topic.to_string());
                true
            }
        };

        let consumer = self.consumer.clone();
        let name = topic.to_string();
        let assigned = run_blocking(ErrorCode::RebalanceFailed, move || {
            if subscribe {
                consumer.subscribe(&[name.as_str()])?;
            }
            // 重平衡在 poll 中完成；这里拿到的消息不提交，pull 会按位点重新读取
            if let Some(Err(err)) = consumer.poll(MEMBERSHIP_POLL) {
                return Err(err);
            }
            let assignment = consumer.assignment()?;
            if assignment.count() > 0 {
                consumer.pause(&assignment)?;
            }
            Ok(assignment
                .elements_for_topic(&name)
                .iter()
                .map(|elem| elem.partition())
                .collect::<Vec<i32>>())
        })
        .await;

        if assigned.is_err() && subscribe {
            *lock(&self.subscribed) = None;
        }
        assigned
    }

    async fn all_partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let consumer = self.consumer.clone();
        let name = topic.to_string();
        let timeout = self.request_timeout;
        run_blocking(ErrorCode::RebalanceFailed, move || {
            let metadata = consumer.fetch_metadata(Some(name.as_str()), timeout)?;
            Ok(metadata
                .topics()
                .iter()
                .filter(|t| t.name() == name)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect::<Vec<i32>>())
        })
        .await
    }
}

#[async_trait]
impl PullConsumerClient for KafkaPullConsumer {
    fn group(&self) -> &str {
        &self.options.group
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        info!(
            group = %self.options.group,
            instance = %self.options.instance_name,
            model = ?self.options.message_model,
            "Kafka pull consumer started"
        );
        Ok(())
    }

    async fn fetch_owned_queues(&self, topic: &str) -> Result<Vec<QueueId>> {
        self.ensure_started()?;
        let partitions = if self.is_clustering() {
            self.assigned_partitions(topic).await?
        } else {
            self.all_partitions(topic).await?
        };

        Ok(partitions
            .into_iter()
            .filter(|id| *id >= 0)
            .map(|id| QueueId::new(topic, KAFKA_BROKER_NAME, id as u32))
            .collect())
    }

    async fn read_committed_offset(&self, queue: &QueueId) -> Result<i64> {
        self.ensure_started()?;
        let consumer = self.consumer.clone();
        let topic = queue.topic.clone();
        let partition = partition_of(queue);
        let timeout = self.request_timeout;
        run_blocking(ErrorCode::OffsetReadFailed, move || {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition(&topic, partition);
            let committed = consumer.committed_offsets(tpl, timeout)?;
            Ok(match committed.find_partition(&topic, partition).map(|e| e.offset()) {
                Some(Offset::Offset(offset)) => offset,
                _ => -1,
            })
        })
        .await
    }

    async fn pull(&self, queue: &QueueId, offset: i64, max_count: usize) -> Result<PullResult> {
        self.ensure_started()?;
        let consumer = self.consumer.clone();
        let topic = queue.topic.clone();
        let partition = partition_of(queue);
        let pull_timeout = self.options.pull_timeout;
        let request_timeout = self.request_timeout;
        let clustering = self.is_clustering();

        run_blocking(ErrorCode::PullFailed, move || {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&topic, partition, Offset::Offset(offset))?;
            if !clustering {
                consumer.assign(&tpl)?;
                return poll_batch(&consumer, &topic, partition, offset, max_count, pull_timeout, request_timeout);
            }

            // 上次发现队列之后分区可能已被重平衡到其他实例
            if consumer.assignment()?.find_partition(&topic, partition).is_none() {
                debug!(topic = %topic, partition, "Partition no longer assigned, skipping pull");
                return Ok(PullResult::empty(PullStatus::NoNewMsg, offset));
            }
            consumer.seek(&topic, partition, Offset::Offset(offset), request_timeout)?;
            consumer.resume(&tpl)?;
            let batch = poll_batch(&consumer, &topic, partition, offset, max_count, pull_timeout, request_timeout);
            consumer.pause(&tpl)?;
            batch
        })
        .await
    }

    async fn commit_offset(&self, queue: &QueueId, offset: i64) -> Result<()> {
        self.ensure_started()?;
        let consumer = self.consumer.clone();
        let topic = queue.topic.clone();
        let partition = partition_of(queue);
        run_blocking(ErrorCode::OffsetCommitFailed, move || {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&topic, partition, Offset::Offset(offset))?;
            consumer.commit(&tpl, CommitMode::Sync)
        })
        .await
    }

    async fn shutdown(&self) {
        if self.started.swap(false, Ordering::AcqRel) {
            if lock(&self.subscribed).take().is_some() {
                self.consumer.unsubscribe();
            } else if let Err(e) = self.consumer.unassign() {
                warn!(group = %self.options.group, error = %e, "Failed to unassign Kafka partitions");
            }
            info!(group = %self.options.group, "Kafka pull consumer stopped");
        }
    }
}

/// 从 `offset` 起读取目标分区，凑满 `max_count` 或超时返回
///
/// 其他分区的消息直接丢弃，下次拉取它们时会重新 seek。
fn poll_batch(
    consumer: &BaseConsumer,
    topic: &str,
    partition: i32,
    offset: i64,
    max_count: usize,
    pull_timeout: Duration,
    request_timeout: Duration,
) -> KafkaResult<PullResult> {
    let deadline = Instant::now() + pull_timeout;
    let mut messages: Vec<RawMessage> = Vec::new();
    while messages.len() < max_count {
        let mut remaining = deadline.saturating_duration_since(Instant::now());
        if !messages.is_empty() {
            remaining = remaining.min(BATCH_LINGER);
        }
        if remaining.is_zero() {
            break;
        }
        match consumer.poll(remaining) {
            None => break,
            Some(Ok(message)) => {
                if message.topic() == topic && message.partition() == partition {
                    messages.push(to_raw_message(&message));
                }
            }
            Some(Err(err)) if is_offset_out_of_range(&err) => {
                let (low, high) = consumer.fetch_watermarks(topic, partition, request_timeout)?;
                let next = if offset < low { low } else { high };
                return Ok(PullResult::empty(PullStatus::OffsetIllegal, next).with_range(low, high));
            }
            Some(Err(err)) => return Err(err),
        }
    }

    Ok(match messages.last() {
        Some(last) => {
            let next = last.queue_offset + 1;
            PullResult::found(messages, next)
        }
        None => PullResult::empty(PullStatus::NoNewMsg, offset),
    })
}

fn is_offset_out_of_range(err: &KafkaError) -> bool {
    err.rdkafka_error_code() == Some(RDKafkaErrorCode::OffsetOutOfRange)
}

// -------- Push Consumer --------

pub(crate) struct KafkaPushConsumer {
    consumer: Arc<StreamConsumer>,
    producer: Arc<DeliveryProducer>,
    options: ClientOptions,
    config: KafkaBrokerConfig,
    subscriptions: Mutex<Vec<(String, SubscriptionExpression)>>,
    listener: Mutex<Option<(ConsumeMode, Arc<dyn MessageListener>)>>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaPushConsumer {
    pub(crate) fn new(
        options: &ClientOptions,
        config: &KafkaBrokerConfig,
        producer: DeliveryProducer,
    ) -> Result<Self> {
        let consumer: StreamConsumer =
            super::config::consumer_config(options, config, &config.auto_offset_reset)
                .create()
                .map_err(|e| kafka_error(ErrorCode::ConnectionFailed, e))?;
        Ok(Self {
            consumer: Arc::new(consumer),
            producer: Arc::new(producer),
            options: options.clone(),
            config: config.clone(),
            subscriptions: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            token: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PushConsumerClient for KafkaPushConsumer {
    fn group(&self) -> &str {
        &self.options.group
    }

    async fn subscribe(&self, topic: &str, expression: &SubscriptionExpression) -> Result<()> {
        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.retain(|(t, _)| t != topic);
        subscriptions.push((topic.to_string(), expression.clone()));
        Ok(())
    }

    fn register_listener(&self, mode: ConsumeMode, listener: Arc<dyn MessageListener>) {
        *lock(&self.listener) = Some((mode, listener));
    }

    async fn start(&self) -> Result<()> {
        let Some((mode, listener)) = lock(&self.listener).clone() else {
            return Err(MqError::broker(ErrorCode::SubscribeFailed, "no message listener registered"));
        };
        let subscriptions = lock(&self.subscriptions).clone();
        if subscriptions.is_empty() {
            return Err(MqError::broker(ErrorCode::SubscribeFailed, "no topic subscribed"));
        }

        let topics: Vec<&str> = subscriptions.iter().map(|(t, _)| t.as_str()).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| kafka_error(ErrorCode::SubscribeFailed, e))?;
        info!(group = %self.options.group, topics = ?topics, "Successfully subscribed to Kafka topics");

        let delivery = Delivery {
            consumer: self.consumer.clone(),
            producer: self.producer.clone(),
            group: self.options.group.clone(),
            subscriptions: subscriptions.into_iter().collect(),
            mode,
            listener,
            request_timeout: self.config.request_timeout(),
            suspend_interval: self.config.suspend_interval(),
            suspended: HashMap::new(),
        };
        let token = self.token.clone();
        *lock(&self.worker) = Some(tokio::spawn(delivery.run(token)));
        Ok(())
    }

    async fn shutdown(&self) {
        self.token.cancel();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(group = %self.options.group, error = %e, "Kafka delivery task failed");
            }
            self.consumer.unsubscribe();
            info!(group = %self.options.group, "Kafka push consumer stopped");
        }
    }
}

/// 推模式后台投递循环
struct Delivery {
    consumer: Arc<StreamConsumer>,
    producer: Arc<DeliveryProducer>,
    group: String,
    subscriptions: HashMap<String, SubscriptionExpression>,
    mode: ConsumeMode,
    listener: Arc<dyn MessageListener>,
    request_timeout: Duration,
    suspend_interval: Duration,
    /// 顺序消费失败后本地累计的重投递次数
    suspended: HashMap<(QueueId, i64), u32>,
}

impl Delivery {
    async fn run(mut self, token: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = self.consumer.recv() => received.map(|message| {
                    let queue = QueueId::new(message.topic(), KAFKA_BROKER_NAME, message.partition().max(0) as u32);
                    (queue, to_raw_message(&message))
                }),
            };

            let (queue, mut message) = match received {
                Ok(received) => received,
                Err(err) => {
                    error!(group = %self.group, error = %err, "Error receiving Kafka message");
                    if sleep_or_cancel(self.suspend_interval, &token).await {
                        break;
                    }
                    continue;
                }
            };

            let filtered = self
                .subscriptions
                .get(&queue.topic)
                .is_some_and(|expression| !expression.matches(&message.tags));
            if filtered {
                debug!(queue = %queue, tags = %message.tags, "Message filtered by tag");
                self.commit(&queue, message.queue_offset + 1);
                continue;
            }

            let key = (queue.clone(), message.queue_offset);
            if let Some(extra) = self.suspended.get(&key) {
                message.reconsume_count += extra;
            }

            let context = ConsumeContext {
                queue: queue.clone(),
                mode: self.mode,
            };
            let status = self.listener.consume(&context, vec![message.clone()]).await;
            match status {
                ConsumeStatus::Success => {
                    self.suspended.remove(&key);
                    self.commit(&queue, message.queue_offset + 1);
                }
                ConsumeStatus::ReconsumeLater => {
                    self.suspended.remove(&key);
                    if self.requeue(&message).await {
                        self.commit(&queue, message.queue_offset + 1);
                    } else if self.rewind(&queue, message.queue_offset, &token).await {
                        break;
                    }
                }
                ConsumeStatus::SuspendCurrentQueue => {
                    *self.suspended.entry(key).or_insert(0) += 1;
                    if self.rewind(&queue, message.queue_offset, &token).await {
                        break;
                    }
                }
            }
        }
        debug!(group = %self.group, "Kafka delivery loop exited");
    }

    /// 以递增后的重投递次数重新发送到原 topic
    async fn requeue(&self, message: &RawMessage) -> bool {
        let outgoing = OutgoingMessage {
            topic: message.topic.clone(),
            tag: (!message.tags.is_empty()).then(|| message.tags.clone()),
            key: (!message.keys.is_empty()).then(|| message.keys.clone()),
            body: message.body.clone(),
        };
        match send_record(&self.producer, &outgoing, message.reconsume_count + 1).await {
            Ok(_) => true,
            Err(err) => {
                warn!(msg_id = %message.id, error = %err, "Failed to requeue message, rewinding partition");
                false
            }
        }
    }

    /// 暂停后回退到失败消息，返回是否收到关闭信号
    async fn rewind(&self, queue: &QueueId, offset: i64, token: &CancellationToken) -> bool {
        if sleep_or_cancel(self.suspend_interval, token).await {
            return true;
        }
        if let Err(e) = self.consumer.seek(
            &queue.topic,
            partition_of(queue),
            Offset::Offset(offset),
            self.request_timeout,
        ) {
            error!(queue = %queue, offset, error = %e, "Failed to rewind Kafka partition");
        }
        false
    }

    fn commit(&self, queue: &QueueId, offset: i64) {
        let mut tpl = TopicPartitionList::new();
        let result = tpl
            .add_partition_offset(&queue.topic, partition_of(queue), Offset::Offset(offset))
            .and_then(|_| self.consumer.commit(&tpl, CommitMode::Async));
        if let Err(e) = result {
            warn!(queue = %queue, offset, error = %e, "Failed to commit Kafka offset");
        }
    }
}

/// 等待一段时间，期间被取消则返回 true
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_consumer(model: MessageModel) -> KafkaPullConsumer {
        let options = ClientOptions::new("orders", "127.0.0.1:9").with_message_model(model);
        KafkaPullConsumer::new(&options, &KafkaBrokerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn pull_before_start_is_rejected() {
        let consumer = pull_consumer(MessageModel::Clustering);
        let queue = QueueId::new("ORDER", KAFKA_BROKER_NAME, 0);

        let err = consumer.pull(&queue, 0, 10).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ClientNotStarted));
    }

    #[tokio::test]
    async fn clustering_pull_skips_partition_not_assigned_to_this_instance() {
        let consumer = pull_consumer(MessageModel::Clustering);
        consumer.start().await.unwrap();
        let queue = QueueId::new("ORDER", KAFKA_BROKER_NAME, 3);

        // 还没有从消费组分到任何分区
        let result = consumer.pull(&queue, 42, 10).await.unwrap();
        assert_eq!(result.status, PullStatus::NoNewMsg);
        assert_eq!(result.next_offset, 42);
        assert!(result.messages.is_empty());

        consumer.shutdown().await;
    }
}
