//! 进程内 broker
//!
//! 完整实现 `BrokerConnector` 边界：按 topic 划分固定数量的队列，
//! 按 (消费组, 队列) 维护 offset（广播模式按实例维护），集群模式下在同组实例间
//! 平均分配队列，推模式下由后台投递任务调用监听器并按返回状态重投递。

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    BrokerConnector, ClientOptions, ConsumeContext, ConsumeMode, ConsumeStatus, MessageListener,
    MessageModel, OutgoingMessage, ProducerClient, PullConsumerClient, PullResult, PullStatus,
    PushConsumerClient, QueueId, RawMessage, SendResult, SubscriptionExpression,
};
use crate::error::{ErrorCode, MqError, Result};

/// 内存 broker 配置
#[derive(Debug, Clone)]
pub struct MemoryBrokerConfig {
    pub broker_name: String,
    /// 每个 topic 的队列数
    pub queues_per_topic: u32,
    /// 推模式每次投递给监听器的最大消息数
    pub consume_batch_size: usize,
    /// 顺序模式下队列被挂起后的等待时间
    pub suspend_interval: Duration,
    /// 推模式无新消息时的最长空闲等待
    pub idle_interval: Duration,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            broker_name: "memory-broker".to_string(),
            queues_per_topic: 4,
            consume_batch_size: 1,
            suspend_interval: Duration::from_secs(1),
            idle_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OffsetKey {
    group: String,
    instance: Option<String>,
    queue: QueueId,
}

#[derive(Debug, Default)]
struct QueueLog {
    min_offset: i64,
    messages: Vec<RawMessage>,
}

impl QueueLog {
    fn max_offset(&self) -> i64 {
        self.min_offset + self.messages.len() as i64
    }
}

struct BrokerState {
    config: MemoryBrokerConfig,
    topics: Mutex<HashMap<String, Vec<QueueLog>>>,
    offsets: Mutex<HashMap<OffsetKey, i64>>,
    members: Mutex<HashMap<(String, String), BTreeSet<String>>>,
    published: watch::Sender<u64>,
    sequence: AtomicU64,
    next_queue: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BrokerState {
    fn queue_ids(&self, topic: &str) -> Vec<QueueId> {
        self.ensure_topic(topic);
        (0..self.config.queues_per_topic)
            .map(|id| QueueId::new(topic, self.config.broker_name.clone(), id))
            .collect()
    }

    fn ensure_topic(&self, topic: &str) {
        let mut topics = lock(&self.topics);
        topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.config.queues_per_topic)
                .map(|_| QueueLog::default())
                .collect()
        });
    }

    fn append(&self, queue: &QueueId, mut message: RawMessage) -> Result<i64> {
        let offset = {
            let mut topics = lock(&self.topics);
            let log = topics
                .get_mut(&queue.topic)
                .and_then(|queues| queues.get_mut(queue.queue_id as usize))
                .ok_or_else(|| unknown_queue(queue))?;
            let offset = log.max_offset();
            message.queue_offset = offset;
            log.messages.push(message);
            offset
        };
        self.published.send_modify(|version| *version += 1);
        Ok(offset)
    }

    fn publish(&self, message: OutgoingMessage) -> Result<SendResult> {
        let queues = self.queue_ids(&message.topic);
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % queues.len().max(1);
        let queue = queues
            .into_iter()
            .nth(index)
            .ok_or_else(|| MqError::message_send_failed("topic has no queues"))?;
        let msg_id = format!(
            "{}-{:016X}",
            self.config.broker_name,
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        let raw = RawMessage::new(msg_id.clone(), message.topic, message.body)
            .with_keys(message.key.unwrap_or_default())
            .with_tags(message.tag.unwrap_or_default());
        let queue_offset = self.append(&queue, raw)?;
        Ok(SendResult {
            msg_id,
            queue,
            queue_offset,
        })
    }

    /// 非阻塞拉取；没有新消息时返回 `NoNewMsg`
    fn try_pull(
        &self,
        queue: &QueueId,
        offset: i64,
        max_count: usize,
        filter: Option<&SubscriptionExpression>,
    ) -> Result<PullResult> {
        let topics = lock(&self.topics);
        let log = topics
            .get(&queue.topic)
            .and_then(|queues| queues.get(queue.queue_id as usize))
            .ok_or_else(|| unknown_queue(queue))?;
        let (min, max) = (log.min_offset, log.max_offset());

        if offset < min || offset > max {
            return Ok(PullResult::empty(PullStatus::OffsetIllegal, offset.clamp(min, max))
                .with_range(min, max));
        }
        if offset == max {
            return Ok(PullResult::empty(PullStatus::NoNewMsg, offset).with_range(min, max));
        }

        let start = (offset - min) as usize;
        let end = (start + max_count.max(1)).min(log.messages.len());
        let window = &log.messages[start..end];
        let next_offset = offset + window.len() as i64;
        let found: Vec<RawMessage> = window
            .iter()
            .filter(|m| filter.map(|f| f.matches(&m.tags)).unwrap_or(true))
            .cloned()
            .collect();

        let result = if found.is_empty() {
            PullResult::empty(PullStatus::NoMatchedMsg, next_offset)
        } else {
            PullResult::found(found, next_offset)
        };
        Ok(result.with_range(min, max))
    }

    /// 阻塞拉取，最多等待 `wait`
    async fn pull(
        &self,
        queue: &QueueId,
        offset: i64,
        max_count: usize,
        wait: Duration,
    ) -> Result<PullResult> {
        let deadline = Instant::now() + wait;
        let mut published = self.published.subscribe();
        loop {
            let result = self.try_pull(queue, offset, max_count, None)?;
            if result.status != PullStatus::NoNewMsg {
                return Ok(result);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(result);
            }
            match tokio::time::timeout(remaining, published.changed()).await {
                Ok(Ok(())) => continue,
                _ => return Ok(result),
            }
        }
    }

    fn offset_key(&self, options: &ClientOptions, queue: &QueueId) -> OffsetKey {
        OffsetKey {
            group: options.group.clone(),
            instance: match options.message_model {
                MessageModel::Clustering => None,
                MessageModel::Broadcasting => Some(options.instance_name.clone()),
            },
            queue: queue.clone(),
        }
    }

    fn read_offset(&self, key: &OffsetKey) -> i64 {
        lock(&self.offsets).get(key).copied().unwrap_or(-1)
    }

    fn commit_offset(&self, key: OffsetKey, offset: i64) {
        lock(&self.offsets).insert(key, offset);
    }

    fn join(&self, group: &str, topic: &str, instance: &str) {
        self.ensure_topic(topic);
        lock(&self.members)
            .entry((group.to_string(), topic.to_string()))
            .or_default()
            .insert(instance.to_string());
    }

    fn leave(&self, group: &str, instance: &str) {
        let mut members = lock(&self.members);
        for ((member_group, _), instances) in members.iter_mut() {
            if member_group == group {
                instances.remove(instance);
            }
        }
    }

    /// 队列分配：集群模式按实例名排序后取模平均分配，广播模式分配全部队列
    fn allocate(&self, options: &ClientOptions, topic: &str) -> Vec<QueueId> {
        let queues = self.queue_ids(topic);
        if options.message_model == MessageModel::Broadcasting {
            return queues;
        }
        let members = lock(&self.members);
        let Some(instances) = members.get(&(options.group.clone(), topic.to_string())) else {
            return Vec::new();
        };
        let Some(index) = instances.iter().position(|i| *i == options.instance_name) else {
            return Vec::new();
        };
        let count = instances.len();
        queues
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % count == index)
            .map(|(_, queue)| queue)
            .collect()
    }

    /// 重新追加到队列尾部，重投递次数加一
    fn requeue(&self, queue: &QueueId, message: RawMessage) -> Result<i64> {
        let reconsume_count = message.reconsume_count.saturating_add(1);
        self.append(queue, message.with_reconsume_count(reconsume_count))
    }

    /// 原位增加重投递次数（顺序模式挂起队列时使用）
    fn bump_reconsume(&self, queue: &QueueId, offsets: &[i64]) {
        let mut topics = lock(&self.topics);
        if let Some(log) = topics
            .get_mut(&queue.topic)
            .and_then(|queues| queues.get_mut(queue.queue_id as usize))
        {
            let min = log.min_offset;
            for offset in offsets {
                if let Some(message) = log.messages.get_mut((offset - min) as usize) {
                    message.reconsume_count = message.reconsume_count.saturating_add(1);
                }
            }
        }
    }
}

fn unknown_queue(queue: &QueueId) -> MqError {
    MqError::broker(ErrorCode::PullFailed, format!("unknown queue {}", queue))
}

/// 进程内 broker
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_config(MemoryBrokerConfig::default())
    }

    pub fn with_config(config: MemoryBrokerConfig) -> Self {
        let (published, _) = watch::channel(0);
        Self {
            state: Arc::new(BrokerState {
                config,
                topics: Mutex::new(HashMap::new()),
                offsets: Mutex::new(HashMap::new()),
                members: Mutex::new(HashMap::new()),
                published,
                sequence: AtomicU64::new(0),
                next_queue: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &MemoryBrokerConfig {
        &self.state.config
    }

    /// 直接向 topic 发送消息（按轮询选择队列）
    pub fn publish(
        &self,
        topic: &str,
        tag: Option<&str>,
        key: Option<&str>,
        body: impl Into<Vec<u8>>,
    ) -> Result<SendResult> {
        self.state.publish(OutgoingMessage {
            topic: topic.to_string(),
            tag: tag.map(str::to_string),
            key: key.map(str::to_string),
            body: body.into(),
        })
    }

    /// 向指定队列追加消息
    pub fn publish_to_queue(&self, queue: &QueueId, message: RawMessage) -> Result<i64> {
        self.state.ensure_topic(&queue.topic);
        self.state.append(queue, message)
    }

    pub fn queue_ids(&self, topic: &str) -> Vec<QueueId> {
        self.state.queue_ids(topic)
    }

    /// 集群模式下某消费组在队列上已提交的 offset
    pub fn committed_offset(&self, group: &str, queue: &QueueId) -> Option<i64> {
        let key = OffsetKey {
            group: group.to_string(),
            instance: None,
            queue: queue.clone(),
        };
        lock(&self.state.offsets).get(&key).copied()
    }

    /// 丢弃 `before` 之前的消息（模拟过期清理）
    pub fn truncate(&self, queue: &QueueId, before: i64) {
        let mut topics = lock(&self.state.topics);
        if let Some(log) = topics
            .get_mut(&queue.topic)
            .and_then(|queues| queues.get_mut(queue.queue_id as usize))
        {
            let drop_count = (before - log.min_offset).clamp(0, log.messages.len() as i64);
            log.messages.drain(..drop_count as usize);
            log.min_offset += drop_count;
        }
    }

    /// topic 中所有队列的消息总数（包含重投递追加的消息）
    pub fn message_count(&self, topic: &str) -> usize {
        lock(&self.state.topics)
            .get(topic)
            .map(|queues| queues.iter().map(|q| q.messages.len()).sum())
            .unwrap_or(0)
    }
}

impl BrokerConnector for MemoryBroker {
    fn create_push_consumer(&self, options: &ClientOptions) -> Result<Arc<dyn PushConsumerClient>> {
        Ok(Arc::new(MemoryPushConsumer {
            state: self.state.clone(),
            options: options.clone(),
            subscriptions: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            token: CancellationToken::new(),
            worker: Mutex::new(None),
        }))
    }

    fn create_pull_consumer(&self, options: &ClientOptions) -> Result<Arc<dyn PullConsumerClient>> {
        Ok(Arc::new(MemoryPullConsumer {
            state: self.state.clone(),
            options: options.clone(),
            started: AtomicBool::new(false),
        }))
    }

    fn create_producer(&self, options: &ClientOptions) -> Result<Arc<dyn ProducerClient>> {
        Ok(Arc::new(MemoryProducer {
            state: self.state.clone(),
            options: options.clone(),
            started: AtomicBool::new(false),
        }))
    }
}

// -------- Pull Consumer --------

struct MemoryPullConsumer {
    state: Arc<BrokerState>,
    options: ClientOptions,
    started: AtomicBool,
}

impl MemoryPullConsumer {
    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MqError::client_not_started(&self.options.instance_name))
        }
    }
}

#[async_trait]
impl PullConsumerClient for MemoryPullConsumer {
    fn group(&self) -> &str {
        &self.options.group
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        debug!(group = %self.options.group, instance = %self.options.instance_name, "Memory pull consumer started");
        Ok(())
    }

    async fn fetch_owned_queues(&self, topic: &str) -> Result<Vec<QueueId>> {
        self.ensure_started()?;
        self.state
            .join(&self.options.group, topic, &self.options.instance_name);
        Ok(self.state.allocate(&self.options, topic))
    }

    async fn read_committed_offset(&self, queue: &QueueId) -> Result<i64> {
        self.ensure_started()?;
        Ok(self.state.read_offset(&self.state.offset_key(&self.options, queue)))
    }

    async fn pull(&self, queue: &QueueId, offset: i64, max_count: usize) -> Result<PullResult> {
        self.ensure_started()?;
        self.state
            .pull(queue, offset, max_count, self.options.pull_timeout)
            .await
    }

    async fn commit_offset(&self, queue: &QueueId, offset: i64) -> Result<()> {
        self.ensure_started()?;
        self.state
            .commit_offset(self.state.offset_key(&self.options, queue), offset);
        Ok(())
    }

    async fn shutdown(&self) {
        self.started.store(false, Ordering::Release);
        self.state
            .leave(&self.options.group, &self.options.instance_name);
    }
}

// -------- Push Consumer --------

struct MemoryPushConsumer {
    state: Arc<BrokerState>,
    options: ClientOptions,
    subscriptions: Mutex<Vec<(String, SubscriptionExpression)>>,
    listener: Mutex<Option<(ConsumeMode, Arc<dyn MessageListener>)>>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PushConsumerClient for MemoryPushConsumer {
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
        let (mode, listener) = lock(&self.listener).clone().ok_or_else(|| {
            MqError::broker(ErrorCode::SubscribeFailed, "no message listener registered")
        })?;
        let subscriptions = lock(&self.subscriptions).clone();
        if subscriptions.is_empty() {
            return Err(MqError::broker(ErrorCode::SubscribeFailed, "no topic subscribed"));
        }
        for (topic, _) in &subscriptions {
            self.state
                .join(&self.options.group, topic, &self.options.instance_name);
        }

        let delivery = Delivery {
            state: self.state.clone(),
            options: self.options.clone(),
            subscriptions,
            mode,
            listener,
            token: self.token.clone(),
        };
        *lock(&self.worker) = Some(tokio::spawn(delivery.run()));
        info!(group = %self.options.group, mode = %mode, "Memory push consumer started");
        Ok(())
    }

    async fn shutdown(&self) {
        self.token.cancel();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Push delivery task ended abnormally");
            }
        }
        self.state
            .leave(&self.options.group, &self.options.instance_name);
    }
}

/// 推模式后台投递任务
///
/// 每一轮对每个持有的队列最多投递一批，同一轮内不同队列并行，
/// 整轮结束后再进入下一轮，因此同一队列的批次总是串行的。
struct Delivery {
    state: Arc<BrokerState>,
    options: ClientOptions,
    subscriptions: Vec<(String, SubscriptionExpression)>,
    mode: ConsumeMode,
    listener: Arc<dyn MessageListener>,
    token: CancellationToken,
}

struct InFlight {
    queue: QueueId,
    next_offset: i64,
    messages: Vec<RawMessage>,
    status: ConsumeStatus,
}

impl Delivery {
    async fn run(self) {
        let mut published = self.state.published.subscribe();
        while !self.token.is_cancelled() {
            published.borrow_and_update();
            let mut in_flight = JoinSet::new();

            for (topic, expression) in &self.subscriptions {
                for queue in self.state.allocate(&self.options, topic) {
                    let key = self.state.offset_key(&self.options, &queue);
                    let offset = self.state.read_offset(&key).max(0);
                    let result = match self.state.try_pull(
                        &queue,
                        offset,
                        self.state.config.consume_batch_size,
                        Some(expression),
                    ) {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(error = %e, queue = %queue, "Push delivery pull failed");
                            continue;
                        }
                    };
                    match result.status {
                        PullStatus::Found => {
                            let listener = self.listener.clone();
                            let context = ConsumeContext {
                                queue: queue.clone(),
                                mode: self.mode,
                            };
                            in_flight.spawn(async move {
                                let status =
                                    listener.consume(&context, result.messages.clone()).await;
                                InFlight {
                                    queue: context.queue,
                                    next_offset: result.next_offset,
                                    messages: result.messages,
                                    status,
                                }
                            });
                        }
                        PullStatus::NoMatchedMsg | PullStatus::OffsetIllegal => {
                            self.state.commit_offset(key, result.next_offset);
                        }
                        PullStatus::NoNewMsg => {}
                    }
                }
            }

            let delivered = !in_flight.is_empty();
            let mut suspended = false;
            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok(done) => suspended |= self.settle(done),
                    Err(e) => warn!(error = %e, "Message listener panicked"),
                }
            }

            if suspended {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = tokio::time::sleep(self.state.config.suspend_interval) => {}
                }
            } else if !delivered {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = tokio::time::timeout(self.state.config.idle_interval, published.changed()) => {}
                }
            }
        }
        debug!(group = %self.options.group, "Push delivery stopped");
    }

    /// 根据监听器返回的状态提交或重投递，返回队列是否被挂起
    fn settle(&self, done: InFlight) -> bool {
        let key = self.state.offset_key(&self.options, &done.queue);
        match done.status {
            ConsumeStatus::Success => {
                self.state.commit_offset(key, done.next_offset);
                false
            }
            ConsumeStatus::ReconsumeLater => {
                for message in done.messages {
                    if let Err(e) = self.state.requeue(&done.queue, message) {
                        warn!(error = %e, queue = %done.queue, "Failed to requeue message");
                    }
                }
                self.state.commit_offset(key, done.next_offset);
                false
            }
            ConsumeStatus::SuspendCurrentQueue => {
                let offsets: Vec<i64> = done.messages.iter().map(|m| m.queue_offset).collect();
                self.state.bump_reconsume(&done.queue, &offsets);
                true
            }
        }
    }
}

// -------- Producer --------

struct MemoryProducer {
    state: Arc<BrokerState>,
    options: ClientOptions,
    started: AtomicBool,
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> Result<SendResult> {
        if !self.started.load(Ordering::Acquire) {
            return Err(MqError::client_not_started(&self.options.group));
        }
        if message.topic.trim().is_empty() {
            return Err(MqError::coded(ErrorCode::TopicNotSpecified, "message topic is empty"));
        }
        self.state.publish(message)
    }

    async fn shutdown(&self) {
        self.started.store(false, Ordering::Release);
    }
}
