//! 拉模式消费循环
//!
//! 每个拉模式 binding 对应一个 `PullLoopEngine`，由运行时作为后台任务驱动：
//!
//! 1. 发现当前实例分配到的队列
//! 2. 对每个队列读取已提交位点，循环拉取、处理、提交位点
//! 3. 队列中没有新消息（NO_NEW_MSG）时不提交，转到下一个队列
//! 4. 所有队列处理完后重新发现队列，直到收到关闭信号
//!
//! broker 调用失败只会记录日志并退避，业务处理 panic 也会被捕获，都不会让循环退出。

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, error, info, warn};

use super::MessageProcessor;
use crate::broker::{PullConsumerClient, PullStatus, QueueId, RawMessage};
use crate::config::PullSettings;
use crate::error::Result;
use crate::retry::{BackoffPolicy, ExponentialBackoffPolicy};
use crate::runtime::{MessageConsumer, TaskResult};

/// 单次拉取的默认消息数
pub const DEFAULT_PULL_BATCH_SIZE: usize = 10;

/// 单次拉取之后队列的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueProgress {
    /// 位点已提交，继续拉取同一队列
    Advanced,
    /// 没有新消息，换下一个队列
    Drained,
    /// 收到关闭信号
    Stopped,
}

/// 拉模式消费引擎
pub struct PullLoopEngine {
    name: String,
    topic: String,
    client: Arc<dyn PullConsumerClient>,
    processor: Arc<dyn MessageProcessor>,
    batch_size: usize,
    idle_interval: Duration,
    backoff: Arc<dyn BackoffPolicy>,
}

impl PullLoopEngine {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        client: Arc<dyn PullConsumerClient>,
        processor: Arc<dyn MessageProcessor>,
    ) -> Self {
        Self::with_settings(name, topic, client, processor, &PullSettings::default())
    }

    pub fn with_settings(
        name: impl Into<String>,
        topic: impl Into<String>,
        client: Arc<dyn PullConsumerClient>,
        processor: Arc<dyn MessageProcessor>,
        settings: &PullSettings,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            client,
            processor,
            batch_size: settings.batch_size.max(1),
            idle_interval: settings.idle_interval(),
            backoff: Arc::new(ExponentialBackoffPolicy::new(
                settings.error_backoff_base(),
                settings.error_backoff_max(),
            )),
        }
    }

    /// 替换错误退避策略
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 运行消费循环，直到收到关闭信号（或信号发送端被丢弃）
    ///
    /// 退出前关闭 broker 客户端。
    pub async fn run(&self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(consumer = %self.name, topic = %self.topic, group = %self.client.group(), "Pull loop started");

        let mut failures = 0usize;
        while !stop_requested(&mut shutdown_rx) {
            match self.poll_owned_queues(&mut shutdown_rx).await {
                Ok(true) => break,
                Ok(false) => failures = 0,
                Err(err) => {
                    error!(
                        consumer = %self.name,
                        topic = %self.topic,
                        error = %err,
                        "start pull consumer fail"
                    );
                    self.processor.metrics().record_error().await;
                    let delay = self.backoff.backoff_duration(failures);
                    failures = failures.saturating_add(1);
                    if pause(delay, &mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        self.client.shutdown().await;
        info!(consumer = %self.name, topic = %self.topic, "Pull loop stopped");
    }

    /// 处理一轮分配到的队列，返回是否收到关闭信号
    async fn poll_owned_queues(&self, shutdown_rx: &mut oneshot::Receiver<()>) -> Result<bool> {
        let queues = self.client.fetch_owned_queues(&self.topic).await?;
        if queues.is_empty() {
            debug!(consumer = %self.name, topic = %self.topic, "No queue assigned, waiting");
            return Ok(pause(self.idle_interval, shutdown_rx).await);
        }

        for queue in &queues {
            if self.drain_queue(queue, shutdown_rx).await {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 持续拉取单个队列直到没有新消息，返回是否收到关闭信号
    async fn drain_queue(&self, queue: &QueueId, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
        let mut failures = 0usize;
        loop {
            if stop_requested(shutdown_rx) {
                return true;
            }
            match self.pull_once(queue, shutdown_rx).await {
                Ok(QueueProgress::Advanced) => failures = 0,
                Ok(QueueProgress::Drained) => return false,
                Ok(QueueProgress::Stopped) => return true,
                Err(err) => {
                    error!(
                        consumer = %self.name,
                        queue = %queue,
                        error = %err,
                        "consume message fail"
                    );
                    self.processor.metrics().record_error().await;
                    let delay = self.backoff.backoff_duration(failures);
                    failures = failures.saturating_add(1);
                    if pause(delay, shutdown_rx).await {
                        return true;
                    }
                }
            }
        }
    }

    async fn pull_once(
        &self,
        queue: &QueueId,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> Result<QueueProgress> {
        let offset = self.client.read_committed_offset(queue).await?.max(0);

        let result = tokio::select! {
            biased;
            _ = &mut *shutdown_rx => return Ok(QueueProgress::Stopped),
            result = self.client.pull(queue, offset, self.batch_size) => result?,
        };
        let metrics = self.processor.metrics();
        metrics.record_pull(result.status).await;

        match result.status {
            PullStatus::Found => {
                debug!(
                    consumer = %self.name,
                    queue = %queue,
                    offset,
                    size = result.messages.len(),
                    "Pulled messages"
                );
                // 拉模式下处理结果不影响位点推进
                for message in &result.messages {
                    self.handle_message(queue, message).await;
                }
            }
            PullStatus::NoMatchedMsg => {}
            PullStatus::OffsetIllegal => {
                warn!(
                    consumer = %self.name,
                    queue = %queue,
                    offset,
                    next_offset = result.next_offset,
                    min_offset = result.min_offset,
                    max_offset = result.max_offset,
                    "Pull offset illegal, committing broker next offset (no reset)"
                );
            }
            PullStatus::NoNewMsg => return Ok(QueueProgress::Drained),
        }

        self.client.commit_offset(queue, result.next_offset).await?;
        metrics.record_commit().await;
        Ok(QueueProgress::Advanced)
    }

    /// 处理单条消息，业务 panic 按错误计数后继续
    async fn handle_message(&self, queue: &QueueId, message: &RawMessage) {
        let handled = AssertUnwindSafe(self.processor.handle(message))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            error!(
                consumer = %self.name,
                queue = %queue,
                msg_id = %message.id,
                error = %panic_message(&*panic),
                "consume message fail"
            );
            self.processor.metrics().record_error().await;
        }
    }
}

impl MessageConsumer for PullLoopEngine {
    fn consume(
        &self,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn std::future::Future<Output = TaskResult> + Send + '_>> {
        Box::pin(async move {
            self.run(shutdown_rx).await;
            Ok(())
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("handler panicked")
}

/// 已收到关闭信号或发送端已丢弃
fn stop_requested(shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}

/// 等待一段时间，期间收到关闭信号则返回 true
async fn pause(duration: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = &mut *shutdown_rx => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
