//! 推模式投递适配
//!
//! broker 客户端把一批消息连同投递上下文交给 `PushDispatcher`，批内消息按顺序
//! 走处理流水线。业务返回 false 时停止本批并要求 broker 稍后重投递，
//! 重投递的调度（退避、重新入队）由 broker 客户端负责。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::{MessageOutcome, MessageProcessor};
use crate::broker::{ConsumeContext, ConsumeMode, ConsumeStatus, MessageListener, QueueId, RawMessage};

/// 推模式投递适配器
///
/// 顺序模式为每个队列维护一把锁。新队列第一次出现时会顺带清理没有批次
/// 持有或等待的锁，重平衡后不再分配给本实例的队列不会一直占着表项。
pub struct PushDispatcher {
    processor: Arc<dyn MessageProcessor>,
    mode: ConsumeMode,
    queue_locks: Mutex<HashMap<QueueId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PushDispatcher {
    pub fn new(processor: Arc<dyn MessageProcessor>, mode: ConsumeMode) -> Self {
        Self {
            processor,
            mode,
            queue_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ConsumeMode {
        self.mode
    }

    /// 当前持有顺序锁的队列数
    pub fn tracked_queues(&self) -> usize {
        self.queue_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// 处理 broker 投递的一批消息
    ///
    /// 顺序模式下同一队列的批次在这里串行化，即便 broker 客户端并发调用。
    pub async fn dispatch(&self, context: &ConsumeContext, batch: Vec<RawMessage>) -> ConsumeStatus {
        match self.mode {
            ConsumeMode::Concurrent => {
                self.consume_batch(context, &batch, ConsumeStatus::ReconsumeLater)
                    .await
            }
            ConsumeMode::Ordered => {
                let queue_lock = self.queue_lock(&context.queue);
                let _serialized = queue_lock.lock().await;
                self.consume_batch(context, &batch, ConsumeStatus::SuspendCurrentQueue)
                    .await
            }
        }
    }

    async fn consume_batch(
        &self,
        context: &ConsumeContext,
        batch: &[RawMessage],
        on_failure: ConsumeStatus,
    ) -> ConsumeStatus {
        for message in batch {
            if self.processor.handle(message).await == MessageOutcome::Failed {
                warn!(
                    consumer = %self.processor.name(),
                    queue = %context.queue,
                    msg_id = %message.id,
                    reconsume_count = message.reconsume_count,
                    status = ?on_failure,
                    "Message processing failed, batch will be redelivered"
                );
                return on_failure;
            }
        }
        debug!(consumer = %self.processor.name(), queue = %context.queue, size = batch.len(), "Batch consumed");
        ConsumeStatus::Success
    }

    fn queue_lock(&self, queue: &QueueId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .queue_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lock) = locks.get(queue) {
            return lock.clone();
        }
        // 只剩表内引用的锁没有批次在用
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(queue.clone()).or_default().clone()
    }
}

#[async_trait]
impl MessageListener for PushDispatcher {
    async fn consume(&self, context: &ConsumeContext, batch: Vec<RawMessage>) -> ConsumeStatus {
        self.dispatch(context, batch).await
    }
}
