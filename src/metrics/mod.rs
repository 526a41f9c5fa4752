//! 消费指标收集模块

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::broker::PullStatus;
use crate::consumer::MessageOutcome;

/// 单个消费者 binding 的指标数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    /// 业务处理返回成功
    pub processed: u64,
    /// 业务处理返回失败
    pub failed: u64,
    /// 达到重试上限被丢弃
    pub discarded: u64,
    /// 消息体为空或解码失败被跳过
    pub skipped: u64,
    pub pulls_found: u64,
    pub pulls_empty: u64,
    pub offset_illegal: u64,
    pub commits: u64,
    /// 被捕获并记录的运行期错误
    pub errors: u64,
}

/// 指标收集器
#[derive(Clone, Default)]
pub struct ConsumeMetrics {
    stats: Arc<RwLock<ConsumeStats>>,
}

impl ConsumeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_outcome(&self, outcome: MessageOutcome) {
        let mut stats = self.stats.write().await;
        match outcome {
            MessageOutcome::Processed => stats.processed += 1,
            MessageOutcome::Failed => stats.failed += 1,
            MessageOutcome::Discarded => stats.discarded += 1,
            MessageOutcome::Skipped => stats.skipped += 1,
        }
    }

    pub async fn record_pull(&self, status: PullStatus) {
        let mut stats = self.stats.write().await;
        match status {
            PullStatus::Found => stats.pulls_found += 1,
            PullStatus::OffsetIllegal => stats.offset_illegal += 1,
            PullStatus::NoNewMsg | PullStatus::NoMatchedMsg => stats.pulls_empty += 1,
        }
    }

    pub async fn record_commit(&self) {
        self.stats.write().await.commits += 1;
    }

    pub async fn record_error(&self) {
        self.stats.write().await.errors += 1;
    }

    pub async fn snapshot(&self) -> ConsumeStats {
        self.stats.read().await.clone()
    }
}

/// 按消费者名称索引的指标注册表
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    consumers: Arc<std::sync::RwLock<HashMap<String, ConsumeMetrics>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或取回已注册的）消费者指标
    pub fn register(&self, consumer: &str) -> ConsumeMetrics {
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        consumers.entry(consumer.to_string()).or_default().clone()
    }

    pub fn get(&self, consumer: &str) -> Option<ConsumeMetrics> {
        self.consumers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(consumer)
            .cloned()
    }

    pub async fn snapshot(&self, consumer: &str) -> Option<ConsumeStats> {
        match self.get(consumer) {
            Some(metrics) => Some(metrics.snapshot().await),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_returns_shared_collectors() {
        let registry = MetricsRegistry::new();
        let first = registry.register("orders");
        tokio_test::block_on(first.record_outcome(MessageOutcome::Discarded));

        let stats = tokio_test::block_on(registry.snapshot("orders")).unwrap();
        assert_eq!(stats.discarded, 1);
        assert!(tokio_test::block_on(registry.snapshot("missing")).is_none());
    }
}
