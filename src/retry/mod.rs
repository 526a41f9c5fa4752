//! 重试模块
//!
//! - `RetryGuard`：根据 broker 维护的重投递次数决定消息是否直接丢弃
//! - `BackoffPolicy`：拉取循环在 broker 调用失败后的退避策略

pub mod exponential;
pub mod fixed;

pub use exponential::ExponentialBackoffPolicy;
pub use fixed::FixedBackoffPolicy;

use std::time::Duration;

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 重试上限熔断
///
/// 重投递次数达到上限的消息不再交给业务处理，记录错误日志后按"消费成功"确认，
/// broker 据此停止重投递。阈值按 binding 配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryGuard {
    max_retries: u32,
}

impl RetryGuard {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// 是否应丢弃该消息
    #[inline]
    pub fn should_discard(&self, reconsume_count: u32) -> bool {
        reconsume_count >= self.max_retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for RetryGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// 退避策略 trait
pub trait BackoffPolicy: Send + Sync {
    /// 第 `attempt` 次连续失败后的等待时间（从 0 开始计数）
    fn backoff_duration(&self, attempt: usize) -> Duration;
}
