//! Broker 客户端边界
//!
//! 消费引擎只依赖此处定义的能力：连接、订阅、注册监听器、队列分配、
//! 拉取、offset 读取与提交、发送。具体实现：
//! - `memory`：进程内 broker，始终可用
//! - `kafka`：基于 rdkafka（需要启用 `kafka` feature）

pub mod memory;
pub mod message;
pub mod subscription;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::{MemoryBroker, MemoryBrokerConfig};
pub use message::{OutgoingMessage, PullResult, PullStatus, QueueId, RawMessage, SendResult};
pub use subscription::{SUBSCRIBE_ALL, SubscriptionExpression};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorCode, MqError, Result};

/// 消费模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumeMode {
    /// 并发消费，不保证顺序
    #[default]
    Concurrent,
    /// 顺序消费，同一队列串行投递
    Ordered,
}

impl FromStr for ConsumeMode {
    type Err = MqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CONCURRENT" | "CONCURRENTLY" => Ok(ConsumeMode::Concurrent),
            "ORDERED" | "ORDERLY" => Ok(ConsumeMode::Ordered),
            _ => Err(MqError::configuration(
                ErrorCode::UnknownConsumeMode,
                format!("unknown consume mode '{}', only support CONCURRENT and ORDERED", s),
            )),
        }
    }
}

impl fmt::Display for ConsumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeMode::Concurrent => write!(f, "CONCURRENT"),
            ConsumeMode::Ordered => write!(f, "ORDERED"),
        }
    }
}

/// 消息模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageModel {
    /// 集群消费：同组实例分摊队列
    #[default]
    Clustering,
    /// 广播消费：每个实例消费全部队列，offset 按实例维护
    Broadcasting,
}

impl FromStr for MessageModel {
    type Err = MqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CLUSTERING" => Ok(MessageModel::Clustering),
            "BROADCASTING" => Ok(MessageModel::Broadcasting),
            _ => Err(MqError::configuration(
                ErrorCode::UnknownMessageModel,
                format!("unknown message model '{}', only support CLUSTERING and BROADCASTING", s),
            )),
        }
    }
}

impl fmt::Display for MessageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageModel::Clustering => write!(f, "CLUSTERING"),
            MessageModel::Broadcasting => write!(f, "BROADCASTING"),
        }
    }
}

/// 推模式下一次投递的上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeContext {
    pub queue: QueueId,
    pub mode: ConsumeMode,
}

/// 推模式监听器的返回状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumeStatus {
    /// 整批消费成功
    Success,
    /// 并发模式：稍后重投递
    ReconsumeLater,
    /// 顺序模式：暂停当前队列，稍后重投递
    SuspendCurrentQueue,
}

/// 推模式消息监听器（由 broker 客户端调用）
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn consume(&self, context: &ConsumeContext, batch: Vec<RawMessage>) -> ConsumeStatus;
}

/// 创建客户端所需的参数
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// 消费组或生产组
    pub group: String,
    pub name_server_address: String,
    pub message_model: MessageModel,
    /// 实例名，同组内唯一
    pub instance_name: String,
    /// 拉取时等待新消息的最长时间
    pub pull_timeout: Duration,
}

impl ClientOptions {
    pub fn new(group: impl Into<String>, name_server_address: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name_server_address: name_server_address.into(),
            message_model: MessageModel::default(),
            instance_name: uuid::Uuid::new_v4().to_string(),
            pull_timeout: Duration::from_secs(20),
        }
    }

    #[must_use]
    pub fn with_message_model(mut self, model: MessageModel) -> Self {
        self.message_model = model;
        self
    }

    #[must_use]
    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    #[must_use]
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }
}

/// 推模式消费者客户端
#[async_trait]
pub trait PushConsumerClient: Send + Sync {
    fn group(&self) -> &str;

    /// 订阅 topic，`expression` 为 tag 订阅表达式
    async fn subscribe(&self, topic: &str, expression: &SubscriptionExpression) -> Result<()>;

    /// 注册监听器，必须在 `start` 之前调用
    fn register_listener(&self, mode: ConsumeMode, listener: Arc<dyn MessageListener>);

    async fn start(&self) -> Result<()>;

    async fn shutdown(&self);
}

/// 拉模式消费者客户端
#[async_trait]
pub trait PullConsumerClient: Send + Sync {
    fn group(&self) -> &str;

    async fn start(&self) -> Result<()>;

    /// 当前实例在负载均衡后持有的队列
    async fn fetch_owned_queues(&self, topic: &str) -> Result<Vec<QueueId>>;

    /// 读取已提交的 offset，不存在时返回负数
    async fn read_committed_offset(&self, queue: &QueueId) -> Result<i64>;

    /// 阻塞拉取，最多等待 `ClientOptions::pull_timeout`
    async fn pull(&self, queue: &QueueId, offset: i64, max_count: usize) -> Result<PullResult>;

    async fn commit_offset(&self, queue: &QueueId, offset: i64) -> Result<()>;

    async fn shutdown(&self);
}

/// 生产者客户端（进程内所有 producer binding 共享一个）
#[async_trait]
pub trait ProducerClient: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn send(&self, message: OutgoingMessage) -> Result<SendResult>;

    async fn shutdown(&self);
}

/// Broker 连接器：按 binding 创建客户端
pub trait BrokerConnector: Send + Sync {
    fn create_push_consumer(&self, options: &ClientOptions) -> Result<Arc<dyn PushConsumerClient>>;

    fn create_pull_consumer(&self, options: &ClientOptions) -> Result<Arc<dyn PullConsumerClient>>;

    fn create_producer(&self, options: &ClientOptions) -> Result<Arc<dyn ProducerClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_mode_accepts_both_spellings() {
        assert_eq!("CONCURRENT".parse::<ConsumeMode>().unwrap(), ConsumeMode::Concurrent);
        assert_eq!("concurrently".parse::<ConsumeMode>().unwrap(), ConsumeMode::Concurrent);
        assert_eq!("ORDERLY".parse::<ConsumeMode>().unwrap(), ConsumeMode::Ordered);

        let err = "BROADCAST".parse::<ConsumeMode>().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnknownConsumeMode));
        assert!(err.is_configuration());
    }

    #[test]
    fn message_model_rejects_unknown_values() {
        assert_eq!("broadcasting".parse::<MessageModel>().unwrap(), MessageModel::Broadcasting);
        let err = "FANOUT".parse::<MessageModel>().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnknownMessageModel));
    }
}
