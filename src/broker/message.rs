//! Broker 边界上的数据类型

use serde::{Deserialize, Serialize};
use std::fmt;

/// 队列标识
///
/// 队列是 topic 在 broker 上的有序分区，也是 offset 管理和顺序保证的单位。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: u32,
}

impl QueueId {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker_name, self.queue_id)
    }
}

/// 从 broker 收到的原始消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub topic: String,
    pub keys: String,
    pub tags: String,
    pub body: Vec<u8>,
    /// broker 维护的重投递次数
    pub reconsume_count: u32,
    pub queue_offset: i64,
    pub born_timestamp: chrono::DateTime<chrono::Utc>,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            keys: String::new(),
            tags: String::new(),
            body: body.into(),
            reconsume_count: 0,
            queue_offset: 0,
            born_timestamp: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn with_keys(mut self, keys: impl Into<String>) -> Self {
        self.keys = keys.into();
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    #[must_use]
    pub fn with_reconsume_count(mut self, count: u32) -> Self {
        self.reconsume_count = count;
        self
    }

    #[must_use]
    pub fn with_queue_offset(mut self, offset: i64) -> Self {
        self.queue_offset = offset;
        self
    }
}

/// 待发送的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub tag: Option<String>,
    pub key: Option<String>,
    pub body: Vec<u8>,
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub msg_id: String,
    pub queue: QueueId,
    pub queue_offset: i64,
}

/// 拉取状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullStatus {
    /// 找到消息
    Found,
    /// 当前 offset 之后没有新消息
    NoNewMsg,
    /// 有消息但都不符合过滤条件
    NoMatchedMsg,
    /// offset 不合法（例如超出保留范围）
    OffsetIllegal,
}

impl fmt::Display for PullStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullStatus::Found => write!(f, "FOUND"),
            PullStatus::NoNewMsg => write!(f, "NO_NEW_MSG"),
            PullStatus::NoMatchedMsg => write!(f, "NO_MATCHED_MSG"),
            PullStatus::OffsetIllegal => write!(f, "OFFSET_ILLEGAL"),
        }
    }
}

/// 一次拉取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub status: PullStatus,
    pub messages: Vec<RawMessage>,
    /// 下一次拉取应使用的 offset
    pub next_offset: i64,
    pub min_offset: i64,
    pub max_offset: i64,
}

impl PullResult {
    pub fn found(messages: Vec<RawMessage>, next_offset: i64) -> Self {
        Self::with_status(PullStatus::Found, messages, next_offset)
    }

    pub fn empty(status: PullStatus, next_offset: i64) -> Self {
        Self::with_status(status, Vec::new(), next_offset)
    }

    fn with_status(status: PullStatus, messages: Vec<RawMessage>, next_offset: i64) -> Self {
        Self {
            status,
            messages,
            next_offset,
            min_offset: 0,
            max_offset: next_offset,
        }
    }

    #[must_use]
    pub fn with_range(mut self, min_offset: i64, max_offset: i64) -> Self {
        self.min_offset = min_offset;
        self.max_offset = max_offset;
        self
    }
}
