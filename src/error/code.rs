//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 配置相关错误（启动期，致命）
/// - 2000-2999: Broker 客户端相关错误（运行期，可恢复）
/// - 3000-3999: 消息相关错误
/// - 4000-4999: 序列化相关错误
/// - 6000-6999: 系统相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 配置相关错误 (1000-1999)
    // ============================================================
    NameServerMissing = 1000,
    ConsumerGroupMissing = 1001,
    TopicMissing = 1002,
    FieldTypeMismatch = 1003,
    UnsupportedConsumer = 1004,
    UnknownConsumeMode = 1005,
    UnknownMessageModel = 1006,
    ProducerGroupMissing = 1007,
    InvalidRetryLimit = 1008,
    ConfigLoadFailed = 1009,

    // ============================================================
    // Broker 客户端相关错误 (2000-2999)
    // ============================================================
    ConnectionFailed = 2000,
    ClientNotStarted = 2001,
    SubscribeFailed = 2002,
    PullFailed = 2003,
    OffsetReadFailed = 2004,
    OffsetCommitFailed = 2005,
    RebalanceFailed = 2006,
    ClientShutdown = 2007,

    // ============================================================
    // 消息相关错误 (3000-3999)
    // ============================================================
    MessageSendFailed = 3000,
    MessageTooLarge = 3001,
    TopicNotSpecified = 3002,

    // ============================================================
    // 序列化相关错误 (4000-4999)
    // ============================================================
    SerializationError = 4000,
    DeserializationError = 4001,
    EncodingError = 4002,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    TaskFailed = 6001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    InvalidParameter = 9001,
    OperationTimeout = 9004,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NameServerMissing => "NAME_SERVER_MISSING",
            ErrorCode::ConsumerGroupMissing => "CONSUMER_GROUP_MISSING",
            ErrorCode::TopicMissing => "TOPIC_MISSING",
            ErrorCode::FieldTypeMismatch => "FIELD_TYPE_MISMATCH",
            ErrorCode::UnsupportedConsumer => "UNSUPPORTED_CONSUMER",
            ErrorCode::UnknownConsumeMode => "UNKNOWN_CONSUME_MODE",
            ErrorCode::UnknownMessageModel => "UNKNOWN_MESSAGE_MODEL",
            ErrorCode::ProducerGroupMissing => "PRODUCER_GROUP_MISSING",
            ErrorCode::InvalidRetryLimit => "INVALID_RETRY_LIMIT",
            ErrorCode::ConfigLoadFailed => "CONFIG_LOAD_FAILED",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ClientNotStarted => "CLIENT_NOT_STARTED",
            ErrorCode::SubscribeFailed => "SUBSCRIBE_FAILED",
            ErrorCode::PullFailed => "PULL_FAILED",
            ErrorCode::OffsetReadFailed => "OFFSET_READ_FAILED",
            ErrorCode::OffsetCommitFailed => "OFFSET_COMMIT_FAILED",
            ErrorCode::RebalanceFailed => "REBALANCE_FAILED",
            ErrorCode::ClientShutdown => "CLIENT_SHUTDOWN",
            ErrorCode::MessageSendFailed => "MESSAGE_SEND_FAILED",
            ErrorCode::MessageTooLarge => "MESSAGE_TOO_LARGE",
            ErrorCode::TopicNotSpecified => "TOPIC_NOT_SPECIFIED",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::EncodingError => "ENCODING_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::TaskFailed => "TASK_FAILED",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Configuration,
            2000..=2999 => ErrorCategory::Broker,
            3000..=3999 => ErrorCategory::Message,
            4000..=4999 => ErrorCategory::Serialization,
            6000..=6999 => ErrorCategory::System,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::PullFailed
                | ErrorCode::OffsetReadFailed
                | ErrorCode::OffsetCommitFailed
                | ErrorCode::RebalanceFailed
                | ErrorCode::OperationTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Configuration,
    Broker,
    Message,
    Serialization,
    System,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "CONFIGURATION"),
            ErrorCategory::Broker => write!(f, "BROKER"),
            ErrorCategory::Message => write!(f, "MESSAGE"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::System => write!(f, "SYSTEM"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_code_ranges() {
        assert_eq!(ErrorCode::TopicMissing.category(), ErrorCategory::Configuration);
        assert_eq!(ErrorCode::PullFailed.category(), ErrorCategory::Broker);
        assert_eq!(ErrorCode::MessageSendFailed.category(), ErrorCategory::Message);
        assert_eq!(ErrorCode::DeserializationError.category(), ErrorCategory::Serialization);
        assert_eq!(ErrorCode::UnknownError.category(), ErrorCategory::General);
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(!ErrorCode::NameServerMissing.is_retryable());
        assert!(ErrorCode::OffsetCommitFailed.is_retryable());
    }
}
