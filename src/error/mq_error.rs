//! MQ 统一错误类型

use super::code::{ErrorCategory, ErrorCode};
use std::collections::HashMap;
use thiserror::Error;

/// MQ 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum MqError {
    /// 带错误代码的错误（配置错误、broker 错误、消息错误等）
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Coded {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        params: Option<HashMap<String, String>>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（内部错误）
    #[error("系统错误: {0}")]
    System(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl MqError {
    /// 创建带错误代码的错误
    pub fn coded(code: ErrorCode, reason: impl Into<String>) -> Self {
        MqError::Coded {
            code,
            reason: reason.into(),
            details: None,
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        MqError::System(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        MqError::Io(msg.into())
    }

    // ============================================================
    // 便捷方法：启动配置错误
    // ============================================================

    /// 创建配置错误（启动期致命错误）
    pub fn configuration(code: ErrorCode, reason: impl Into<String>) -> Self {
        debug_assert_eq!(code.category(), ErrorCategory::Configuration);
        Self::coded(code, reason)
    }

    /// name server 地址缺失
    pub fn name_server_missing() -> Self {
        Self::coded(ErrorCode::NameServerMissing, "name server address must be defined")
    }

    // ============================================================
    // 便捷方法：broker 运行期错误
    // ============================================================

    /// 创建 broker 错误
    pub fn broker(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::coded(code, reason)
    }

    /// 客户端尚未启动
    pub fn client_not_started(client: impl Into<String>) -> Self {
        Self::coded(
            ErrorCode::ClientNotStarted,
            format!("client {} is not started", client.into()),
        )
    }

    /// 客户端已关闭
    pub fn client_shutdown(client: impl Into<String>) -> Self {
        Self::coded(
            ErrorCode::ClientShutdown,
            format!("client {} has been shut down", client.into()),
        )
    }

    // ============================================================
    // 便捷方法：消息 / 序列化错误
    // ============================================================

    /// 创建消息发送失败错误
    pub fn message_send_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::MessageSendFailed, reason)
    }

    /// 创建序列化错误
    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::SerializationError, reason)
    }

    /// 创建反序列化错误
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::DeserializationError, reason)
    }

    /// 创建操作超时错误
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::OperationTimeout, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MqError::Coded { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            MqError::Coded { code, .. } => code.category(),
            MqError::System(_) | MqError::Io(_) => ErrorCategory::System,
        }
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            MqError::Coded { reason, .. } => reason,
            MqError::System(msg) => msg,
            MqError::Io(msg) => msg,
        }
    }

    /// 获取错误详情
    pub fn details(&self) -> Option<&str> {
        match self {
            MqError::Coded { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// 获取错误参数
    pub fn param(&self, key: &str) -> Option<&str> {
        match self {
            MqError::Coded {
                params: Some(params),
                ..
            } => params.get(key).map(String::as_str),
            _ => None,
        }
    }

    /// 是否为启动期配置错误
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().map(|code| code.is_retryable()).unwrap_or(false)
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, MqError>;
