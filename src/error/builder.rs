//! 错误构建器
//!
//! 提供链式 API 用于构建错误

use super::{ErrorCode, MqError};
use std::collections::HashMap;

/// 错误构建器
pub struct ErrorBuilder {
    code: ErrorCode,
    reason: String,
    details: Option<String>,
    params: Option<HashMap<String, String>>,
}

impl ErrorBuilder {
    /// 创建新的错误构建器
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            details: None,
            params: None,
        }
    }

    /// 添加错误详情
    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// 添加错误参数（例如 consumer 名称、topic）
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// 构建 MqError
    pub fn build(self) -> MqError {
        MqError::Coded {
            code: self.code,
            reason: self.reason,
            details: self.details,
            params: self.params,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_details_and_params() {
        let err = ErrorBuilder::new(ErrorCode::TopicMissing, "topic not defined")
            .details("checked definition, provider and properties")
            .param("consumer", "order-consumer")
            .build();

        assert_eq!(err.code(), Some(ErrorCode::TopicMissing));
        assert_eq!(err.param("consumer"), Some("order-consumer"));
        assert!(err.details().is_some());
        assert!(err.is_configuration());
    }
}
