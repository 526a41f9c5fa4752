//! 错误类型转换实现
//!
//! 提供各种错误类型之间的转换

use super::{ErrorBuilder, ErrorCode, MqError};
use crate::codec::DecodeError;
use std::io;

impl From<io::Error> for MqError {
    fn from(err: io::Error) -> Self {
        MqError::io(err.to_string())
    }
}

impl From<serde_json::Error> for MqError {
    fn from(err: serde_json::Error) -> Self {
        MqError::serialization_error(format!("JSON 序列化错误: {}", err))
    }
}

impl From<toml::de::Error> for MqError {
    fn from(err: toml::de::Error) -> Self {
        ErrorBuilder::new(ErrorCode::ConfigLoadFailed, "failed to parse TOML configuration")
            .details(err.to_string())
            .build()
    }
}

impl From<DecodeError> for MqError {
    fn from(err: DecodeError) -> Self {
        MqError::deserialization_error(err.to_string())
    }
}
