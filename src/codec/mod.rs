//! 消息编解码模块
//!
//! 消息体统一按 UTF-8 JSON 编码。目标类型由消费者在注册时通过关联类型
//! `MessageHandler::Message` 给出，未声明具体类型的消费者使用 `serde_json::Value`。

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::error;

use crate::error::{MqError, Result};

/// 解码错误
#[derive(Error, Debug)]
pub enum DecodeError {
    /// 消息体不是合法的 UTF-8
    #[error("message body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// 消息体不是目标类型的合法 JSON
    #[error("message body is not valid JSON for the target type: {0}")]
    Json(#[from] serde_json::Error),
}

/// 解码消息体
///
/// 空消息体返回 `Ok(None)`，不视为错误。
pub fn try_decode<T>(body: &[u8]) -> std::result::Result<Option<T>, DecodeError>
where
    T: DeserializeOwned,
{
    if body.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(body)?;
    let value = serde_json::from_str(text)?;
    Ok(Some(value))
}

/// 解码消息体，失败时记录日志并返回 `None`
///
/// 调用方据此跳过该条消息，不中断整个批次。
pub fn decode<T>(body: &[u8]) -> Option<T>
where
    T: DeserializeOwned,
{
    match try_decode(body) {
        Ok(value) => value,
        Err(err) => {
            error!(
                error = %err,
                body = %String::from_utf8_lossy(body),
                "parse message json fail"
            );
            None
        }
    }
}

/// 编码消息体
pub fn encode<T>(message: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(message).map_err(MqError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        order_id: u64,
        buyer: String,
    }

    #[test]
    fn empty_body_is_no_value() {
        assert!(matches!(try_decode::<OrderCreated>(b""), Ok(None)));
        assert!(decode::<serde_json::Value>(b"").is_none());
    }

    #[test]
    fn valid_json_decodes_to_equal_value() {
        let order = OrderCreated {
            order_id: 42,
            buyer: "alice".to_string(),
        };
        let body = encode(&order).unwrap();
        assert_eq!(decode::<OrderCreated>(&body), Some(order));
    }

    #[test]
    fn malformed_json_is_no_value() {
        assert!(decode::<OrderCreated>(b"{\"order_id\": ").is_none());
        assert!(matches!(
            try_decode::<OrderCreated>(b"{\"order_id\": "),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_no_value() {
        let body = [0xff, 0xfe, 0xfd];
        assert!(decode::<serde_json::Value>(&body).is_none());
        assert!(matches!(
            try_decode::<serde_json::Value>(&body),
            Err(DecodeError::Utf8(_))
        ));
    }

    #[test]
    fn untyped_consumers_receive_json_values() {
        let value = decode::<serde_json::Value>(br#"{"a":[1,2]}"#).unwrap();
        assert_eq!(value["a"][1], 2);
    }
}
