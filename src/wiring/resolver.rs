//! binding 解析
//!
//! 每个字段按以下顺序取值：
//!
//! 1. 声明中的非空值
//! 2. handler 配置提供能力给出的字符串值
//! 3. 以上一步得到的值为 key 查找属性，找到非空值则覆盖

use tracing::debug;

use super::binding::{ConsumerBinding, ProducerBinding};
use super::definition::{ConsumerRegistration, ProducerRegistration};
use super::property::PropertySource;
use crate::broker::{ConsumeMode, MessageModel, SubscriptionExpression};
use crate::config::MqProperties;
use crate::consumer::BindingKey;
use crate::error::{ErrorBuilder, ErrorCode, MqError, Result};
use crate::retry::DEFAULT_MAX_RETRIES;

/// 按三级顺序解析单个字段
///
/// `required` 为缺失时使用的错误码；为 `None` 表示字段可选，缺失时返回 `Ok(None)`。
pub fn resolve_value(
    owner: &str,
    key: BindingKey,
    explicit: &str,
    provided: Option<toml::Value>,
    properties: &dyn PropertySource,
    required: Option<ErrorCode>,
) -> Result<Option<String>> {
    let value = if !explicit.trim().is_empty() {
        explicit.to_string()
    } else {
        match provided {
            Some(toml::Value::String(value)) if !value.trim().is_empty() => value,
            Some(toml::Value::String(_)) | None => {
                return match required {
                    Some(code) => Err(ErrorBuilder::new(
                        code,
                        format!(
                            "{}'s {} not defined in declaration or provided by the handler",
                            owner, key
                        ),
                    )
                    .param("owner", owner)
                    .param("field", key.field_name())
                    .build()),
                    None => Ok(None),
                };
            }
            Some(other) => {
                return Err(ErrorBuilder::new(
                    ErrorCode::FieldTypeMismatch,
                    format!("{}'s field which named {} must be a string", owner, key),
                )
                .param("owner", owner)
                .param("field", key.field_name())
                .details(format!("provided {} value", other.type_str()))
                .build());
            }
        }
    };

    match properties.property(&value) {
        Some(overridden) if !overridden.trim().is_empty() => {
            debug!(owner = %owner, field = %key, key = %value, value = %overridden, "Binding value overridden by property");
            Ok(Some(overridden))
        }
        _ => Ok(Some(value)),
    }
}

pub(crate) fn require_name_server(mq: &MqProperties) -> Result<()> {
    if mq.name_server_address.trim().is_empty() {
        return Err(MqError::name_server_missing());
    }
    Ok(())
}

/// 解析消费者 binding
pub fn resolve_consumer(
    registration: &ConsumerRegistration,
    mq: &MqProperties,
    properties: &dyn PropertySource,
) -> Result<ConsumerBinding> {
    require_name_server(mq)?;

    let name = registration.name();
    let definition = registration.definition();
    let provided = |key: BindingKey| {
        registration
            .handler
            .as_ref()
            .and_then(|(_, factory)| factory.binding_value(key))
    };

    let consumer_group = required_value(
        name,
        BindingKey::ConsumerGroup,
        &definition.consumer_group,
        provided(BindingKey::ConsumerGroup),
        properties,
        ErrorCode::ConsumerGroupMissing,
    )?;
    let topic = required_value(
        name,
        BindingKey::Topic,
        &definition.topic,
        provided(BindingKey::Topic),
        properties,
        ErrorCode::TopicMissing,
    )?;

    let Some(delivery) = registration.delivery() else {
        return Err(ErrorBuilder::new(
            ErrorCode::UnsupportedConsumer,
            format!("{} - consumer implements neither push nor pull consumption", name),
        )
        .param("owner", name)
        .build());
    };

    let consume_mode: ConsumeMode = definition.consume_mode.parse()?;
    let message_model: MessageModel = definition.message_model.parse()?;

    let max_retries = definition.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    if max_retries == 0 {
        return Err(ErrorBuilder::new(
            ErrorCode::InvalidRetryLimit,
            format!("{}'s max_retries must be at least 1", name),
        )
        .param("owner", name)
        .build());
    }

    let tags = resolve_tags(name, &definition.tags, provided(BindingKey::Tag))?;

    Ok(ConsumerBinding {
        name: name.to_string(),
        consumer_group,
        topic,
        tags,
        message_model,
        consume_mode,
        max_retries,
        delivery,
    })
}

/// 解析生产者 binding，topic 与 tag 均可为空
pub fn resolve_producer(
    registration: &ProducerRegistration,
    mq: &MqProperties,
    properties: &dyn PropertySource,
) -> Result<ProducerBinding> {
    let name = registration.name();
    let definition = registration.definition();
    let provided = |key: BindingKey| {
        registration
            .provider
            .as_ref()
            .and_then(|provider| provider.binding_value(key))
    };

    let topic = resolve_value(
        name,
        BindingKey::Topic,
        &definition.topic,
        provided(BindingKey::Topic),
        properties,
        None,
    )?;
    let tag = resolve_value(
        name,
        BindingKey::Tag,
        &definition.tag,
        provided(BindingKey::Tag),
        properties,
        None,
    )?;

    Ok(ProducerBinding {
        name: name.to_string(),
        producer_group: mq.producer_group.clone(),
        topic,
        tag,
    })
}

fn required_value(
    owner: &str,
    key: BindingKey,
    explicit: &str,
    provided: Option<toml::Value>,
    properties: &dyn PropertySource,
    missing: ErrorCode,
) -> Result<String> {
    resolve_value(owner, key, explicit, provided, properties, Some(missing))?.ok_or_else(|| {
        MqError::configuration(missing, format!("{}'s {} not defined", owner, key))
    })
}

/// 声明中的 tag 全部为空时，使用 handler 提供的 `a||b` 形式表达式
fn resolve_tags(owner: &str, declared: &[String], provided: Option<toml::Value>) -> Result<Vec<String>> {
    let expression = if declared.iter().any(|tag| !tag.trim().is_empty()) {
        SubscriptionExpression::from_tags(declared)
    } else {
        match provided {
            Some(toml::Value::String(value)) => SubscriptionExpression::parse(&value),
            None => SubscriptionExpression::all(),
            Some(other) => {
                return Err(ErrorBuilder::new(
                    ErrorCode::FieldTypeMismatch,
                    format!("{}'s field which named tag must be a string", owner),
                )
                .param("owner", owner)
                .param("field", BindingKey::Tag.field_name())
                .details(format!("provided {} value", other.type_str()))
                .build());
            }
        }
    };

    if expression.is_all() {
        Ok(vec![crate::broker::SUBSCRIBE_ALL.to_string()])
    } else {
        Ok(expression.tags().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_properties() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn explicit_value_wins_over_provider() {
        let value = resolve_value(
            "orders",
            BindingKey::ConsumerGroup,
            "G2",
            Some(toml::Value::String("G1".into())),
            &no_properties(),
            Some(ErrorCode::ConsumerGroupMissing),
        )
        .unwrap();
        assert_eq!(value.as_deref(), Some("G2"));
    }

    #[test]
    fn provider_fills_blank_declaration() {
        let value = resolve_value(
            "orders",
            BindingKey::ConsumerGroup,
            "  ",
            Some(toml::Value::String("G1".into())),
            &no_properties(),
            Some(ErrorCode::ConsumerGroupMissing),
        )
        .unwrap();
        assert_eq!(value.as_deref(), Some("G1"));
    }

    #[test]
    fn property_keyed_by_value_overrides() {
        let mut properties = no_properties();
        properties.insert("rocketmq.order.topic".to_string(), "ORDER_TOPIC".to_string());
        properties.insert("blank.topic".to_string(), " ".to_string());

        let overridden = resolve_value(
            "orders",
            BindingKey::Topic,
            "rocketmq.order.topic",
            None,
            &properties,
            Some(ErrorCode::TopicMissing),
        )
        .unwrap();
        assert_eq!(overridden.as_deref(), Some("ORDER_TOPIC"));

        let kept = resolve_value(
            "orders",
            BindingKey::Topic,
            "blank.topic",
            None,
            &properties,
            Some(ErrorCode::TopicMissing),
        )
        .unwrap();
        assert_eq!(kept.as_deref(), Some("blank.topic"));
    }

    #[test]
    fn missing_required_value_fails() {
        let err = resolve_value(
            "orders",
            BindingKey::Topic,
            "",
            Some(toml::Value::String(String::new())),
            &no_properties(),
            Some(ErrorCode::TopicMissing),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TopicMissing));
        assert_eq!(err.param("field"), Some("topic"));
    }

    #[test]
    fn missing_optional_value_is_none() {
        let value = resolve_value("p", BindingKey::Tag, "", None, &no_properties(), None).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn non_string_provider_value_fails() {
        let err = resolve_value(
            "orders",
            BindingKey::ConsumerGroup,
            "",
            Some(toml::Value::Integer(42)),
            &no_properties(),
            Some(ErrorCode::ConsumerGroupMissing),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FieldTypeMismatch));
        assert!(err.is_configuration());
    }

    #[test]
    fn provided_tag_expression_is_split() {
        let tags = resolve_tags(
            "orders",
            &[String::new()],
            Some(toml::Value::String("paid||refunded".into())),
        )
        .unwrap();
        assert_eq!(tags, vec!["paid".to_string(), "refunded".to_string()]);

        let all = resolve_tags("orders", &["*".to_string(), "paid".to_string()], None).unwrap();
        assert_eq!(all, vec!["*".to_string()]);
    }
}
