//! 属性查找
//!
//! 解析 binding 时，以声明值（或配置提供值）作为 key 查找属性，
//! 找到非空值则覆盖。

use std::collections::HashMap;
use std::sync::Arc;

/// 属性源
pub trait PropertySource: Send + Sync {
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        if key.trim().is_empty() {
            return None;
        }
        self.get(key).cloned()
    }
}

/// 进程环境变量
///
/// 先按原样查找，再按宽松规则查找：`rocketmq.order-topic` → `ROCKETMQ_ORDER_TOPIC`。
#[derive(Debug, Clone, Default)]
pub struct EnvPropertySource {
    prefix: Option<String>,
}

impl EnvPropertySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只查找带指定前缀的环境变量，例如 `APP_`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn relaxed_name(&self, key: &str) -> String {
        let name: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name,
        }
    }
}

impl PropertySource for EnvPropertySource {
    fn property(&self, key: &str) -> Option<String> {
        if key.trim().is_empty() {
            return None;
        }
        if self.prefix.is_none() {
            if let Ok(value) = std::env::var(key) {
                return Some(value);
            }
        }
        std::env::var(self.relaxed_name(key)).ok()
    }
}

/// 多个属性源按顺序查找，先找到的非空值生效
#[derive(Clone, Default)]
pub struct LayeredPropertySource {
    layers: Vec<Arc<dyn PropertySource>>,
}

impl LayeredPropertySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个优先级更低的属性源
    #[must_use]
    pub fn with_layer(mut self, source: Arc<dyn PropertySource>) -> Self {
        self.layers.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl PropertySource for LayeredPropertySource {
    fn property(&self, key: &str) -> Option<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.property(key))
            .find(|value| !value.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn relaxed_name_uppercases_and_replaces_separators() {
        let source = EnvPropertySource::new();
        assert_eq!(source.relaxed_name("rocketmq.order-topic"), "ROCKETMQ_ORDER_TOPIC");

        let prefixed = EnvPropertySource::with_prefix("APP_");
        assert_eq!(prefixed.relaxed_name("mq.group"), "APP_MQ_GROUP");
    }

    #[test]
    fn blank_key_never_matches() {
        let source = map(&[("", "value")]);
        assert_eq!(source.property(""), None);
        assert_eq!(source.property("  "), None);
    }

    #[test]
    fn first_non_blank_layer_wins() {
        let layered = LayeredPropertySource::new()
            .with_layer(Arc::new(map(&[("topic", ""), ("group", "G-high")])))
            .with_layer(Arc::new(map(&[("topic", "T-low"), ("group", "G-low")])));

        assert_eq!(layered.property("topic").as_deref(), Some("T-low"));
        assert_eq!(layered.property("group").as_deref(), Some("G-high"));
        assert_eq!(layered.property("missing"), None);
        assert_eq!(layered.len(), 2);
    }
}
