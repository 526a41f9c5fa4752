//! 配置模块
//!
//! 对应 TOML 文件：
//!
//! ```toml
//! [mq]
//! name_server_address = "127.0.0.1:9876"
//! producer_group = "order-producer"
//!
//! [pull]
//! batch_size = 10
//! pull_timeout_ms = 20000
//!
//! [properties]
//! "rocketmq.order.topic" = "ORDER_TOPIC"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::consumer::pull::DEFAULT_PULL_BATCH_SIZE;
use crate::error::{ErrorCode, InfraResultExt, Result};
use crate::runtime::RuntimeConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MqConfig {
    pub mq: MqProperties,
    pub pull: PullSettings,
    pub runtime: RuntimeSettings,
    pub logging: LoggingConfig,
    /// 解析 binding 时按值查找的属性表
    pub properties: HashMap<String, String>,
}

/// 进程级 broker 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqProperties {
    pub name_server_address: String,
    pub producer_group: String,
    pub send_timeout_ms: u64,
}

impl Default for MqProperties {
    fn default() -> Self {
        Self {
            name_server_address: String::new(),
            producer_group: String::new(),
            send_timeout_ms: 3000,
        }
    }
}

impl MqProperties {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// 拉模式消费循环配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PullSettings {
    /// 单次拉取的最大消息数
    pub batch_size: usize,
    /// 单次拉取等待新消息的最长时间
    pub pull_timeout_ms: u64,
    /// 没有分配到队列时，重新发现队列前的等待时间
    pub idle_interval_ms: u64,
    /// broker 调用失败后的退避基数
    pub error_backoff_base_ms: u64,
    /// broker 调用失败后的退避上限
    pub error_backoff_max_ms: u64,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_PULL_BATCH_SIZE,
            pull_timeout_ms: 20_000,
            idle_interval_ms: 1_000,
            error_backoff_base_ms: 100,
            error_backoff_max_ms: 5_000,
        }
    }
}

impl PullSettings {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn error_backoff_base(&self) -> Duration {
        Duration::from_millis(self.error_backoff_base_ms)
    }

    pub fn error_backoff_max(&self) -> Duration {
        Duration::from_millis(self.error_backoff_max_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 未设置 `RUST_LOG` 时使用的过滤级别
    pub level: String,
    /// 是否输出 JSON 格式日志
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MqConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))
            .into_mq(ErrorCode::ConfigLoadFailed, "failed to load MQ configuration")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MqConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::new()
            .with_shutdown_timeout(Duration::from_millis(self.runtime.shutdown_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = MqConfig::from_toml_str(
            r#"
            [mq]
            name_server_address = "127.0.0.1:9876"
            producer_group = "orders"

            [pull]
            batch_size = 32

            [runtime]
            shutdown_timeout_ms = 1500

            [properties]
            "rocketmq.order.topic" = "ORDER_TOPIC"
            "#,
        )
        .unwrap();

        assert_eq!(config.mq.name_server_address, "127.0.0.1:9876");
        assert_eq!(config.mq.send_timeout(), Duration::from_secs(3));
        assert_eq!(config.pull.batch_size, 32);
        assert_eq!(config.pull.pull_timeout(), Duration::from_secs(20));
        assert_eq!(
            config.runtime_config().shutdown_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(
            config.properties.get("rocketmq.order.topic").map(String::as_str),
            Some("ORDER_TOPIC")
        );
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = MqConfig::from_toml_str("").unwrap();
        assert!(config.mq.name_server_address.is_empty());
        assert_eq!(config.pull, PullSettings::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn malformed_document_is_a_configuration_error() {
        let err = MqConfig::from_toml_str("[mq\nname_server_address = 1").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConfigLoadFailed));
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = MqConfig::load_from_file("/nonexistent/mq.toml").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConfigLoadFailed));
        assert!(err.details().unwrap().contains("/nonexistent/mq.toml"));
    }
}
