//! Kafka 客户端配置

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::broker::{ClientOptions, MessageModel};

/// Kafka 客户端配置
///
/// bootstrap servers 取自 `ClientOptions::name_server_address`。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KafkaBrokerConfig {
    /// 会话超时（毫秒），默认 30000
    pub session_timeout_ms: u64,
    /// 推模式下没有已提交 offset 时的起点，默认 "earliest"
    pub auto_offset_reset: String,
    /// 最大消息大小（字节），默认 10MB
    pub fetch_message_max_bytes: usize,
    /// 最小 fetch 字节数
    pub fetch_min_bytes: usize,
    /// 最大 fetch 等待时间（毫秒）
    pub fetch_max_wait_ms: u64,
    /// 元数据最大年龄（毫秒），默认 5 分钟
    pub metadata_max_age_ms: u64,
    /// 消息发送超时（毫秒），默认 5000
    pub message_timeout_ms: u64,
    /// 是否启用幂等性，默认 true
    pub enable_idempotence: bool,
    /// 压缩类型："none", "gzip", "snappy", "lz4", "zstd"
    pub compression_type: String,
    /// 批量发送延迟（毫秒）
    pub linger_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    /// 元数据查询、offset 查询等同步请求的超时
    pub request_timeout_ms: u64,
    /// 顺序消费失败后暂停分区的时间
    pub suspend_interval_ms: u64,
}

impl Default for KafkaBrokerConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 30_000,
            auto_offset_reset: "earliest".to_string(),
            fetch_message_max_bytes: 10 * 1024 * 1024,
            fetch_min_bytes: 1,
            fetch_max_wait_ms: 500,
            metadata_max_age_ms: 300_000,
            message_timeout_ms: 5_000,
            enable_idempotence: true,
            compression_type: "snappy".to_string(),
            linger_ms: 10,
            retries: 3,
            retry_backoff_ms: 100,
            request_timeout_ms: 5_000,
            suspend_interval_ms: 1_000,
        }
    }
}

impl KafkaBrokerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn suspend_interval(&self) -> Duration {
        Duration::from_millis(self.suspend_interval_ms)
    }
}

/// 广播模式下每个实例使用独立的消费组，各自维护 offset
pub(crate) fn group_id(options: &ClientOptions) -> String {
    match options.message_model {
        MessageModel::Clustering => options.group.clone(),
        MessageModel::Broadcasting => format!("{}-{}", options.group, options.instance_name),
    }
}

/// 消费者配置，offset 一律手动提交
pub(crate) fn consumer_config(
    options: &ClientOptions,
    config: &KafkaBrokerConfig,
    auto_offset_reset: &str,
) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &options.name_server_address)
        .set("group.id", group_id(options))
        .set("client.id", &options.instance_name)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", auto_offset_reset)
        .set("security.protocol", "plaintext")
        .set("fetch.message.max.bytes", config.fetch_message_max_bytes.to_string())
        .set("fetch.min.bytes", config.fetch_min_bytes.to_string())
        .set("fetch.wait.max.ms", config.fetch_max_wait_ms.to_string())
        .set("metadata.max.age.ms", config.metadata_max_age_ms.to_string());
    client
}

pub(crate) fn producer_config(bootstrap: &str, config: &KafkaBrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", bootstrap)
        .set("message.timeout.ms", config.message_timeout_ms.to_string())
        .set("enable.idempotence", config.enable_idempotence.to_string())
        .set("compression.type", &config.compression_type)
        .set("linger.ms", config.linger_ms.to_string())
        .set("retries", config.retries.to_string())
        .set("retry.backoff.ms", config.retry_backoff_ms.to_string())
        .set("metadata.max.age.ms", config.metadata_max_age_ms.to_string())
        .set("security.protocol", "plaintext");
    // 启用幂等性时需要 acks=all
    if config.enable_idempotence {
        client.set("acks", "all");
    }
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting_uses_instance_scoped_group() {
        let options = ClientOptions::new("orders", "localhost:9092").with_instance_name("i-1");
        assert_eq!(group_id(&options), "orders");

        let options = options.with_message_model(MessageModel::Broadcasting);
        assert_eq!(group_id(&options), "orders-i-1");
    }

    #[test]
    fn consumer_config_disables_auto_commit() {
        let options = ClientOptions::new("orders", "localhost:9092");
        let client = consumer_config(&options, &KafkaBrokerConfig::default(), "error");
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("error"));
        assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
    }
}
