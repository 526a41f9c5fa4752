//! 日志初始化
//!
//! 安装全局 `tracing` 订阅者：`RUST_LOG` 优先，其次使用配置中的级别；
//! 同时把 `log` 宏的记录桥接到 `tracing`。

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ErrorCode, MqError, Result};

/// 初始化全局日志
///
/// 重复调用会返回错误，调用方可以忽略。
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    if config.json {
        install(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(false)
                .finish(),
        )
    } else {
        install(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .finish(),
        )
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            MqError::configuration(
                ErrorCode::ConfigLoadFailed,
                format!("invalid log level '{}': {}", config.level, e),
            )
        }),
    }
}

fn install<S>(subscriber: S) -> Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| MqError::system(format!("failed to install tracing subscriber: {}", e)))?;
    tracing_log::LogTracer::init()
        .map_err(|e| MqError::system(format!("failed to bridge log records: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "flare_mq_starter=verbose".to_string(),
            json: false,
        };
        assert!(build_filter(&config).is_err());
    }
}
