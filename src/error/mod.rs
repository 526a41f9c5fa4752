//! Flare MQ 错误处理模块
//!
//! 启动期配置错误（`ErrorCategory::Configuration`）直接中止启动；
//! 运行期的 broker / 解码错误由消费引擎记录日志后吞掉。

pub mod builder;
pub mod code;
pub mod conversions;
pub mod mq_error;

// 重新导出公共类型和函数
pub use builder::ErrorBuilder;
pub use code::{ErrorCategory, ErrorCode};
pub use mq_error::{MqError, Result};

/// 基础设施层默认使用的结果类型
pub type InfraResult<T> = anyhow::Result<T>;

/// 将基础设施错误转换为 `MqError`
pub fn map_infra_error<E, S>(error: E, code: ErrorCode, message: S) -> MqError
where
    E: std::fmt::Display,
    S: Into<String>,
{
    ErrorBuilder::new(code, message.into())
        .details(error.to_string())
        .build()
}

/// `InfraResult` 的辅助扩展，用于快速转换为统一的错误类型
pub trait InfraResultExt<T> {
    fn into_mq<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>;
}

impl<T> InfraResultExt<T> for InfraResult<T> {
    fn into_mq<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>,
    {
        self.map_err(|err| map_infra_error(err, code, message))
    }
}
