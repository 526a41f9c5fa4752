//! MQ 运行时框架
//!
//! 管理启动阶段激活的消费者和生产者的生命周期
//!
//! # 设计理念
//!
//! 1. **任务系统**：拉模式消费循环通过 `Task` trait 作为后台任务运行
//! 2. **并发任务管理**：使用 `JoinSet` 管理所有后台任务
//! 3. **优雅停机**：每个任务持有独立的关闭信号，超时后强制中止

pub mod config;
pub mod runtime;
pub mod task;

pub use config::RuntimeConfig;
pub use runtime::MqRuntime;
pub use task::{MessageConsumer, MessageConsumerTask, Task, TaskResult};
