//! 任务定义模块
//!
//! 运行时管理的后台任务抽象，拉模式消费循环以 `MessageConsumerTask` 的形式运行

use std::future::Future;
use std::pin::Pin;

/// 任务执行结果
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 任务 trait
///
/// 所有需要在运行时中管理的任务都必须实现此 trait
pub trait Task: Send {
    /// 获取任务名称
    fn name(&self) -> &str;

    /// 运行任务
    ///
    /// # 参数
    /// * `shutdown_rx` - 关闭信号接收器，当收到信号（或发送端被丢弃）时任务应该优雅关闭
    fn run(
        self: Box<Self>,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send>>;
}

// -------- Message Consumer Task --------

/// 消息消费者 trait
///
/// 自行驱动消费循环的消费者（例如拉模式消费引擎）实现此 trait
pub trait MessageConsumer: Send + Sync {
    /// 消费消息，直到收到关闭信号
    ///
    /// # 参数
    /// * `shutdown_rx` - 关闭信号接收器
    fn consume(
        &self,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + '_>>;
}

/// 消息消费者任务
///
/// 将实现了 `MessageConsumer` trait 的对象包装成 `Task`
pub struct MessageConsumerTask {
    name: String,
    consumer: Box<dyn MessageConsumer + Send + Sync>,
}

impl MessageConsumerTask {
    /// 创建新的消息消费者任务
    pub fn new(name: impl Into<String>, consumer: Box<dyn MessageConsumer + Send + Sync>) -> Self {
        Self {
            name: name.into(),
            consumer,
        }
    }
}

impl Task for MessageConsumerTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        self: Box<Self>,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send>> {
        Box::pin(async move { self.consumer.consume(shutdown_rx).await })
    }
}
