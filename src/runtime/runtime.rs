//! MQ 运行时实现
//!
//! 持有启动阶段激活的全部资源：
//! - 拉模式消费循环（后台任务）及其客户端
//! - 推模式消费者客户端
//! - 共享的生产者客户端及各生产者 binding
//!
//! 并负责优雅停机。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::broker::{ProducerClient, PullConsumerClient, PushConsumerClient};
use crate::metrics::MetricsRegistry;
use crate::producer::Producer;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::task::{Task, TaskResult};
use crate::wiring::ConsumerBinding;
use anyhow::Result;

/// MQ 运行时
///
/// 由 `MqBootstrap::start` 创建，此时所有消费者已经激活。
///
/// # 使用示例
///
/// ```rust,no_run
/// use flare_mq_starter::{MqBootstrap, MqConfig, MemoryBroker};
/// use std::sync::Arc;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let config = MqConfig::load_from_file("mq.toml")?;
/// let runtime = MqBootstrap::new(config, Arc::new(MemoryBroker::new()))
///     // .add_consumer(...)
///     .start()
///     .await?;
///
/// // 等待 Ctrl+C 后优雅停机
/// runtime.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct MqRuntime {
    config: RuntimeConfig,
    join_set: JoinSet<TaskResult>,
    task_shutdowns: Vec<(String, oneshot::Sender<()>)>,
    pull_consumers: Vec<(String, Arc<dyn PullConsumerClient>)>,
    push_consumers: Vec<(String, Arc<dyn PushConsumerClient>)>,
    producer_client: Option<Arc<dyn ProducerClient>>,
    producers: HashMap<String, Producer>,
    consumers: Vec<ConsumerBinding>,
    metrics: MetricsRegistry,
}

impl MqRuntime {
    /// 创建空的运行时
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            join_set: JoinSet::new(),
            task_shutdowns: Vec::new(),
            pull_consumers: Vec::new(),
            push_consumers: Vec::new(),
            producer_client: None,
            producers: HashMap::new(),
            consumers: Vec::new(),
            metrics: MetricsRegistry::new(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    /// 立即启动一个后台任务
    pub fn spawn_task(&mut self, task: Box<dyn Task>) {
        let task_name = task.name().to_string();
        info!(task_name = %task_name, "Spawning task");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.task_shutdowns.push((task_name.clone(), shutdown_tx));

        let task_future = task.run(shutdown_rx);
        self.join_set.spawn(async move {
            let result = task_future.await;
            match &result {
                Ok(_) => {
                    info!(task_name = %task_name, "✅ Task completed");
                }
                Err(e) => {
                    error!(task_name = %task_name, error = %e, "❌ Task failed");
                }
            }
            result
        });
    }

    /// 登记拉模式客户端，停机超时强制取消任务时仍能关闭它
    pub(crate) fn add_pull_consumer(&mut self, name: &str, client: Arc<dyn PullConsumerClient>) {
        self.pull_consumers.push((name.to_string(), client));
    }

    pub(crate) fn add_push_consumer(&mut self, name: &str, client: Arc<dyn PushConsumerClient>) {
        self.push_consumers.push((name.to_string(), client));
    }

    pub(crate) fn set_producer_client(&mut self, client: Arc<dyn ProducerClient>) {
        self.producer_client = Some(client);
    }

    pub(crate) fn add_producer(&mut self, producer: Producer) {
        self.producers
            .insert(producer.binding().name.clone(), producer);
    }

    pub(crate) fn add_consumer_binding(&mut self, binding: ConsumerBinding) {
        self.consumers.push(binding);
    }

    /// 按注册名称获取生产者
    pub fn producer(&self, name: &str) -> Option<&Producer> {
        self.producers.get(name)
    }

    /// 已激活的消费者 binding，按激活顺序
    pub fn consumers(&self) -> &[ConsumerBinding] {
        &self.consumers
    }

    pub fn consumer(&self, name: &str) -> Option<&ConsumerBinding> {
        self.consumers.iter().find(|binding| binding.name == name)
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// 正在运行的后台任务数量
    pub fn running_tasks(&self) -> usize {
        self.join_set.len()
    }

    /// 运行直到收到 Ctrl+C，然后优雅停机
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received (Ctrl+C)");
        })
        .await
    }

    /// 运行直到 `signal` 完成，然后优雅停机
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            consumers = self.consumers.len(),
            producers = self.producers.len(),
            tasks = self.join_set.len(),
            "MQ runtime is running"
        );
        signal.await;
        self.shutdown().await
    }

    /// 停止所有拉取循环、推模式客户端和生产者客户端
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down MQ runtime...");

        for (task_name, shutdown_tx) in self.task_shutdowns.drain(..) {
            if shutdown_tx.send(()).is_err() {
                warn!(task_name = %task_name, "Task already stopped before shutdown signal");
            }
        }
        Self::wait_for_tasks_shutdown(&self.config, &mut self.join_set).await;

        // 拉取循环正常退出时已关闭过客户端，这里重复关闭是无害的
        for (name, client) in self.pull_consumers.drain(..) {
            client.shutdown().await;
            info!(consumer = %name, "Pull consumer stopped");
        }

        for (name, client) in self.push_consumers.drain(..) {
            client.shutdown().await;
            info!(consumer = %name, "Push consumer stopped");
        }

        if let Some(client) = self.producer_client.take() {
            client.shutdown().await;
            info!("Producer client stopped");
        }

        info!("MQ runtime stopped");
        Ok(())
    }

    /// 等待所有任务关闭
    async fn wait_for_tasks_shutdown(
        config: &RuntimeConfig,
        join_set: &mut JoinSet<TaskResult>,
    ) {
        match tokio::time::timeout(
            config.shutdown_timeout,
            async {
                while let Some(result) = join_set.join_next().await {
                    match result {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            warn!("Task completed with error: {}", e);
                        }
                        Err(e) => {
                            warn!("Task join error: {}", e);
                        }
                    }
                }
            }
        ).await {
            Ok(_) => {
                info!("All tasks completed");
            }
            Err(_) => {
                warn!("Tasks shutdown timeout, forcing exit");
                join_set.abort_all();
            }
        }
    }
}
