//! 声明式装配
//!
//! 把注册的消费者 / 生产者解析为 binding，并逐个创建、激活 broker 客户端：
//!
//! - 推模式：订阅 → 注册监听器 → 启动
//! - 拉模式：启动 → 在运行时中启动拉取循环任务
//! - 生产者：存在注册项时才创建唯一的共享客户端
//!
//! 任何一步失败都会停止已经激活的客户端，并返回启动错误。

pub mod binding;
pub mod definition;
pub mod property;
pub mod resolver;

pub use binding::{ConsumerBinding, DeliveryKind, ProducerBinding};
pub use definition::{ConsumerDefinition, ConsumerRegistration, ProducerDefinition, ProducerRegistration};
pub use property::{EnvPropertySource, LayeredPropertySource, PropertySource};
pub use resolver::{resolve_consumer, resolve_producer, resolve_value};

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::broker::{BrokerConnector, ClientOptions};
use crate::config::MqConfig;
use crate::consumer::{PullLoopEngine, PushDispatcher};
use crate::error::{ErrorBuilder, ErrorCode, MqError, Result};
use crate::metrics::MetricsRegistry;
use crate::producer::Producer;
use crate::retry::RetryGuard;
use crate::runtime::{MessageConsumerTask, MqRuntime};

/// 启动器
pub struct MqBootstrap {
    config: MqConfig,
    connector: Arc<dyn BrokerConnector>,
    properties: Arc<dyn PropertySource>,
    consumers: Vec<ConsumerRegistration>,
    producers: Vec<ProducerRegistration>,
    metrics: MetricsRegistry,
}

impl MqBootstrap {
    /// 默认属性源：环境变量优先，其次是配置中的 `[properties]` 表
    pub fn new(config: MqConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let properties = LayeredPropertySource::new()
            .with_layer(Arc::new(EnvPropertySource::new()))
            .with_layer(Arc::new(config.properties.clone()));
        Self {
            config,
            connector,
            properties: Arc::new(properties),
            consumers: Vec::new(),
            producers: Vec::new(),
            metrics: MetricsRegistry::new(),
        }
    }

    /// 替换属性源
    #[must_use]
    pub fn with_property_source(mut self, properties: Arc<dyn PropertySource>) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn add_consumer(mut self, registration: ConsumerRegistration) -> Self {
        info!(consumer = %registration.name(), "Adding consumer registration");
        self.consumers.push(registration);
        self
    }

    #[must_use]
    pub fn add_producer(mut self, registration: ProducerRegistration) -> Self {
        info!(producer = %registration.name(), "Adding producer registration");
        self.producers.push(registration);
        self
    }

    pub fn config(&self) -> &MqConfig {
        &self.config
    }

    /// 解析并激活全部注册项
    pub async fn start(self) -> Result<MqRuntime> {
        let mut runtime =
            MqRuntime::new(self.config.runtime_config()).with_metrics(self.metrics.clone());

        if let Err(err) = self.activate(&mut runtime).await {
            error!(error = %err, "MQ bootstrap failed, stopping activated clients");
            if let Err(e) = runtime.shutdown().await {
                warn!(error = %e, "Failed to stop activated clients");
            }
            return Err(err);
        }

        info!(
            consumers = runtime.consumers().len(),
            producers = self.producers.len(),
            "MQ bootstrap completed"
        );
        Ok(runtime)
    }

    async fn activate(&self, runtime: &mut MqRuntime) -> Result<()> {
        self.check_unique_names()?;
        self.activate_producers(runtime).await?;
        for registration in &self.consumers {
            self.activate_consumer(registration, runtime).await?;
        }
        Ok(())
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self.consumers.iter().map(ConsumerRegistration::name) {
            if !seen.insert(name) {
                return Err(duplicate("consumer", name));
            }
        }
        seen.clear();
        for name in self.producers.iter().map(ProducerRegistration::name) {
            if !seen.insert(name) {
                return Err(duplicate("producer", name));
            }
        }
        Ok(())
    }

    async fn activate_producers(&self, runtime: &mut MqRuntime) -> Result<()> {
        // 只有消费者的应用不需要创建生产者客户端
        if self.producers.is_empty() {
            return Ok(());
        }

        let mq = &self.config.mq;
        if mq.producer_group.trim().is_empty() {
            return Err(MqError::configuration(
                ErrorCode::ProducerGroupMissing,
                "producer group must be defined",
            ));
        }
        resolver::require_name_server(mq)?;

        let client = self
            .connector
            .create_producer(&ClientOptions::new(&mq.producer_group, &mq.name_server_address))?;
        client.start().await?;
        runtime.set_producer_client(client.clone());
        info!(group = %mq.producer_group, "Producer client started");

        for registration in &self.producers {
            let binding = resolve_producer(registration, mq, self.properties.as_ref())?;
            let producer = Producer::new(binding, client.clone(), mq.send_timeout());
            runtime.add_producer(producer);
            info!("{} is ready to produce message", registration.name());
        }
        Ok(())
    }

    async fn activate_consumer(
        &self,
        registration: &ConsumerRegistration,
        runtime: &mut MqRuntime,
    ) -> Result<()> {
        let binding = resolve_consumer(registration, &self.config.mq, self.properties.as_ref())?;
        let Some((_, factory)) = registration.handler.as_ref() else {
            return Err(MqError::configuration(
                ErrorCode::UnsupportedConsumer,
                format!("{} has no handler", binding.name),
            ));
        };

        let processor = factory.build(
            &binding.name,
            RetryGuard::new(binding.max_retries),
            self.metrics.register(&binding.name),
        );
        let options = ClientOptions::new(&binding.consumer_group, &self.config.mq.name_server_address)
            .with_message_model(binding.message_model)
            .with_pull_timeout(self.config.pull.pull_timeout());

        match binding.delivery {
            DeliveryKind::Push => {
                let client = self.connector.create_push_consumer(&options)?;
                client.subscribe(&binding.topic, &binding.subscription()).await?;
                client.register_listener(
                    binding.consume_mode,
                    Arc::new(PushDispatcher::new(processor, binding.consume_mode)),
                );
                client.start().await?;
                runtime.add_push_consumer(&binding.name, client);
            }
            DeliveryKind::Pull => {
                let client = self.connector.create_pull_consumer(&options)?;
                client.start().await?;
                runtime.add_pull_consumer(&binding.name, client.clone());
                let engine = PullLoopEngine::with_settings(
                    &binding.name,
                    &binding.topic,
                    client,
                    processor,
                    &self.config.pull,
                );
                runtime.spawn_task(Box::new(MessageConsumerTask::new(
                    format!("pull-consumer:{}", binding.name),
                    Box::new(engine),
                )));
            }
        }

        info!(
            group = %binding.consumer_group,
            topic = %binding.topic,
            tags = ?binding.tags,
            delivery = %binding.delivery,
            mode = %binding.consume_mode,
            model = %binding.message_model,
            "{} is ready to subscribe message",
            binding.name
        );
        runtime.add_consumer_binding(binding);
        Ok(())
    }
}

fn duplicate(kind: &str, name: &str) -> MqError {
    ErrorBuilder::new(
        ErrorCode::InvalidParameter,
        format!("{} '{}' is registered more than once", kind, name),
    )
    .param("owner", name)
    .build()
}
