//! Flare MQ Starter Library
//!
//! Declarative wiring of message producers and consumers, plus the consumption engine
//! behind them: message decoding, the retry-limit guard, push dispatch and the manual
//! pull loop that owns per-queue offsets.

pub mod config;
pub mod error;
pub mod logging;

// 消费引擎
pub mod codec;
pub mod consumer;
pub mod retry;

// broker 边界与实现
pub mod broker;
pub mod producer;

// 装配与运行时
pub mod metrics;
pub mod runtime;
pub mod wiring;

// Re-exports
pub use config::{LoggingConfig, MqConfig, MqProperties, PullSettings};
pub use error::{ErrorBuilder, ErrorCategory, ErrorCode, InfraResult, InfraResultExt, MqError, Result};
pub use logging::init_tracing;

pub use codec::{DecodeError, decode, encode, try_decode};
pub use consumer::{
    BindingKey, BindingProvider, MessageHandler, MessageOutcome, MessagePipeline, MessageProcessor,
    PullLoopEngine, PushDispatcher,
};
pub use retry::{BackoffPolicy, ExponentialBackoffPolicy, FixedBackoffPolicy, RetryGuard};

pub use broker::{
    BrokerConnector, ClientOptions, ConsumeContext, ConsumeMode, ConsumeStatus, MemoryBroker,
    MemoryBrokerConfig, MessageListener, MessageModel, OutgoingMessage, ProducerClient,
    PullConsumerClient, PullResult, PullStatus, PushConsumerClient, QueueId, RawMessage,
    SendResult, SubscriptionExpression,
};
pub use producer::Producer;

pub use metrics::{ConsumeMetrics, ConsumeStats, MetricsRegistry};
pub use runtime::{MessageConsumer, MessageConsumerTask, MqRuntime, RuntimeConfig, Task, TaskResult};
pub use wiring::{
    ConsumerBinding, ConsumerDefinition, ConsumerRegistration, DeliveryKind, EnvPropertySource,
    LayeredPropertySource, MqBootstrap, ProducerBinding, ProducerDefinition, ProducerRegistration,
    PropertySource,
};

// Kafka 实现 re-exports（可选）
#[cfg(feature = "kafka")]
pub use broker::kafka::{KafkaBroker, KafkaBrokerConfig};
