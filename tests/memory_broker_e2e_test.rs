//! 内存 broker 端到端测试
//!
//! 通过 `MqBootstrap` 装配生产者与推 / 拉两种消费者，验证发送、消费、重投递与停机。

use async_trait::async_trait;
use flare_mq_starter::{
    BindingProvider, ConsumerDefinition, ConsumerRegistration, MemoryBroker, MemoryBrokerConfig,
    MessageHandler, MetricsRegistry, MqBootstrap, MqConfig, ProducerDefinition,
    ProducerRegistration, RawMessage,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep, timeout};
use tokio_test::assert_ok;

const CONFIG: &str = r#"
[mq]
name_server_address = "memory://local"
producer_group = "order-producer"

[pull]
batch_size = 4
pull_timeout_ms = 50
idle_interval_ms = 20

[runtime]
shutdown_timeout_ms = 2000
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderEvent {
    order_id: u64,
    amount: u64,
}

/// 记录收到的消息，前 `failures` 次处理返回失败
struct OrderHandler {
    failures: AtomicUsize,
    received: Mutex<Vec<(String, String, OrderEvent)>>,
}

impl OrderHandler {
    fn new() -> Arc<Self> {
        Self::failing(0)
    }

    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<(String, String, OrderEvent)> {
        self.received.lock().unwrap().clone()
    }

    fn order_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.received().into_iter().map(|(_, _, e)| e.order_id).collect();
        ids.sort_unstable();
        ids
    }
}

impl BindingProvider for OrderHandler {}

#[async_trait]
impl MessageHandler for OrderHandler {
    type Message = OrderEvent;

    async fn process(&self, message_key: &str, tag: &str, event: OrderEvent) -> bool {
        self.received
            .lock()
            .unwrap()
            .push((message_key.to_string(), tag.to_string(), event));
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err()
    }
}

fn broker() -> MemoryBroker {
    MemoryBroker::with_config(MemoryBrokerConfig {
        queues_per_topic: 2,
        suspend_interval: Duration::from_millis(20),
        idle_interval: Duration::from_millis(20),
        ..MemoryBrokerConfig::default()
    })
}

fn config() -> MqConfig {
    MqConfig::from_toml_str(CONFIG).unwrap()
}

fn bootstrap(broker: &MemoryBroker) -> MqBootstrap {
    MqBootstrap::new(config(), Arc::new(broker.clone()))
        .with_property_source(Arc::new(HashMap::<String, String>::new()))
}

/// 轮询直到条件成立，最多等待 5 秒
async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(Duration::from_secs(5), async {
        while !condition().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn event(order_id: u64) -> OrderEvent {
    OrderEvent {
        order_id,
        amount: order_id * 100,
    }
}

#[tokio::test]
async fn producer_feeds_push_consumer_with_tag_filter() {
    let broker = broker();
    let handler = OrderHandler::new();

    let runtime = bootstrap(&broker)
        .add_producer(ProducerRegistration::new(
            "paid-producer",
            ProducerDefinition::new().with_topic("ORDER").with_tag("paid"),
        ))
        .add_consumer(
            ConsumerRegistration::new(
                "paid-consumer",
                ConsumerDefinition::new()
                    .with_consumer_group("paid-group")
                    .with_topic("ORDER")
                    .with_tags(["paid"]),
            )
            .push(handler.clone()),
        )
        .start()
        .await
        .map_err(|e| e.to_string())
        .unwrap();

    let producer = runtime.producer("paid-producer").unwrap().clone();
    for id in 1..=3 {
        assert_ok!(producer.send(&format!("order-{}", id), &event(id)).await);
    }
    // 其他 tag 的消息不会投递给该消费者
    assert_ok!(producer.send_to("ORDER", Some("created"), Some("order-9"), &event(9)).await);

    eventually(|| async { handler.received().len() >= 3 }).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.order_ids(), vec![1, 2, 3]);
    let received = handler.received();
    let (key, tag, _) = &received[0];
    assert!(key.starts_with("order-"));
    assert_eq!(tag, "paid");

    let stats = runtime.metrics().snapshot("paid-consumer").await.unwrap();
    assert_eq!(stats.processed, 3);

    assert_ok!(runtime.shutdown().await);
}

#[tokio::test]
async fn pull_consumer_drains_and_commits_offsets() {
    let broker = broker();
    let handler = OrderHandler::new();
    for id in 1..=6 {
        let body = serde_json::to_vec(&event(id)).unwrap();
        broker
            .publish("LEDGER", Some("posted"), Some(&format!("ledger-{}", id)), body)
            .unwrap();
    }

    let runtime = bootstrap(&broker)
        .add_consumer(
            ConsumerRegistration::new(
                "ledger-consumer",
                ConsumerDefinition::new()
                    .with_consumer_group("ledger-group")
                    .with_topic("LEDGER"),
            )
            .pull(handler.clone()),
        )
        .start()
        .await
        .map_err(|e| e.to_string())
        .unwrap();
    assert_eq!(runtime.running_tasks(), 1);

    let metrics = runtime.metrics().clone();
    let observed = handler.clone();
    runtime
        .run_until(async move {
            eventually(|| async { observed.received().len() >= 6 }).await;
            eventually(|| async {
                metrics
                    .snapshot("ledger-consumer")
                    .await
                    .map(|stats| stats.commits >= 2)
                    .unwrap_or(false)
            })
            .await;
        })
        .await
        .unwrap();

    assert_eq!(handler.order_ids(), vec![1, 2, 3, 4, 5, 6]);
    let committed: i64 = broker
        .queue_ids("LEDGER")
        .iter()
        .map(|queue| broker.committed_offset("ledger-group", queue).unwrap_or(0))
        .sum();
    assert_eq!(committed, 6);
}

#[tokio::test]
async fn concurrent_redelivery_stops_at_retry_limit() {
    let broker = broker();
    let handler = OrderHandler::failing(usize::MAX);
    let metrics = MetricsRegistry::new();

    let runtime = bootstrap(&broker)
        .with_metrics(metrics.clone())
        .add_consumer(
            ConsumerRegistration::new(
                "refund-consumer",
                ConsumerDefinition::new()
                    .with_consumer_group("refund-group")
                    .with_topic("REFUND")
                    .with_max_retries(2),
            )
            .push(handler.clone()),
        )
        .start()
        .await
        .map_err(|e| e.to_string())
        .unwrap();

    broker
        .publish("REFUND", None, Some("refund-1"), serde_json::to_vec(&event(1)).unwrap())
        .unwrap();

    eventually(|| async {
        metrics
            .snapshot("refund-consumer")
            .await
            .map(|stats| stats.discarded == 1)
            .unwrap_or(false)
    })
    .await;

    // 第 0、1 次投递交给业务处理，第 2 次达到上限后直接确认
    let stats = metrics.snapshot("refund-consumer").await.unwrap();
    assert_eq!(stats.failed, 2);
    assert_eq!(handler.received().len(), 2);
    assert_eq!(broker.message_count("REFUND"), 3);

    assert_ok!(runtime.shutdown().await);
}

#[tokio::test]
async fn ordered_consumer_retries_suspended_queue_in_place() {
    let broker = broker();
    let handler = OrderHandler::failing(1);

    let runtime = bootstrap(&broker)
        .add_consumer(
            ConsumerRegistration::new(
                "audit-consumer",
                ConsumerDefinition::new()
                    .with_consumer_group("audit-group")
                    .with_topic("AUDIT")
                    .with_consume_mode("ORDERLY"),
            )
            .push(handler.clone()),
        )
        .start()
        .await
        .map_err(|e| e.to_string())
        .unwrap();

    let queue = broker.queue_ids("AUDIT")[0].clone();
    for id in 1..=3 {
        broker
            .publish_to_queue(
                &queue,
                RawMessage::new(
                    format!("audit-{}", id),
                    "AUDIT",
                    serde_json::to_vec(&event(id)).unwrap(),
                ),
            )
            .unwrap();
    }

    eventually(|| async { handler.received().len() >= 4 }).await;

    // 第一条失败后原位重试，之后的消息仍保持顺序
    let ids: Vec<u64> = handler.received().into_iter().map(|(_, _, e)| e.order_id).collect();
    assert_eq!(ids, vec![1, 1, 2, 3]);
    assert_eq!(broker.message_count("AUDIT"), 3);

    let stats = runtime.metrics().snapshot("audit-consumer").await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processed, 3);

    assert_ok!(runtime.shutdown().await);
}
