//! 推模式投递适配测试
//!
//! 验证顺序 / 并发两种模式下批次的串行化与失败状态。

use async_trait::async_trait;
use flare_mq_starter::{
    BindingProvider, ConsumeContext, ConsumeMode, ConsumeStatus, MessageHandler, MessagePipeline,
    MessageProcessor, PushDispatcher, QueueId, RawMessage, RetryGuard,
};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;
use tokio::time::{Duration, sleep, timeout};

#[derive(Debug, Deserialize)]
struct Step {
    label: String,
    #[serde(default)]
    fail: bool,
    #[serde(default)]
    delay_ms: u64,
}

/// 记录开始 / 结束事件的 handler
#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BindingProvider for Journal {}

#[async_trait]
impl MessageHandler for Journal {
    type Message = Step;

    async fn process(&self, _message_key: &str, _tag: &str, step: Step) -> bool {
        self.events.lock().unwrap().push(format!("start:{}", step.label));
        if step.delay_ms > 0 {
            sleep(Duration::from_millis(step.delay_ms)).await;
        }
        self.events.lock().unwrap().push(format!("end:{}", step.label));
        !step.fail
    }
}

fn dispatcher(mode: ConsumeMode, max_retries: u32) -> (Arc<PushDispatcher>, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let processor: Arc<dyn MessageProcessor> = Arc::new(MessagePipeline::new(
        "audit-consumer",
        journal.clone(),
        RetryGuard::new(max_retries),
    ));
    (Arc::new(PushDispatcher::new(processor, mode)), journal)
}

fn context(queue_id: u32, mode: ConsumeMode) -> ConsumeContext {
    ConsumeContext {
        queue: QueueId::new("AUDIT", "broker-a", queue_id),
        mode,
    }
}

fn step(label: &str, delay_ms: u64) -> RawMessage {
    RawMessage::new(
        label,
        "AUDIT",
        format!(r#"{{"label": "{}", "delay_ms": {}}}"#, label, delay_ms),
    )
}

fn failing_step(label: &str) -> RawMessage {
    RawMessage::new(label, "AUDIT", format!(r#"{{"label": "{}", "fail": true}}"#, label))
}

#[tokio::test]
async fn ordered_mode_serializes_batches_of_the_same_queue() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Ordered, 5);
    let ctx = context(0, ConsumeMode::Ordered);

    let first = {
        let dispatcher = dispatcher.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { dispatcher.dispatch(&ctx, vec![step("a1", 50), step("a2", 0)]).await })
    };
    // 让第一批先拿到队列锁
    sleep(Duration::from_millis(10)).await;
    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(&ctx, vec![step("b1", 0)]).await })
    };

    assert_eq!(first.await.unwrap(), ConsumeStatus::Success);
    assert_eq!(second.await.unwrap(), ConsumeStatus::Success);
    assert_eq!(
        journal.events(),
        vec!["start:a1", "end:a1", "start:a2", "end:a2", "start:b1", "end:b1"]
    );
}

#[tokio::test]
async fn ordered_mode_does_not_block_other_queues() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Ordered, 5);
    let barrier = Arc::new(Barrier::new(2));

    let slow = {
        let dispatcher = dispatcher.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            dispatcher
                .dispatch(&context(0, ConsumeMode::Ordered), vec![step("slow", 200)])
                .await
        })
    };
    barrier.wait().await;
    sleep(Duration::from_millis(20)).await;

    // 另一个队列无需等待慢批次结束
    let status = timeout(
        Duration::from_millis(150),
        dispatcher.dispatch(&context(1, ConsumeMode::Ordered), vec![step("fast", 0)]),
    )
    .await
    .expect("queue 1 waited for queue 0");
    assert_eq!(status, ConsumeStatus::Success);
    assert_eq!(slow.await.unwrap(), ConsumeStatus::Success);

    let events = journal.events();
    let fast_end = events.iter().position(|e| e == "end:fast").unwrap();
    let slow_end = events.iter().position(|e| e == "end:slow").unwrap();
    assert!(fast_end < slow_end);
}

#[tokio::test]
async fn concurrent_mode_interleaves_batches() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Concurrent, 5);
    let ctx = context(0, ConsumeMode::Concurrent);

    let (a, b) = tokio::join!(
        dispatcher.dispatch(&ctx, vec![step("a", 50)]),
        dispatcher.dispatch(&ctx, vec![step("b", 50)]),
    );

    assert_eq!(a, ConsumeStatus::Success);
    assert_eq!(b, ConsumeStatus::Success);
    let events = journal.events();
    assert_eq!(&events[..2], ["start:a", "start:b"]);
}

#[tokio::test]
async fn concurrent_failure_requests_reconsume_later() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Concurrent, 5);

    let status = dispatcher
        .dispatch(
            &context(0, ConsumeMode::Concurrent),
            vec![step("ok", 0), failing_step("bad"), step("never", 0)],
        )
        .await;

    assert_eq!(status, ConsumeStatus::ReconsumeLater);
    // 失败后不再处理本批剩余的消息
    assert_eq!(journal.events(), vec!["start:ok", "end:ok", "start:bad", "end:bad"]);
}

#[tokio::test]
async fn ordered_failure_suspends_current_queue() {
    let (dispatcher, _) = dispatcher(ConsumeMode::Ordered, 5);

    let status = dispatcher
        .dispatch(&context(0, ConsumeMode::Ordered), vec![failing_step("bad")])
        .await;

    assert_eq!(status, ConsumeStatus::SuspendCurrentQueue);
}

#[tokio::test]
async fn exhausted_message_is_acknowledged_without_processing() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Concurrent, 3);

    let status = dispatcher
        .dispatch(
            &context(0, ConsumeMode::Concurrent),
            vec![failing_step("bad").with_reconsume_count(3)],
        )
        .await;

    assert_eq!(status, ConsumeStatus::Success);
    assert!(journal.events().is_empty());
}

#[tokio::test]
async fn undecodable_body_does_not_fail_the_batch() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Concurrent, 5);

    let status = dispatcher
        .dispatch(
            &context(0, ConsumeMode::Concurrent),
            vec![RawMessage::new("junk", "AUDIT", "not json"), step("ok", 0)],
        )
        .await;

    assert_eq!(status, ConsumeStatus::Success);
    assert_eq!(journal.events(), vec!["start:ok", "end:ok"]);
}

#[tokio::test]
async fn idle_queue_locks_are_pruned() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Ordered, 5);

    for queue_id in 0..32 {
        let status = dispatcher
            .dispatch(&context(queue_id, ConsumeMode::Ordered), vec![step("x", 0)])
            .await;
        assert_eq!(status, ConsumeStatus::Success);
    }

    assert_eq!(journal.events().len(), 64);
    assert_eq!(dispatcher.tracked_queues(), 1);
}

#[tokio::test]
async fn busy_queue_lock_survives_pruning() {
    let (dispatcher, journal) = dispatcher(ConsumeMode::Ordered, 5);

    let slow = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(&context(0, ConsumeMode::Ordered), vec![step("slow", 100)])
                .await
        })
    };
    sleep(Duration::from_millis(20)).await;

    // 新队列触发清理时，队列 0 仍在处理，锁必须保留
    dispatcher
        .dispatch(&context(1, ConsumeMode::Ordered), vec![step("fast", 0)])
        .await;
    assert_eq!(dispatcher.tracked_queues(), 2);

    let queued = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(&context(0, ConsumeMode::Ordered), vec![step("after", 0)])
                .await
        })
    };
    assert_eq!(slow.await.unwrap(), ConsumeStatus::Success);
    assert_eq!(queued.await.unwrap(), ConsumeStatus::Success);

    let events = journal.events();
    let slow_end = events.iter().position(|e| e == "end:slow").unwrap();
    let after_start = events.iter().position(|e| e == "start:after").unwrap();
    assert!(slow_end < after_start);
}
