use kafka_browser::broker::{BrokerClient, MemoryBroker, OutgoingMessage, TopicSubscription};
use kafka_browser::session::{
    ConsumerSessionManager, RecordSink, SessionManagerConfig, SessionPhase, SessionRegistry,
    StartSessionRequest,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_manager(broker: &MemoryBroker, data_path: &Path) -> ConsumerSessionManager {
    let client: Arc<dyn BrokerClient> = Arc::new(broker.clone());
    ConsumerSessionManager::new(
        client,
        Arc::new(SessionRegistry::new()),
        Arc::new(RecordSink::new(data_path).with_sync_writes(false)),
        SessionManagerConfig::default(),
    )
}

async fn read_entries(path: &Path, expected: usize) -> String {
    for _ in 0..300 {
        if let Ok(content) = tokio::fs::read_to_string(path).await
            && content.matches("----\n").count() >= expected
        {
            return content;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {} entries", path.display(), expected);
}

#[tokio::test]
async fn test_each_topic_gets_its_own_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 3).await;
    broker.create_topic("payments", 1).await;
    let manager = create_manager(&broker, temp_dir.path());

    let references = manager
        .start_session(
            StartSessionRequest::new(["orders", "payments"])
                .with_group_id("audit")
                .with_timeout("5"),
        )
        .await
        .unwrap();
    assert_eq!(references.len(), 2);
    assert_eq!(references[0].topic, "orders");
    assert_eq!(references[1].topic, "payments");

    for i in 0..6 {
        broker
            .publish("orders", OutgoingMessage::value(format!("order-{i}")).with_key(format!("customer-{i}")))
            .await
            .unwrap();
    }
    broker
        .publish("payments", OutgoingMessage::value("payment-0"))
        .await
        .unwrap();

    let orders = read_entries(&temp_dir.path().join("audit-orders.txt"), 6).await;
    let payments = read_entries(&temp_dir.path().join("audit-payments.txt"), 1).await;

    for i in 0..6 {
        assert!(orders.contains(&format!("value=order-{i}\n")));
    }
    assert!(!orders.contains("payment-0"));
    assert!(payments.contains("value=payment-0\n"));
}

#[tokio::test]
async fn test_reusing_a_group_resumes_from_committed_offsets() {
    let temp_dir = TempDir::new().unwrap();
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 1).await;
    let manager = create_manager(&broker, temp_dir.path());

    let request = || {
        let mut request = StartSessionRequest::new(Vec::<String>::new())
            .with_group_id("replay")
            .with_timeout("0.2");
        request.topics.push(TopicSubscription::new("orders").from_beginning());
        request
    };

    broker.publish("orders", OutgoingMessage::value("one")).await.unwrap();
    manager.start_session(request()).await.unwrap();
    let path = temp_dir.path().join("replay-orders.txt");
    read_entries(&path, 1).await;

    // Let the first session expire before publishing more
    for _ in 0..300 {
        if manager.session_status("replay").await.unwrap().phase == SessionPhase::Expired {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    broker.publish("orders", OutgoingMessage::value("two")).await.unwrap();

    manager.start_session(request()).await.unwrap();
    let content = read_entries(&path, 2).await;

    // The committed offset wins over fromBeginning, so "one" is not repeated
    assert_eq!(content.matches("value=one\n").count(), 1);
    assert_eq!(content.matches("value=two\n").count(), 1);
    assert_eq!(broker.committed_offset("replay", "orders", 0).await, Some(2));
}

#[tokio::test]
async fn test_zero_budget_expires_immediately() {
    let temp_dir = TempDir::new().unwrap();
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 1).await;
    let manager = create_manager(&broker, temp_dir.path());

    manager
        .start_session(
            StartSessionRequest::new(["orders"])
                .with_group_id("flash")
                .with_timeout("0"),
        )
        .await
        .unwrap();

    for _ in 0..300 {
        if broker.connected_consumers("flash").await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broker.connected_consumers("flash").await, 0);
    assert_eq!(broker.disconnect_count(), 1);
    assert_eq!(manager.registry().pending_count(), 0);
}
