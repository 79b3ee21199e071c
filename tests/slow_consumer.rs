//! A subscriber whose handler never returns must not stall the connection,
//! and once its bounded channel fills, the manager must drop further
//! messages for that subscription rather than block the read loop.

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pubsub_client::client::connection::ConnectionState;
use pubsub_client::{Client, ClientOptions, DeliveryMode, Error};
use support::MiniBroker;

#[tokio::test]
async fn stuck_subscriber_does_not_block_other_subscriptions() {
    let broker = MiniBroker::start().await;

    let saw_slow_consumer = Arc::new(AtomicU64::new(0));
    let saw_slow_consumer_clone = saw_slow_consumer.clone();

    let mut options = ClientOptions::default();
    options.servers = broker.servers();
    options.pending_msgs_limit = 1;
    options.callbacks.error = Some(Arc::new(move |err| {
        let counter = saw_slow_consumer_clone.clone();
        Box::pin(async move {
            if matches!(err, Error::SlowConsumer { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }));

    let client = Client::connect(options).await.unwrap();

    let _stuck = client
        .subscribe("stuck", DeliveryMode::Async, |_msg| std::future::pending::<()>())
        .await
        .unwrap();

    let healthy_count = Arc::new(AtomicU64::new(0));
    let healthy_clone = healthy_count.clone();
    let _healthy = client
        .subscribe("healthy", DeliveryMode::Async, move |_msg| {
            let healthy = healthy_clone.clone();
            async move {
                healthy.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

    client.flush(Duration::from_secs(1)).await.unwrap();

    // Fill and overflow the stuck subscription's single-slot channel.
    client.publish("stuck", "one").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.publish("stuck", "two").await.unwrap();
    client.publish("stuck", "three").await.unwrap();

    // The healthy subscription and the connection itself must still work.
    client.publish("healthy", "ping").await.unwrap();
    client.flush(Duration::from_secs(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(healthy_count.load(Ordering::SeqCst), 1);
    assert!(matches!(client.state(), ConnectionState::Connected));
    assert!(
        saw_slow_consumer.load(Ordering::SeqCst) > 0,
        "error_cb should have observed at least one SlowConsumer"
    );

    client.close().await;
    broker.stop().await;
}
