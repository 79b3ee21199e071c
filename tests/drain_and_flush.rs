//! Draining unsubscribes everything and lets in-flight work settle before
//! the connection closes.

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pubsub_client::client::connection::ConnectionState;
use pubsub_client::{Client, ClientOptions, DeliveryMode, Error};
use support::MiniBroker;

#[tokio::test]
async fn drain_completes_and_stops_delivery() {
    let broker = MiniBroker::start().await;
    let options = ClientOptions::builder()
        .servers(broker.servers())
        .build()
        .unwrap();
    let client = Client::connect(options).await.unwrap();

    let delivered_after_drain = Arc::new(AtomicU64::new(0));
    let delivered_clone = delivered_after_drain.clone();
    let sub = client
        .subscribe("telemetry", DeliveryMode::Async, move |_msg| {
            let delivered = delivered_clone.clone();
            async move {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

    client.flush(Duration::from_secs(1)).await.unwrap();

    let drain_result = tokio::time::timeout(Duration::from_secs(2), client.drain()).await;
    assert!(drain_result.is_ok(), "drain should complete within its deadline");
    assert!(drain_result.unwrap().is_ok());

    // Per the drain contract: every subscription is gone and the connection
    // is closed by the time the future resolves, not merely "draining
    // started".
    assert!(matches!(client.state(), ConnectionState::Closed));
    assert!(client.publish("telemetry", "too late").await.is_err());
    drop(sub);

    broker.stop().await;
}

#[tokio::test]
async fn drain_exceeding_deadline_reports_timeout_and_closes() {
    let broker = MiniBroker::start().await;
    let mut options = ClientOptions::default();
    options.servers = broker.servers();
    options.drain_timeout_ms = 150;

    let client = Client::connect(options).await.unwrap();

    // A sync handler that never returns means its dispatcher can never
    // finish draining, so the deadline must fire.
    let _stuck = client
        .subscribe("stuck", DeliveryMode::Sync, |_msg| std::future::pending::<()>())
        .await
        .unwrap();

    client.flush(Duration::from_secs(1)).await.unwrap();
    client.publish("stuck", "wake up the dispatcher").await.unwrap();
    client.flush(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let drain_result = tokio::time::timeout(Duration::from_secs(5), client.drain()).await;
    assert!(drain_result.is_ok(), "drain() must itself resolve, reporting the timeout");
    assert!(matches!(drain_result.unwrap(), Err(Error::DrainTimeout)));
    assert!(matches!(client.state(), ConnectionState::Closed));

    broker.stop().await;
}

#[tokio::test]
async fn flush_returns_once_server_acknowledges() {
    let broker = MiniBroker::start().await;
    let options = ClientOptions::builder()
        .servers(broker.servers())
        .build()
        .unwrap();
    let client = Client::connect(options).await.unwrap();

    client.publish("scratch", "noop").await.unwrap();
    let result = client.flush(Duration::from_secs(2)).await;
    assert!(result.is_ok());

    client.close().await;
    broker.stop().await;
}
