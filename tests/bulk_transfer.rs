//! 500 back-to-back 1 MB publishes followed by one 1-byte publish, with the
//! same client subscribed to its own subject: in/out counters must match
//! exactly and a sync subscriber must see every message in wire order.

mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex as AsyncMutex;

use pubsub_client::{Client, ClientOptions, DeliveryMode};
use support::MiniBroker;

#[tokio::test]
async fn five_hundred_one_mb_messages_then_one_byte_are_delivered_in_order() {
    let broker = MiniBroker::start_with_max_payload(2 * 1024 * 1024).await;
    let options = ClientOptions::builder().servers(broker.servers()).build().unwrap();
    let client = Client::connect(options).await.unwrap();

    let received_lens: Arc<AsyncMutex<Vec<usize>>> = Arc::new(AsyncMutex::new(Vec::with_capacity(501)));
    let received_clone = received_lens.clone();
    let sub = client
        .subscribe("bulk", DeliveryMode::Sync, move |msg| {
            let received = received_clone.clone();
            async move {
                received.lock().await.push(msg.payload.len());
            }
        })
        .await
        .unwrap();

    client.flush(Duration::from_secs(1)).await.unwrap();

    let big = Bytes::from(vec![b'x'; 1_000_000]);
    for _ in 0..500 {
        client.publish("bulk", big.clone()).await.unwrap();
    }
    client.publish("bulk", Bytes::from_static(b"!")).await.unwrap();

    client.flush(Duration::from_secs(30)).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        if received_lens.lock().await.len() == 501 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "not all 501 messages were delivered in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let lens = received_lens.lock().await;
    assert_eq!(lens.len(), 501);
    assert!(lens[..500].iter().all(|&l| l == 1_000_000), "first 500 deliveries must be the 1 MB payload");
    assert_eq!(lens[500], 1, "the 501st delivery must be the trailing 1-byte publish");

    let snap = client.stats();
    assert_eq!(snap.out_msgs, 501);
    assert_eq!(snap.out_bytes, 500_000_001);
    assert_eq!(snap.in_msgs, 501);
    assert_eq!(snap.in_bytes, 500_000_001);

    sub.unsubscribe().await.unwrap();
    client.close().await;
    broker.stop().await;
}
