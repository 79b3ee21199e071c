//! Request/reply over a freshly generated inbox subject.

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pubsub_client::{Client, ClientOptions, DeliveryMode};
use support::MiniBroker;

#[tokio::test]
async fn request_receives_reply_from_responder() {
    let broker = MiniBroker::start().await;
    let options = ClientOptions::builder().servers(broker.servers()).build().unwrap();
    let client = Client::connect(options).await.unwrap();
    let responder = client.clone();

    let sub = responder
        .subscribe("math.double", DeliveryMode::Async, move |msg| {
            let responder = responder.clone();
            async move {
                if let Some(reply) = msg.reply.clone() {
                    let n: i64 = String::from_utf8_lossy(&msg.payload).parse().unwrap_or(0);
                    let _ = responder.publish(reply, (n * 2).to_string()).await;
                }
            }
        })
        .await
        .unwrap();

    let reply = client
        .request("math.double", "21", Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(&reply.payload[..], b"42");

    sub.unsubscribe().await.unwrap();
    client.close().await;
    broker.stop().await;
}

#[tokio::test]
async fn request_times_out_without_a_responder() {
    let broker = MiniBroker::start().await;
    let options = ClientOptions::builder().servers(broker.servers()).build().unwrap();
    let client = Client::connect(options).await.unwrap();

    let result = client
        .request("nobody.listening", "ping", Duration::from_millis(200))
        .await;

    assert!(matches!(result, Err(pubsub_client::Error::Timeout)));

    client.close().await;
    broker.stop().await;
}

#[tokio::test]
async fn request_multi_collects_exactly_the_expected_replies() {
    let broker = MiniBroker::start().await;
    let options = ClientOptions::builder().servers(broker.servers()).build().unwrap();
    let client = Client::connect(options).await.unwrap();
    let responder = client.clone();

    let sub = responder
        .subscribe("help", DeliveryMode::Async, move |msg| {
            let responder = responder.clone();
            async move {
                if let Some(reply) = msg.reply.clone() {
                    for n in 1..=3 {
                        let _ = responder.publish(reply.clone(), format!("ok:{n}")).await;
                    }
                }
            }
        })
        .await
        .unwrap();

    let replies = Arc::new(std::sync::Mutex::new(Vec::new()));
    let replies_clone = replies.clone();
    let count = Arc::new(AtomicU64::new(0));
    let count_clone = count.clone();

    client
        .request_multi("help", "please", 2, Duration::from_secs(2), move |msg| {
            let replies = replies_clone.clone();
            let count = count_clone.clone();
            async move {
                replies.lock().unwrap().push(String::from_utf8_lossy(&msg.payload).to_string());
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

    // Give the (discarded) third reply a moment to arrive, if it was going to.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(&replies.lock().unwrap()[..], &["ok:1".to_string(), "ok:2".to_string()]);

    sub.unsubscribe().await.unwrap();
    client.close().await;
    broker.stop().await;
}
