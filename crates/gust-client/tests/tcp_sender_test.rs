use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration, Instant};

use gust_client::TcpSender;
use gust_core::{Delivery, FrameCodec, ProduceAck, RunConfig, SendError, Sender, StopReason};
use gust_engine::LoadController;

/// How the stub broker answers each request
#[derive(Clone, Copy)]
enum Behavior {
    Ack,
    Reject,
    /// Drop the first connection without answering, ack afterwards
    DropFirst,
    Silent,
}

async fn spawn_broker(behavior: Behavior) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let requests = Arc::new(AtomicUsize::new(0));

    let counter = requests.clone();
    tokio::spawn(async move {
        let mut connections = 0;
        while let Ok((mut socket, _)) = listener.accept().await {
            connections += 1;
            let first = connections == 1;
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut offset = 0;
                while let Ok(Some(req)) = FrameCodec::read_request(&mut socket).await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(req.topic, "test-topic");

                    let ack = match behavior {
                        Behavior::Ack => ProduceAck::Accepted(Delivery {
                            partition: 0,
                            offset,
                        }),
                        Behavior::Reject => ProduceAck::Rejected("topic is read-only".to_string()),
                        Behavior::DropFirst if first => return,
                        Behavior::DropFirst => ProduceAck::Accepted(Delivery {
                            partition: 0,
                            offset,
                        }),
                        Behavior::Silent => {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            return;
                        }
                    };
                    offset += 1;
                    if FrameCodec::write_ack(&mut socket, &ack).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (addr, requests)
}

fn payload() -> Bytes {
    Bytes::from_static(br#"{"worker_id":0,"sequence":0}"#)
}

#[tokio::test]
async fn test_send_returns_delivery() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (addr, requests) = spawn_broker(Behavior::Ack).await;
    let sender = TcpSender::new(&addr, "test-topic").unwrap();
    sender.connect().await.unwrap();

    for expected in 0..3 {
        let delivery = sender.send(payload()).await.unwrap();
        assert_eq!(delivery.offset, expected);
    }
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    sender.close().await.unwrap();
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let (addr, requests) = spawn_broker(Behavior::Reject).await;
    let sender = TcpSender::new(&addr, "test-topic").unwrap();

    let err = sender.send(payload()).await.unwrap_err();
    assert!(matches!(err, SendError::Rejected(_)));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retries_after_dropped_connection() {
    let (addr, requests) = spawn_broker(Behavior::DropFirst).await;
    let sender = TcpSender::new(&addr, "test-topic")
        .unwrap()
        .with_max_retries(2);

    let delivery = sender.send(payload()).await.unwrap();
    assert_eq!(delivery.offset, 0);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_unreachable_broker_fails_after_retries() {
    let addr = closed_port().await;

    let sender = TcpSender::new(&addr, "test-topic")
        .unwrap()
        .with_max_retries(1);

    let err = sender.send(payload()).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::Connection(_) | SendError::Io(_) | SendError::Timeout(_)
    ));
}

#[tokio::test]
async fn test_request_timeout() {
    let (addr, _requests) = spawn_broker(Behavior::Silent).await;
    let sender = TcpSender::new(&addr, "test-topic")
        .unwrap()
        .with_max_retries(0)
        .with_request_timeout(Duration::from_millis(100));

    let err = sender.send(payload()).await.unwrap_err();
    assert!(matches!(err, SendError::Timeout(_)));
}

#[tokio::test]
async fn test_delivery_timeout_bounds_send() {
    let (addr, _requests) = spawn_broker(Behavior::Silent).await;
    let sender = TcpSender::new(&addr, "test-topic")
        .unwrap()
        .with_delivery_timeout(Duration::from_millis(200));

    let start = Instant::now();
    let err = sender.send(payload()).await.unwrap_err();

    assert!(matches!(err, SendError::Timeout(t) if t == Duration::from_millis(200)));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_backoff_resets_per_send() {
    let addr = closed_port().await;
    let sender = TcpSender::new(&addr, "test-topic")
        .unwrap()
        .with_max_retries(3);

    // 100 + 200 + 400 ms plus jitter, for every message
    for _ in 0..3 {
        let start = Instant::now();
        assert!(sender.send(payload()).await.is_err());
        assert!(start.elapsed() < Duration::from_millis(1500));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dead_broker_drains_promptly() {
    let addr = closed_port().await;
    let sender = Arc::new(
        TcpSender::new(&addr, "test-topic")
            .unwrap()
            .with_max_retries(3),
    );
    let mut controller = LoadController::new(sender);
    let config = RunConfig::new(4, 10);

    let start = Instant::now();
    let report = controller
        .run(&config, sleep(Duration::from_millis(500)))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    // Stop at 500ms, plus at most one in-flight send per worker
    assert!(elapsed < Duration::from_secs(2), "drain took {:?}", elapsed);
    assert_eq!(report.stop_reason, StopReason::Signal);
    assert_eq!(report.total_sent(), 0);
    assert_eq!(report.total_failed(), 4);
}
