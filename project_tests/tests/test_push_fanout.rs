use futures_util::StreamExt;
use lib_telemetry::connections::{MemoryStore, SampleStore};
use lib_telemetry::model::BroadcastEvent;
use project_tests::{TestServer, sample};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(server: &TestServer) -> Viewer {
    let (ws, _) = connect_async(server.ws_url.as_str()).await.unwrap();
    ws
}

/// Next push frame as JSON, skipping control frames. Panics after 5s.
async fn next_push(ws: &mut Viewer) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(text.as_str()).unwrap(),
                Some(Ok(Message::Close(_))) | None => panic!("connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("read failed: {}", e),
            }
        }
    })
    .await
    .expect("no push frame within 5s")
}

async fn assert_silent(ws: &mut Viewer, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(window, ws.next()).await {
        panic!("unexpected push frame: {}", text);
    }
}

#[tokio::test]
async fn existing_samples_are_seeded_and_the_next_one_is_pushed() {
    let store = Arc::new(MemoryStore::new());
    for temperature in [60, 61, 62] {
        store.insert(sample(1234567, temperature, 30)).await.unwrap();
    }
    let server = TestServer::start(Arc::clone(&store)).await;

    let mut viewer = connect(&server).await;
    server.wait_for_viewers(1).await;
    assert_silent(&mut viewer, Duration::from_millis(200)).await;

    store.insert(sample(1234567, 65, 0)).await.unwrap();
    let frame = next_push(&mut viewer).await;
    assert_eq!(frame["event"], "new_data");
    let data = &frame["data"];
    assert_eq!(data["CPU"], "Intel i7");
    assert_eq!(data["RAM"], 17179869184i64);
    assert_eq!(data["Temperature"], 65);
    assert_eq!(data["ID"], 1234567);
    let timestamp = data["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

    // The same growth is never pushed twice.
    assert_silent(&mut viewer, Duration::from_millis(300)).await;
    server.stop().await;
}

#[tokio::test]
async fn every_viewer_gets_the_event_and_late_viewers_get_no_backfill() {
    let store = Arc::new(MemoryStore::new());
    let server = TestServer::start(Arc::clone(&store)).await;

    let mut early = connect(&server).await;
    server.wait_for_viewers(1).await;
    store.insert(sample(1234567, 70, 0)).await.unwrap();
    assert_eq!(next_push(&mut early).await["data"]["Temperature"], 70);

    let mut late = connect(&server).await;
    server.wait_for_viewers(2).await;
    store.insert(sample(7654321, 71, 0)).await.unwrap();

    let first_for_late = next_push(&mut late).await;
    assert_eq!(first_for_late["data"]["ID"], 7654321);
    assert_eq!(first_for_late["data"]["Temperature"], 71);
    assert_eq!(next_push(&mut early).await["data"]["ID"], 7654321);
    server.stop().await;
}

#[tokio::test]
async fn a_burst_between_polls_pushes_only_the_newest() {
    let store = Arc::new(MemoryStore::new());
    store.insert(sample(1234567, 50, 10)).await.unwrap();
    let server = TestServer::start(Arc::clone(&store)).await;
    let mut viewer = connect(&server).await;
    server.wait_for_viewers(1).await;

    // MemoryStore inserts never yield, so on this single-threaded runtime the
    // detector cannot poll in between and sees both in one cycle.
    store.insert(sample(1234567, 51, 0)).await.unwrap();
    store.insert(sample(1234567, 52, 0)).await.unwrap();

    assert_eq!(next_push(&mut viewer).await["data"]["Temperature"], 52);
    assert_silent(&mut viewer, Duration::from_millis(300)).await;
    server.stop().await;
}

#[tokio::test]
async fn closed_viewers_are_unsubscribed() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut viewer = connect(&server).await;
    server.wait_for_viewers(1).await;
    viewer.close(None).await.unwrap();
    server.wait_for_viewers(0).await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_viewer_that_stops_reading_is_dropped_after_the_send_timeout() {
    const FRAMES: usize = 40;
    // Queues large enough that only the socket write can stall.
    let server = TestServer::start_with(Arc::new(MemoryStore::new()), |config| {
        config.viewer_buffer = Some(4 * FRAMES);
        config.viewer_send_timeout_ms = Some(300);
    })
    .await;

    let _stalled = connect(&server).await;
    server.wait_for_viewers(1).await;
    let mut reader = connect(&server).await;
    server.wait_for_viewers(2).await;

    let reading = tokio::spawn(async move {
        let mut received = 0;
        while received < FRAMES {
            let frame = next_push(&mut reader).await;
            assert_eq!(frame["data"]["Temperature"], received as i64);
            received += 1;
        }
        received
    });

    let broadcaster = server.broadcaster();
    for i in 0..FRAMES {
        let mut big = sample(1234567, i as i32, 0);
        big.cpu_descriptor = "x".repeat(1 << 20);
        broadcaster.publish(BroadcastEvent::new(big, i as u64 + 1));
        tokio::task::yield_now().await;
    }

    assert_eq!(reading.await.unwrap(), FRAMES);
    server.wait_for_viewers(1).await;
    server.stop().await;
}

#[tokio::test]
async fn detector_survives_a_store_outage() {
    let store = Arc::new(MemoryStore::new());
    let server = TestServer::start(Arc::clone(&store)).await;
    let mut viewer = connect(&server).await;
    server.wait_for_viewers(1).await;

    store.set_available(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.set_available(true);
    store.insert(sample(2345678, 80, 0)).await.unwrap();

    assert_eq!(next_push(&mut viewer).await["data"]["ID"], 2345678);
    server.stop().await;
}
