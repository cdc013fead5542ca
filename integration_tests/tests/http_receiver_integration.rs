//! The HTTP transport against an in-process fake receiver
//!
//! The fake answers `/server-info`, `/play` and `/stop` the way photo-capable
//! receivers do and records every request, so the whole path from engine to
//! wire and back through the content server is exercised.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use airplay_slideshow::testing::numbered_images;
use airplay_slideshow::{
    DeviceInfo, DeviceState, EngineConfig, EngineHandle, ErrorKind, HttpTransport, MemoryStore,
    SessionStore, SlideshowConfig, SlideshowEvent,
};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(10);

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct Received {
    plays: Vec<String>,
    stops: u32,
    session_ids: Vec<String>,
}

#[derive(Clone)]
struct Receiver {
    received: Arc<Mutex<Received>>,
    play_status: StatusCode,
}

async fn server_info() -> &'static str {
    "<plist/>"
}

async fn play(State(receiver): State<Receiver>, headers: HeaderMap, body: String) -> StatusCode {
    let mut received = receiver.received.lock().unwrap();
    if let Some(session) = headers.get("X-Apple-Session-ID").and_then(|v| v.to_str().ok()) {
        received.session_ids.push(session.to_string());
    }
    if let Some(url) = body
        .lines()
        .find_map(|line| line.strip_prefix("Content-Location: "))
    {
        received.plays.push(url.trim().to_string());
    }
    receiver.play_status
}

async fn stop(State(receiver): State<Receiver>) -> StatusCode {
    receiver.received.lock().unwrap().stops += 1;
    StatusCode::OK
}

/// Start a fake receiver; returns its address and request log
async fn fake_receiver(play_status: StatusCode) -> (SocketAddr, Arc<Mutex<Received>>) {
    let received = Arc::new(Mutex::new(Received::default()));
    let app = Router::new()
        .route("/server-info", get(server_info))
        .route("/play", post(play))
        .route("/stop", post(stop))
        .with_state(Receiver {
            received: Arc::clone(&received),
            play_status,
        });

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, received)
}

async fn engine_for(devices: &[(&str, SocketAddr)]) -> EngineHandle {
    init();
    let store = Arc::new(MemoryStore::new());
    for (id, addr) in devices {
        let info = DeviceInfo::new(*id, format!("Fake {id}"), IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
        store.save_device(&info).await.unwrap();
    }

    let config = EngineConfig::builder()
        .content_bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .connection_timeout(Duration::from_secs(2))
        .push_policy(Duration::from_secs(2), 1, Duration::from_millis(10))
        .health_check_interval(Duration::from_secs(3600))
        .reconnect_policy(0, Duration::from_millis(50), Duration::from_millis(100))
        .build();
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
    EngineHandle::spawn(config, Arc::new(transport), store)
        .await
        .unwrap()
}

async fn wait_for<F>(events: &mut broadcast::Receiver<SlideshowEvent>, mut matches: F) -> SlideshowEvent
where
    F: FnMut(&SlideshowEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_receivers_fetch_pushed_images() {
    let (living_addr, living) = fake_receiver(StatusCode::OK).await;
    let (hall_addr, hall) = fake_receiver(StatusCode::OK).await;
    let engine = engine_for(&[("living", living_addr), ("hall", hall_addr)]).await;
    let mut events = engine.subscribe();

    engine.connect("living").await.unwrap();
    engine.connect("hall").await.unwrap();

    let images = numbered_images(4).unwrap();
    engine
        .configure(SlideshowConfig::new(
            images.path(),
            vec!["living".to_string(), "hall".to_string()],
            600,
        ))
        .await
        .unwrap();
    engine.start().await.unwrap();
    wait_for(&mut events, |e| matches!(e, SlideshowEvent::ImagesDisplayed { step: 0, .. })).await;

    let living_url = living.lock().unwrap().plays[0].clone();
    let hall_url = hall.lock().unwrap().plays[0].clone();
    assert_ne!(living_url, hall_url);

    let client = reqwest::Client::new();
    for url in [&living_url, &hall_url] {
        let response = client.get(url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "image/jpeg"
        );
        let body = response.bytes().await.unwrap();
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    // One session id per link, repeated on every request
    engine.next().await.unwrap();
    wait_for(&mut events, |e| matches!(e, SlideshowEvent::ImagesDisplayed { step: 1, .. })).await;
    {
        let living = living.lock().unwrap();
        assert_eq!(living.plays.len(), 2);
        assert_eq!(living.session_ids.len(), 2);
        assert_eq!(living.session_ids[0], living.session_ids[1]);
    }

    engine.stop().await.unwrap();
    tokio::time::timeout(WAIT, async {
        while living.lock().unwrap().stops == 0 || hall.lock().unwrap().stops == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_receiver_fails_connect() {
    // Bind and drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        listener.local_addr().unwrap()
    };
    let engine = engine_for(&[("gone", addr)]).await;

    let err = engine.connect("gone").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TransientNetwork));
    let device = engine.devices().await.unwrap().remove(0);
    assert_ne!(device.state, DeviceState::Connected);
    assert!(device.last_error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_receiver_demanding_authorization() {
    let (open_addr, open) = fake_receiver(StatusCode::OK).await;
    let (locked_addr, _) = fake_receiver(StatusCode::from_u16(470).unwrap()).await;
    let engine = engine_for(&[("open", open_addr), ("locked", locked_addr)]).await;
    let mut events = engine.subscribe();

    engine.connect("open").await.unwrap();
    engine.connect("locked").await.unwrap();

    let images = numbered_images(2).unwrap();
    engine
        .configure(SlideshowConfig::new(
            images.path(),
            vec!["open".to_string(), "locked".to_string()],
            600,
        ))
        .await
        .unwrap();
    engine.start().await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, SlideshowEvent::AuthenticationRequired { device_id, .. } if device_id == "locked")
    })
    .await;

    let status = engine.status().await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.active_devices, vec!["open".to_string()]);
    assert_eq!(open.lock().unwrap().plays.len(), 1);
}
