//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use airplay_slideshow::{DisplayedImage, EngineConfig, SlideshowEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(10);

static INIT: Once = Once::new();

/// Initialize logging once, honouring `RUST_LOG`
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Loopback engine with short timeouts and no background noise
pub fn engine_config() -> EngineConfig {
    EngineConfig::builder()
        .content_bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .connection_timeout(Duration::from_secs(2))
        .push_policy(Duration::from_secs(2), 1, Duration::from_millis(10))
        .health_check_interval(Duration::from_secs(3600))
        .reconnect_policy(0, Duration::from_millis(50), Duration::from_millis(100))
        .build()
}

pub fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

/// Next event matching `matches`, failing the test after [`WAIT`]
pub async fn wait_for<F>(events: &mut broadcast::Receiver<SlideshowEvent>, mut matches: F) -> SlideshowEvent
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

/// Distribution of the given step
pub async fn displayed(events: &mut broadcast::Receiver<SlideshowEvent>, step: u64) -> Vec<DisplayedImage> {
    match wait_for(events, |e| {
        matches!(e, SlideshowEvent::ImagesDisplayed { step: s, .. } if *s == step)
    })
    .await
    {
        SlideshowEvent::ImagesDisplayed { distribution, .. } => distribution,
        _ => unreachable!(),
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: String,
    pub body: Vec<u8>,
}

/// Minimal HTTP/1.1 GET
pub async fn http_get(url: &str) -> HttpResponse {
    let rest = url.strip_prefix("http://").expect("http URL");
    let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
    let mut stream = TcpStream::connect(authority).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let headers = String::from_utf8_lossy(&raw[..split]).into_owned();
    let status = headers
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    HttpResponse {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    }
}
