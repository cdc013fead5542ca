use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use image::{GenericImageView, Rgb, RgbImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::ErrorKind;
use crate::state::{EventBus, StreamingStage};
use crate::testing::fixtures::write_image;
use crate::testing::{MockFailure, MockTransport, init_tracing, mock_device, numbered_images};
use crate::transport::{DeviceLink, DeviceTransport, MediaKind};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn small_output() -> ImageOutput {
    ImageOutput {
        max_size: (16, 16),
        quality: 80,
    }
}

fn policy() -> PushPolicy {
    PushPolicy {
        timeout: Duration::from_secs(2),
        retries: 2,
        backoff: Duration::from_millis(1),
    }
}

async fn server(ttl: Duration) -> Arc<ContentServer> {
    let addr: SocketAddr = (Ipv4Addr::LOCALHOST, 0).into();
    Arc::new(ContentServer::bind(addr, None, ttl).await.unwrap())
}

async fn fan_out_engine(max_devices: usize) -> FanOut {
    let preparer = ImagePreparer::new(small_output(), 8);
    let video = VideoOutput {
        ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
        size: (16, 16),
        fps: 4,
        quality: 80,
    };
    let renderer = TransitionRenderer::new(video, preparer.clone());
    FanOut::new(
        preparer,
        renderer,
        server(Duration::from_secs(60)).await,
        policy(),
        max_devices,
        EventBus::new(64),
    )
}

async fn link_for(transport: &MockTransport, id: &str) -> Arc<dyn DeviceLink> {
    transport.connect(&mock_device(id), None).await.unwrap()
}

async fn deliveries(transport: &MockTransport, ids: &[&str], image: &std::path::Path) -> Vec<Delivery> {
    let mut out = Vec::new();
    for id in ids {
        out.push(Delivery {
            device_id: (*id).to_string(),
            device_addr: LOOPBACK,
            link: link_for(transport, id).await,
            content: ContentRequest::Image(image.to_path_buf()),
        });
    }
    out
}

/// Minimal HTTP/1.1 GET returning status, raw headers and body
async fn http_get(url: &str) -> (u16, String, Vec<u8>) {
    let rest = url.strip_prefix("http://").unwrap();
    let (authority, path) = rest.split_at(rest.find('/').unwrap());
    let mut stream = tokio::net::TcpStream::connect(authority).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw[split + 4..].to_vec();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    (status, head.to_lowercase(), body)
}

fn prepared(data: &'static [u8]) -> PreparedContent {
    PreparedContent {
        data: Bytes::from_static(data),
        kind: MediaKind::Image,
        key: content_key(&[data]),
    }
}

#[test]
fn test_content_key_separates_parts() {
    assert_ne!(content_key(&[b"ab", b"c"]), content_key(&[b"a", b"bc"]));
    assert_eq!(content_key(&[b"abc"]), content_key(&[b"abc"]));
    assert_eq!(content_key(&[b"abc"]).len(), 64);
}

#[test]
fn test_cache_evicts_oldest() {
    let mut cache = ContentCache::new(2);
    cache.insert(prepared(b"one"));
    cache.insert(prepared(b"two"));
    cache.insert(prepared(b"three"));

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&content_key(&[b"one"])).is_none());
    assert!(cache.get(&content_key(&[b"three"])).is_some());
}

#[test]
fn test_cache_disabled_at_zero_capacity() {
    let mut cache = ContentCache::new(0);
    cache.insert(prepared(b"one"));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_prepare_downscales_preserving_aspect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.png");
    write_image(&path, 64, 32, [200, 10, 10]).unwrap();

    let preparer = ImagePreparer::new(small_output(), 4);
    let content = preparer.prepare(&path).await.unwrap();

    assert_eq!(content.kind, MediaKind::Image);
    assert_eq!(content.content_type(), "image/jpeg");
    let decoded = image::load_from_memory(&content.data).unwrap();
    assert_eq!(decoded.dimensions(), (16, 8));
}

#[tokio::test]
async fn test_prepare_keeps_small_images_and_caches() {
    let dir = numbered_images(1).unwrap();
    let path = dir.path().join("1.jpg");

    let preparer = ImagePreparer::new(small_output(), 4);
    let first = preparer.prepare(&path).await.unwrap();
    let second = preparer.prepare(&path).await.unwrap();

    assert_eq!(first, second);
    assert!(preparer.cached(&first.key).is_some());
    let decoded = image::load_from_memory(&first.data).unwrap();
    assert_eq!(decoded.dimensions(), (16, 12));
}

#[tokio::test]
async fn test_prepare_reports_resource_errors() {
    let dir = tempfile::tempdir().unwrap();
    let corrupt = dir.path().join("broken.jpg");
    std::fs::write(&corrupt, b"definitely not an image").unwrap();

    let preparer = ImagePreparer::new(small_output(), 4);
    let err = preparer.prepare(&corrupt).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    let err = preparer
        .prepare(&dir.path().join("missing.jpg"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn test_letterbox_centres_on_black() {
    let wide = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, Rgb([255, 255, 255])));
    let boxed = letterbox(&wide, (10, 10));

    assert_eq!(boxed.dimensions(), (10, 10));
    assert_eq!(boxed.get_pixel(5, 0), &Rgb([0, 0, 0]));
    assert_eq!(boxed.get_pixel(5, 5), &Rgb([255, 255, 255]));
}

#[test]
fn test_blend_midpoint() {
    let black = RgbImage::new(2, 2);
    let white = RgbImage::from_pixel(2, 2, Rgb([254, 254, 254]));

    assert_eq!(blend(&black, &white, 0.5).get_pixel(0, 0), &Rgb([127, 127, 127]));
    assert_eq!(blend(&black, &white, 1.0).get_pixel(1, 1), &Rgb([254, 254, 254]));
    assert_eq!(blend(&black, &white, 0.0).get_pixel(1, 1), &Rgb([0, 0, 0]));
}

#[test]
fn test_frame_count() {
    let renderer = TransitionRenderer::new(
        VideoOutput {
            ffmpeg: PathBuf::from("ffmpeg"),
            size: (16, 16),
            fps: 24,
            quality: 80,
        },
        ImagePreparer::new(small_output(), 0),
    );

    assert_eq!(renderer.frame_count(Duration::from_secs(1)), 24);
    assert_eq!(renderer.frame_count(Duration::from_millis(1010)), 25);
    assert_eq!(renderer.frame_count(Duration::ZERO), 1);
}

#[tokio::test]
async fn test_render_without_encoder_reports_progress_and_error() {
    let dir = numbered_images(2).unwrap();
    let renderer = TransitionRenderer::new(
        VideoOutput {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            size: (16, 16),
            fps: 4,
            quality: 80,
        },
        ImagePreparer::new(small_output(), 0),
    );

    let stages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&stages);
    let progress: ProgressFn = Arc::new(move |stage| sink.lock().unwrap().push(stage));

    let job = CrossfadeJob {
        from: Some(dir.path().join("1.jpg")),
        to: dir.path().join("2.jpg"),
        transition: Duration::from_millis(500),
        hold: Duration::from_secs(1),
    };
    let err = renderer.render(&job, progress).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    let stages = stages.lock().unwrap().clone();
    assert_eq!(
        stages.first(),
        Some(&StreamingStage::Starting {
            image: "2.jpg".to_string()
        })
    );
    assert!(stages.contains(&StreamingStage::Creating {
        current: 2,
        total: 2
    }));
    assert!(matches!(stages.last(), Some(StreamingStage::Error { .. })));
}

#[tokio::test]
async fn test_server_serves_registered_content() {
    init_tracing();
    let server = server(Duration::from_secs(60)).await;
    let url = server
        .register("tv", LOOPBACK, None, 0, prepared(b"jpeg bytes"))
        .await;

    assert!(url.starts_with(&format!("http://127.0.0.1:{}/content/", server.local_addr().port())));
    let (status, headers, body) = http_get(&url).await;
    assert_eq!(status, 200);
    assert!(headers.contains("content-type: image/jpeg"));
    assert!(headers.contains("cache-control: no-store"));
    assert_eq!(body, b"jpeg bytes");
}

#[tokio::test]
async fn test_server_unknown_and_invalidated_tokens() {
    let server = server(Duration::from_secs(60)).await;
    let old = server.register("tv", LOOPBACK, None, 0, prepared(b"old")).await;
    let new = server.register("tv", LOOPBACK, None, 1, prepared(b"new")).await;
    assert_ne!(old, new);

    assert_eq!(server.invalidate_before(1).await, 1);
    assert_eq!(http_get(&old).await.0, 404);
    assert_eq!(http_get(&new).await.0, 200);

    let base = format!("http://127.0.0.1:{}/content/deadbeef", server.local_addr().port());
    assert_eq!(http_get(&base).await.0, 404);

    assert_eq!(server.invalidate_device("tv").await, 1);
    assert!(server.is_empty().await);
}

#[tokio::test]
async fn test_server_expires_by_ttl() {
    let server = server(Duration::from_millis(50)).await;
    let url = server.register("tv", LOOPBACK, None, 0, prepared(b"x")).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(http_get(&url).await.0, 404);
    assert_eq!(server.purge_expired().await, 1);
    assert_eq!(server.len().await, 0);
}

#[tokio::test]
async fn test_push_retries_transient_failures() {
    let transport = MockTransport::with_devices(&["tv"]);
    transport.update_behavior("tv", |b| b.transient_play_failures = 2);
    let link = link_for(&transport, "tv").await;

    push(link.as_ref(), "tv", "http://x/1", MediaKind::Image, policy())
        .await
        .unwrap();
    assert_eq!(transport.plays_for("tv").len(), 1);
}

#[tokio::test]
async fn test_push_gives_up_after_retry_budget() {
    let transport = MockTransport::with_devices(&["tv"]);
    transport.update_behavior("tv", |b| b.transient_play_failures = 3);
    let link = link_for(&transport, "tv").await;

    let err = push(link.as_ref(), "tv", "http://x/1", MediaKind::Image, policy())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(transport.plays_for("tv").is_empty());
}

#[tokio::test]
async fn test_push_does_not_retry_authorization() {
    let transport = MockTransport::with_devices(&["tv"]);
    transport.update_behavior("tv", |b| {
        b.play_error = Some(MockFailure::Authorization);
        b.transient_play_failures = 0;
    });
    let link = link_for(&transport, "tv").await;

    let err = push(link.as_ref(), "tv", "http://x/1", MediaKind::Image, policy())
        .await
        .unwrap_err();
    assert!(err.requires_pairing());
}

#[tokio::test]
async fn test_push_times_out() {
    let transport = MockTransport::with_devices(&["tv"]);
    transport.update_behavior("tv", |b| b.play_delay = Duration::from_millis(500));
    let link = link_for(&transport, "tv").await;

    let quick = PushPolicy {
        timeout: Duration::from_millis(20),
        retries: 0,
        backoff: Duration::from_millis(1),
    };
    let err = push(link.as_ref(), "tv", "http://x/1", MediaKind::Image, quick)
        .await
        .unwrap_err();
    assert!(matches!(err, crate::error::SlideshowError::Timeout { .. }));
}

#[tokio::test]
async fn test_fan_out_isolates_one_failure() {
    init_tracing();
    let dir = numbered_images(1).unwrap();
    let image = dir.path().join("1.jpg");
    let transport = MockTransport::with_devices(&["a", "b", "c"]);
    transport.update_behavior("b", |b| b.play_error = Some(MockFailure::Capability));

    let fan_out = fan_out_engine(16).await;
    let outcomes = fan_out
        .fan_out(0, deliveries(&transport, &["a", "b", "c"], &image).await, CancellationToken::new())
        .await;

    let ids: Vec<&str> = outcomes.iter().map(|o| o.device_id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert!(outcomes[0].result.is_ok());
    assert_eq!(outcomes[1].result.as_ref().unwrap_err().kind(), ErrorKind::Capability);
    assert!(outcomes[2].result.is_ok());
    assert_eq!(transport.plays_for("a").len(), 1);
    assert_eq!(transport.plays_for("c").len(), 1);

    // The URL a device was told to play is fetchable
    let url = outcomes[0].result.as_ref().unwrap();
    assert_eq!(http_get(url).await.0, 200);
}

#[tokio::test]
async fn test_fan_out_contains_panics() {
    let dir = numbered_images(1).unwrap();
    let image = dir.path().join("1.jpg");
    let transport = MockTransport::with_devices(&["a", "b"]);
    transport.update_behavior("a", |b| b.panic_on_play = true);

    let fan_out = fan_out_engine(16).await;
    let outcomes = fan_out
        .fan_out(0, deliveries(&transport, &["a", "b"], &image).await, CancellationToken::new())
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].result.as_ref().unwrap_err().kind(), ErrorKind::Internal);
    assert!(outcomes[1].result.is_ok());
}

#[tokio::test]
async fn test_fan_out_bounds_device_count() {
    let dir = numbered_images(1).unwrap();
    let image = dir.path().join("1.jpg");
    let transport = MockTransport::with_devices(&["a", "b", "c"]);

    let fan_out = fan_out_engine(2).await;
    let outcomes = fan_out
        .fan_out(0, deliveries(&transport, &["a", "b", "c"], &image).await, CancellationToken::new())
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2].result.as_ref().unwrap_err().kind(), ErrorKind::Validation);
    assert!(transport.plays_for("c").is_empty());
    assert_eq!(transport.plays().len(), 2);
}

#[tokio::test]
async fn test_fan_out_resource_error_skips_only_that_device() {
    let dir = numbered_images(1).unwrap();
    let transport = MockTransport::with_devices(&["a", "b"]);
    let mut batch = deliveries(&transport, &["a", "b"], &dir.path().join("1.jpg")).await;
    batch[0].content = ContentRequest::Image(dir.path().join("gone.jpg"));

    let fan_out = fan_out_engine(16).await;
    let outcomes = fan_out.fan_out(3, batch, CancellationToken::new()).await;

    assert_eq!(outcomes[0].result.as_ref().unwrap_err().kind(), ErrorKind::Resource);
    assert!(outcomes[1].result.is_ok());
}

#[tokio::test]
async fn test_fan_out_cancellation_returns_promptly() {
    let dir = numbered_images(1).unwrap();
    let image = dir.path().join("1.jpg");
    let transport = MockTransport::with_devices(&["a", "b"]);
    for id in ["a", "b"] {
        transport.update_behavior(id, |b| b.play_delay = Duration::from_secs(5));
    }

    let fan_out = fan_out_engine(16).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcomes = fan_out
        .fan_out(0, deliveries(&transport, &["a", "b"], &image).await, cancel)
        .await;

    assert!(outcomes.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(transport.plays().is_empty());
}
