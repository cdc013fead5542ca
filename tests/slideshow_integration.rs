//! End-to-end slideshow runs against the mock transport

use std::sync::Arc;
use std::time::Duration;

use airplay_slideshow::testing::{MockTransport, numbered_images};
use airplay_slideshow::{
    EngineHandle, ErrorKind, EventFilter, MediaKind, MemoryStore, SlideshowConfig,
    SlideshowEvent, StreamingStage,
};

mod common;
use common::{displayed, engine_config, http_get, ids, init, wait_for};

async fn connected_engine(transport: &MockTransport, devices: &[&str]) -> EngineHandle {
    init();
    let engine = EngineHandle::spawn(
        engine_config(),
        Arc::new(transport.clone()),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();
    engine.discover().await.unwrap();
    for id in devices {
        engine.connect(*id).await.unwrap();
    }
    engine
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pushed_urls_serve_prepared_jpegs() {
    let transport = MockTransport::with_devices(&["living", "kitchen"]);
    let engine = connected_engine(&transport, &["living", "kitchen"]).await;
    let mut events = engine.subscribe();

    let dir = numbered_images(4).unwrap();
    engine
        .configure(SlideshowConfig::new(dir.path(), ids(&["living", "kitchen"]), 600))
        .await
        .unwrap();
    engine.start().await.unwrap();
    displayed(&mut events, 0).await;

    let plays = transport.plays();
    assert_eq!(plays.len(), 2);
    for play in &plays {
        assert_eq!(play.kind, MediaKind::Image);
        let response = http_get(&play.url).await;
        assert_eq!(response.status, 200);
        assert!(response.headers.contains("content-type: image/jpeg"));
        // JPEG start-of-image marker
        assert_eq!(&response.body[..2], &[0xFF, 0xD8]);
    }
    assert_ne!(plays[0].url, plays[1].url);

    // Moving on retires the previous step's URLs
    engine.next().await.unwrap();
    displayed(&mut events, 1).await;
    assert_eq!(http_get(&plays[0].url).await.status, 404);

    let current = transport.plays_for("living").pop().unwrap();
    assert_eq!(http_get(&current.url).await.status, 200);

    engine.stop().await.unwrap();
    tokio::time::timeout(common::WAIT, async {
        while http_get(&current.url).await.status != 404 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reduced_device_list_keeps_rotating() {
    let transport = MockTransport::with_devices(&["a", "b", "c"]);
    let engine = connected_engine(&transport, &["a", "b", "c"]).await;
    let mut events = engine.subscribe();

    let dir = numbered_images(6).unwrap();
    engine
        .configure(SlideshowConfig::new(dir.path(), ids(&["a", "b", "c"]), 600))
        .await
        .unwrap();
    engine.start().await.unwrap();
    displayed(&mut events, 0).await;

    engine.disconnect("b").await.unwrap();
    engine.next().await.unwrap();
    let step1: Vec<(String, String)> = displayed(&mut events, 1)
        .await
        .into_iter()
        .map(|d| (d.device_id, d.image))
        .collect();
    assert_eq!(
        step1,
        vec![
            ("a".to_string(), "3.jpg".to_string()),
            ("c".to_string(), "4.jpg".to_string())
        ]
    );

    // Reconnecting puts the device back in its slot
    engine.connect("b").await.unwrap();
    engine.next().await.unwrap();
    let step2 = displayed(&mut events, 2).await;
    let devices: Vec<&str> = step2.iter().map(|d| d.device_id.as_str()).collect();
    assert_eq!(devices, vec!["a", "b", "c"]);
    assert!(step2.iter().all(|d| d.delivered));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_device_does_not_delay_others() {
    let transport = MockTransport::with_devices(&["fast", "slow"]);
    transport.update_behavior("slow", |b| b.play_delay = Duration::from_millis(800));
    let engine = connected_engine(&transport, &["fast", "slow"]).await;
    let mut events = engine.subscribe();

    let dir = numbered_images(2).unwrap();
    engine
        .configure(SlideshowConfig::new(dir.path(), ids(&["fast", "slow"]), 600))
        .await
        .unwrap();
    engine.start().await.unwrap();

    // The fast device has its image well before the slow one finishes
    tokio::time::timeout(Duration::from_millis(600), async {
        while transport.plays_for("fast").is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(transport.plays_for("slow").is_empty());

    let step0 = displayed(&mut events, 0).await;
    assert!(step0.iter().all(|d| d.delivered));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_video_mode_without_encoder_reports_per_device_errors() {
    init();
    let transport = MockTransport::with_devices(&["tv"]);
    let mut config = engine_config();
    config.ffmpeg_path = "/nonexistent/ffmpeg".into();
    config.video_size = (16, 16);
    config.video_fps = 4;
    let engine = EngineHandle::spawn(config, Arc::new(transport.clone()), Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    engine.discover().await.unwrap();
    engine.connect("tv").await.unwrap();

    let mut progress = EventFilter::new(engine.subscribe(), |e| {
        matches!(e, SlideshowEvent::StreamingProgress { .. })
    });
    let mut errors = EventFilter::errors(engine.subscribe());
    let mut events = engine.subscribe();

    let dir = numbered_images(2).unwrap();
    engine
        .configure(SlideshowConfig::new(dir.path(), ids(&["tv"]), 600).with_video(0.5))
        .await
        .unwrap();
    let status = engine.status().await.unwrap();
    assert!(status.video_mode);
    assert_eq!(status.transition_duration, Some(0.5));

    engine.start().await.unwrap();
    let step0 = displayed(&mut events, 0).await;
    assert_eq!(step0.len(), 1);
    assert!(!step0[0].delivered);
    assert!(step0[0].error.as_deref().is_some_and(|e| e.contains("ffmpeg")));

    match progress.recv().await {
        Some(SlideshowEvent::StreamingProgress { device_id, stage }) => {
            assert_eq!(device_id, "tv");
            assert_eq!(stage, StreamingStage::Starting { image: "1.jpg".to_string() });
        }
        other => panic!("unexpected event {other:?}"),
    }

    match errors.recv().await {
        Some(SlideshowEvent::Error { device_id, kind, .. }) => {
            assert_eq!(device_id.as_deref(), Some("tv"));
            assert_eq!(kind, ErrorKind::Resource);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Content failures leave the device and the run alone
    let status = engine.status().await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.active_devices, ids(&["tv"]));
    assert!(transport.plays().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_announce_run_lifecycle() {
    let transport = MockTransport::with_devices(&["tv"]);
    let engine = connected_engine(&transport, &["tv"]).await;
    let mut events = engine.subscribe();

    let dir = numbered_images(1).unwrap();
    engine
        .configure(SlideshowConfig::new(dir.path(), ids(&["tv"]), 600))
        .await
        .unwrap();
    let configured = wait_for(&mut events, |e| {
        matches!(e, SlideshowEvent::ConfigurationUpdated { .. })
    })
    .await;
    assert!(matches!(configured, SlideshowEvent::ConfigurationUpdated { images_count: 1, .. }));

    engine.start().await.unwrap();
    let started = wait_for(&mut events, |e| matches!(e, SlideshowEvent::SlideshowStarted { .. })).await;
    match started {
        SlideshowEvent::SlideshowStarted { active_devices, .. } => assert_eq!(active_devices, ids(&["tv"])),
        _ => unreachable!(),
    }
    displayed(&mut events, 0).await;

    // One image, one device: every step completes a cycle
    engine.next().await.unwrap();
    let cycle = wait_for(&mut events, |e| matches!(e, SlideshowEvent::CycleCompleted { .. })).await;
    assert!(matches!(cycle, SlideshowEvent::CycleCompleted { cycles: 1, .. }));

    engine.stop().await.unwrap();
    let stopped = wait_for(&mut events, |e| matches!(e, SlideshowEvent::SlideshowStopped { .. })).await;
    match stopped {
        SlideshowEvent::SlideshowStopped { stats, .. } => {
            assert_eq!(stats.cycles_completed, 1);
            assert!(stats.started_at.is_some());
        }
        _ => unreachable!(),
    }
}
