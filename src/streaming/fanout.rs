use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::content::PreparedContent;
use super::prepare::ImagePreparer;
use super::push::{PushPolicy, push};
use super::server::ContentServer;
use super::transition::{CrossfadeJob, ProgressFn, TransitionRenderer};
use crate::error::{Result, SlideshowError};
use crate::state::{EventBus, SlideshowEvent};
use crate::transport::DeviceLink;

/// What one device shows in a step
#[derive(Debug, Clone, PartialEq)]
pub enum ContentRequest {
    /// Still image
    Image(PathBuf),
    /// Crossfade clip
    Transition(CrossfadeJob),
}

impl ContentRequest {
    /// Image the device ends up showing
    #[must_use]
    pub fn image(&self) -> &PathBuf {
        match self {
            Self::Image(path) => path,
            Self::Transition(job) => &job.to,
        }
    }
}

/// One device's share of a step
pub struct Delivery {
    /// Target device
    pub device_id: String,
    /// Its network address
    pub device_addr: IpAddr,
    /// Live link
    pub link: Arc<dyn DeviceLink>,
    /// Content to show
    pub content: ContentRequest,
}

/// Result of one delivery
#[derive(Debug)]
pub struct DeliveryOutcome {
    /// Target device
    pub device_id: String,
    /// Image assigned to it
    pub image: PathBuf,
    /// Served URL on success
    pub result: Result<String>,
}

/// Concurrent per-device delivery with failure isolation
#[derive(Clone)]
pub struct FanOut {
    preparer: ImagePreparer,
    renderer: TransitionRenderer,
    server: Arc<ContentServer>,
    policy: PushPolicy,
    max_devices: usize,
    events: EventBus,
}

impl FanOut {
    /// Create a fan-out engine
    #[must_use]
    pub fn new(
        preparer: ImagePreparer,
        renderer: TransitionRenderer,
        server: Arc<ContentServer>,
        policy: PushPolicy,
        max_devices: usize,
        events: EventBus,
    ) -> Self {
        Self {
            preparer,
            renderer,
            server,
            policy,
            max_devices,
            events,
        }
    }

    /// Content server used for URLs
    #[must_use]
    pub fn server(&self) -> &Arc<ContentServer> {
        &self.server
    }

    /// Deliver one step to every device concurrently
    ///
    /// Outcomes come back in delivery order. No failure or panic of one
    /// device affects another. Deliveries beyond the device limit fail with
    /// a validation error. Cancelling `cancel` aborts the remaining tasks
    /// and returns only the outcomes collected so far.
    pub async fn fan_out(
        &self,
        step: u64,
        deliveries: Vec<Delivery>,
        cancel: CancellationToken,
    ) -> Vec<DeliveryOutcome> {
        let total = deliveries.len();
        let mut slots: Vec<Option<DeliveryOutcome>> = (0..total).map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, delivery) in deliveries.into_iter().enumerate() {
            if index >= self.max_devices {
                slots[index] = Some(DeliveryOutcome {
                    device_id: delivery.device_id.clone(),
                    image: delivery.content.image().clone(),
                    result: Err(SlideshowError::validation(format!(
                        "more than {} devices in one step",
                        self.max_devices
                    ))),
                });
                continue;
            }

            let worker = self.clone();
            tasks.spawn(async move {
                let device_id = delivery.device_id.clone();
                let image = delivery.content.image().clone();
                let result = AssertUnwindSafe(worker.deliver(step, delivery))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!("Delivery task for {} panicked", device_id);
                        Err(SlideshowError::Io(std::io::Error::other(format!(
                            "delivery to {device_id} panicked"
                        ))))
                    });
                (
                    index,
                    DeliveryOutcome {
                        device_id,
                        image,
                        result,
                    },
                )
            });
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::debug!("Step {} cancelled", step);
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => slots[index] = Some(outcome),
                    Some(Err(e)) => tracing::warn!("Delivery task ended abnormally: {}", e),
                    None => break,
                },
            }
        }

        slots.into_iter().flatten().collect()
    }

    async fn deliver(&self, step: u64, delivery: Delivery) -> Result<String> {
        let Delivery {
            device_id,
            device_addr,
            link,
            content,
        } = delivery;

        let prepared = self.prepare(&device_id, &content).await?;
        let kind = prepared.kind;
        let url = self
            .server
            .register(&device_id, device_addr, link.local_addr(), step, prepared)
            .await;

        push(link.as_ref(), &device_id, &url, kind, self.policy).await?;
        tracing::debug!("Step {} delivered to {}", step, device_id);
        Ok(url)
    }

    async fn prepare(&self, device_id: &str, content: &ContentRequest) -> Result<PreparedContent> {
        match content {
            ContentRequest::Image(path) => self.preparer.prepare(path).await,
            ContentRequest::Transition(job) => {
                let events = self.events.clone();
                let device = device_id.to_string();
                let progress: ProgressFn = Arc::new(move |stage| {
                    events.emit(SlideshowEvent::StreamingProgress {
                        device_id: device.clone(),
                        stage,
                    });
                });
                self.renderer.render(job, progress).await
            }
        }
    }
}
