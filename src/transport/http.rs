use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;

use super::{DeviceLink, DeviceTransport, MediaKind, PairingHandle};
use crate::discovery::DeviceBrowser;
use crate::error::{Result, SlideshowError};
use crate::types::{Credentials, DeviceInfo};

const USER_AGENT: &str = concat!("AirPlaySlideshow/", env!("CARGO_PKG_VERSION"));

/// Status code some receivers use for "connection authorization required"
const STATUS_AUTH_REQUIRED: u16 = 470;

/// Transport over the `AirPlay` HTTP control endpoints
///
/// Covers `/server-info`, `/play` and `/stop`. PIN pairing is not offered;
/// devices that demand it surface as
/// [`SlideshowError::AuthorizationRequired`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
    browser_service: String,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SlideshowError::Io(std::io::Error::other(e)))?;

        Ok(Self {
            client,
            request_timeout,
            browser_service: crate::discovery::AIRPLAY_SERVICE_TYPE.to_string(),
        })
    }

    /// Browse a different mDNS service type
    #[must_use]
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.browser_service = service_type.into();
        self
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceInfo>> {
        DeviceBrowser::with_service_type(self.browser_service.clone())
            .scan(timeout)
            .await
    }

    async fn connect(
        &self,
        device: &DeviceInfo,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn DeviceLink>> {
        if credentials.is_some() {
            tracing::debug!("HTTP transport ignores stored credentials for {}", device.id);
        }

        let link = HttpLink {
            client: self.client.clone(),
            base_url: format!("http://{}", device.socket_addr()),
            device_id: device.id.clone(),
            session_id: session_id(),
            timeout: self.request_timeout,
        };

        link.ping().await?;
        tracing::info!("Connected to {} at {}", device.name, link.base_url);
        Ok(Arc::new(link))
    }

    async fn begin_pairing(&self, device: &DeviceInfo) -> Result<Box<dyn PairingHandle>> {
        Err(SlideshowError::Capability {
            device_id: device.id.clone(),
            capability: "PIN pairing over the HTTP transport".to_string(),
        })
    }
}

fn session_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

struct HttpLink {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
    session_id: String,
    timeout: Duration,
}

impl HttpLink {
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<()> {
        let response = request
            .header("X-Apple-Session-ID", &self.session_id)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        tracing::debug!("{} {} answered {}", self.device_id, what, status);
        Err(map_status(&self.device_id, status, what))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> SlideshowError {
        if err.is_timeout() {
            SlideshowError::Timeout {
                device_id: self.device_id.clone(),
                duration: self.timeout,
            }
        } else {
            SlideshowError::Network {
                device_id: self.device_id.clone(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            }
        }
    }
}

/// Map an HTTP status to the error taxonomy
fn map_status(device_id: &str, status: StatusCode, what: &str) -> SlideshowError {
    match status.as_u16() {
        401 | 403 | STATUS_AUTH_REQUIRED => SlideshowError::AuthorizationRequired {
            device_id: device_id.to_string(),
            message: format!("{what} returned {status}"),
        },
        404 | 405 | 501 => SlideshowError::Capability {
            device_id: device_id.to_string(),
            capability: what.to_string(),
        },
        _ => SlideshowError::network(device_id, format!("{what} returned {status}")),
    }
}

#[async_trait]
impl DeviceLink for HttpLink {
    async fn play_url(&self, url: &str, kind: MediaKind) -> Result<()> {
        let body = format!("Content-Location: {url}\nStart-Position: 0\n");
        let request = self
            .client
            .post(format!("{}/play", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "text/parameters")
            .body(body);

        let what = match kind {
            MediaKind::Image => "photo playback",
            MediaKind::Video => "video playback",
        };
        self.send(request, what).await
    }

    async fn stop(&self) -> Result<()> {
        let request = self.client.post(format!("{}/stop", self.base_url));
        self.send(request, "stop").await
    }

    async fn ping(&self) -> Result<()> {
        let request = self.client.get(format!("{}/server-info", self.base_url));
        self.send(request, "server-info").await
    }
}
