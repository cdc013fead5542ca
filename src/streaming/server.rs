//! Ephemeral HTTP server handing prepared content to devices

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use rand::RngCore;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::content::PreparedContent;
use crate::error::Result;

struct Entry {
    content: PreparedContent,
    device_id: String,
    step: u64,
    expires_at: Instant,
}

type Entries = Arc<RwLock<HashMap<String, Entry>>>;

/// Serves registered content at `/content/{token}`
///
/// Each URL belongs to one device and one step. Entries disappear when the
/// TTL passes or when they are invalidated at the next step.
pub struct ContentServer {
    entries: Entries,
    local_addr: SocketAddr,
    public_host: Option<IpAddr>,
    ttl: Duration,
    shutdown: CancellationToken,
}

impl ContentServer {
    /// Bind and start serving
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, public_host: Option<IpAddr>, ttl: Duration) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let entries: Entries = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let router = Router::new()
            .route("/content/:token", get(serve_content))
            .with_state(Arc::clone(&entries));

        let signal = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Content server stopped: {}", e);
            }
        });

        tracing::info!("Content server listening on {}", local_addr);
        Ok(Self {
            entries,
            local_addr,
            public_host,
            ttl,
            shutdown,
        })
    }

    /// Address the server is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register content for one device and step; returns its URL
    ///
    /// `route_hint` is the local address a link reports toward the device.
    pub async fn register(
        &self,
        device_id: &str,
        device_addr: IpAddr,
        route_hint: Option<IpAddr>,
        step: u64,
        content: PreparedContent,
    ) -> String {
        let token = new_token();
        let host = self.host_for(device_addr, route_hint).await;
        let url = format!(
            "http://{}/content/{token}",
            SocketAddr::new(host, self.local_addr.port())
        );

        self.entries.write().await.insert(
            token,
            Entry {
                content,
                device_id: device_id.to_string(),
                step,
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::trace!("Registered content for {} at step {}: {}", device_id, step, url);
        url
    }

    /// Drop every entry of steps before `step`
    pub async fn invalidate_before(&self, step: u64) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.step >= step);
        before - entries.len()
    }

    /// Drop every entry
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    /// Drop entries belonging to one device
    pub async fn invalidate_device(&self, device_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.device_id != device_id);
        before - entries.len()
    }

    /// Drop expired entries
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if no entries are live
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Stop accepting requests; in-flight responses complete
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn host_for(&self, device_addr: IpAddr, route_hint: Option<IpAddr>) -> IpAddr {
        if let Some(host) = self.public_host {
            return host;
        }
        if !self.local_addr.ip().is_unspecified() {
            return self.local_addr.ip();
        }
        if let Some(hint) = route_hint.filter(|ip| !ip.is_unspecified()) {
            return hint;
        }
        route_probe(device_addr).await.unwrap_or(match device_addr {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        })
    }
}

impl Drop for ContentServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Local address the OS would use to reach `target`
///
/// A connected UDP socket sends nothing but resolves the route.
pub async fn route_probe(target: IpAddr) -> Option<IpAddr> {
    let bind: SocketAddr = match target {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = tokio::net::UdpSocket::bind(bind).await.ok()?;
    socket.connect((target, 9)).await.ok()?;
    socket
        .local_addr()
        .ok()
        .map(|a| a.ip())
        .filter(|ip| !ip.is_unspecified())
}

fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token = String::with_capacity(32);
    for byte in bytes {
        let _ = write!(token, "{byte:02x}");
    }
    token
}

async fn serve_content(State(entries): State<Entries>, Path(token): Path<String>) -> Response {
    let entries = entries.read().await;
    match entries.get(&token) {
        Some(entry) if entry.expires_at > Instant::now() => {
            tracing::debug!("Serving step {} content to {}", entry.step, entry.device_id);
            (
                [
                    (header::CONTENT_TYPE, entry.content.content_type()),
                    (header::CACHE_CONTROL, "no-store"),
                ],
                entry.content.data.clone(),
            )
                .into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
