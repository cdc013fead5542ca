use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for the slideshow engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for a discovery scan (default: 5 seconds)
    pub discovery_timeout: Duration,

    /// Timeout for connection attempts (default: 10 seconds)
    pub connection_timeout: Duration,

    /// Bounded wait for a single content push (default: 10 seconds)
    pub push_timeout: Duration,

    /// Extra attempts for transient push failures (default: 2)
    pub push_retries: u32,

    /// Initial delay between push attempts, doubled each retry (default: 500ms)
    pub push_backoff: Duration,

    /// Interval between device health checks (default: 30 seconds)
    pub health_check_interval: Duration,

    /// Number of automatic reconnection attempts (default: 3)
    pub reconnect_attempts: u32,

    /// Delay before the first reconnection attempt (default: 2 seconds)
    pub reconnect_delay: Duration,

    /// Upper bound for the reconnection backoff (default: 30 seconds)
    pub reconnect_max_delay: Duration,

    /// Lifetime of an unanswered pairing session (default: 120 seconds)
    pub pairing_timeout: Duration,

    /// Rejected PINs tolerated before the session fails (default: 3)
    pub max_pin_attempts: u32,

    /// Maximum devices in one slideshow (default: 16)
    pub max_devices: usize,

    /// Display time used when a configuration omits it (default: 5 seconds)
    pub default_display_time: Duration,

    /// Largest image dimensions pushed to a device (default: 3840x2160)
    pub max_image_size: (u32, u32),

    /// JPEG quality for prepared images (default: 85)
    pub image_quality: u8,

    /// File extensions picked up from the images directory
    pub image_extensions: Vec<String>,

    /// Lifetime of a served content URL (default: 120 seconds)
    pub content_ttl: Duration,

    /// Bind address of the embedded content server (default: `0.0.0.0:0`)
    pub content_bind: SocketAddr,

    /// Host placed in content URLs (None = route probe toward each device)
    pub public_host: Option<IpAddr>,

    /// Wait bound for synchronous bridge calls (default: 30 seconds)
    pub bridge_timeout: Duration,

    /// `ffmpeg` executable used for video-mode transitions
    pub ffmpeg_path: PathBuf,

    /// Resolution of transition clips (default: 1920x1080)
    pub video_size: (u32, u32),

    /// Frame rate of transition clips (default: 24)
    pub video_fps: u32,

    /// Prepared items kept in the content cache (default: 64)
    pub content_cache_entries: usize,

    /// Capacity of the event broadcast channel (default: 256)
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(10),
            push_timeout: Duration::from_secs(10),
            push_retries: 2,
            push_backoff: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(30),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            pairing_timeout: Duration::from_secs(120),
            max_pin_attempts: 3,
            max_devices: 16,
            default_display_time: Duration::from_secs(5),
            max_image_size: (3840, 2160),
            image_quality: 85,
            image_extensions: ["jpg", "jpeg", "png", "gif"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            content_ttl: Duration::from_secs(120),
            content_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            public_host: None,
            bridge_timeout: Duration::from_secs(30),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            video_size: (1920, 1080),
            video_fps: 24,
            content_cache_entries: 64,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Build a configuration from `SLIDESHOW_*` environment variables
    ///
    /// Missing variables keep their defaults; unparsable ones are logged
    /// and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let secs = |key: &str, target: &mut Duration| {
            if let Some(v) = parse_var::<u64>(&lookup, key) {
                *target = Duration::from_secs(v);
            }
        };
        secs("SLIDESHOW_DISCOVERY_TIMEOUT", &mut config.discovery_timeout);
        secs("SLIDESHOW_CONNECTION_TIMEOUT", &mut config.connection_timeout);
        secs("SLIDESHOW_PUSH_TIMEOUT", &mut config.push_timeout);
        secs(
            "SLIDESHOW_HEALTH_CHECK_INTERVAL",
            &mut config.health_check_interval,
        );
        secs("SLIDESHOW_RECONNECT_DELAY", &mut config.reconnect_delay);
        secs("SLIDESHOW_PAIRING_TIMEOUT", &mut config.pairing_timeout);
        secs(
            "SLIDESHOW_DEFAULT_DISPLAY_TIME",
            &mut config.default_display_time,
        );
        secs("SLIDESHOW_BRIDGE_TIMEOUT", &mut config.bridge_timeout);
        secs("SLIDESHOW_CONTENT_TTL", &mut config.content_ttl);

        if let Some(v) = parse_var(&lookup, "SLIDESHOW_PUSH_RETRIES") {
            config.push_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "SLIDESHOW_RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "SLIDESHOW_MAX_DEVICES") {
            config.max_devices = v;
        }
        if let Some(v) = parse_var(&lookup, "SLIDESHOW_IMAGE_QUALITY") {
            config.image_quality = v;
        }
        if let Some(v) = parse_var(&lookup, "SLIDESHOW_CONTENT_BIND") {
            config.content_bind = v;
        }
        if let Some(v) = parse_var(&lookup, "SLIDESHOW_PUBLIC_HOST") {
            config.public_host = Some(v);
        }
        if let Some(v) = lookup("SLIDESHOW_FFMPEG") {
            config.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(raw) = lookup("SLIDESHOW_MAX_IMAGE_SIZE") {
            match parse_size(&raw) {
                Some(size) => config.max_image_size = size,
                None => tracing::warn!("Ignoring SLIDESHOW_MAX_IMAGE_SIZE={}", raw),
            }
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

/// Parse "3840,2160" or "3840x2160"
fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.split_once(',').or_else(|| raw.split_once('x'))?;
    let w = w.trim().parse().ok()?;
    let h = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Builder for `EngineConfig`
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set discovery timeout
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.discovery_timeout = timeout;
        self
    }

    /// Set connection timeout
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set push timeout, retry count and initial backoff
    #[must_use]
    pub fn push_policy(mut self, timeout: Duration, retries: u32, backoff: Duration) -> Self {
        self.config.push_timeout = timeout;
        self.config.push_retries = retries;
        self.config.push_backoff = backoff;
        self
    }

    /// Set health check interval
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// Set reconnection attempts and backoff bounds
    #[must_use]
    pub fn reconnect_policy(mut self, attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        self.config.reconnect_attempts = attempts;
        self.config.reconnect_delay = delay;
        self.config.reconnect_max_delay = max_delay;
        self
    }

    /// Set pairing session lifetime and PIN attempt budget
    #[must_use]
    pub fn pairing_policy(mut self, timeout: Duration, max_attempts: u32) -> Self {
        self.config.pairing_timeout = timeout;
        self.config.max_pin_attempts = max_attempts;
        self
    }

    /// Set maximum device count
    #[must_use]
    pub fn max_devices(mut self, max: usize) -> Self {
        self.config.max_devices = max;
        self
    }

    /// Set maximum image size and JPEG quality
    #[must_use]
    pub fn image_output(mut self, max_size: (u32, u32), quality: u8) -> Self {
        self.config.max_image_size = max_size;
        self.config.image_quality = quality;
        self
    }

    /// Set content server bind address
    #[must_use]
    pub fn content_bind(mut self, addr: SocketAddr) -> Self {
        self.config.content_bind = addr;
        self
    }

    /// Set the host advertised in content URLs
    #[must_use]
    pub fn public_host(mut self, host: IpAddr) -> Self {
        self.config.public_host = Some(host);
        self
    }

    /// Set content URL lifetime
    #[must_use]
    pub fn content_ttl(mut self, ttl: Duration) -> Self {
        self.config.content_ttl = ttl;
        self
    }

    /// Set bridge timeout
    #[must_use]
    pub fn bridge_timeout(mut self, timeout: Duration) -> Self {
        self.config.bridge_timeout = timeout;
        self
    }

    /// Set `ffmpeg` path
    #[must_use]
    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ffmpeg_path = path.into();
        self
    }

    /// Set transition clip resolution and frame rate
    #[must_use]
    pub fn video_output(mut self, size: (u32, u32), fps: u32) -> Self {
        self.config.video_size = size;
        self.config.video_fps = fps;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
