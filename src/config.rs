//! Runtime configuration for the HTTP transports.
//!
//! All knobs have conservative defaults; the struct is plain data so it can
//! be built from CLI flags, a config file, or environment, whichever the
//! embedding application prefers.

use std::time::Duration;

use tracing::Level;

/// Default interval between SSE keepalive comments.
pub const DEFAULT_SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default bound on a session's pending-request queue.
pub const DEFAULT_PENDING_QUEUE_MAX: usize = 64;

/// Default high-water mark for buffered SSE writes, in bytes.
pub const DEFAULT_WRITE_HIGHWATER_BYTES: usize = 1024 * 1024;

/// Configuration for [`ServerHttpTransport`](crate::transport::ServerHttpTransport).
///
/// # Example
///
/// ```
/// use mcp_http_transport::config::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::new("127.0.0.1", 3000)
///     .with_sse_keepalive_interval(Duration::from_secs(30))
///     .with_pending_queue_max(16);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The host address to bind the HTTP server to
    pub host: String,
    /// The port to listen on
    pub port: u16,
    /// Interval between `: ping` comments on established SSE streams
    pub sse_keepalive_interval: Duration,
    /// Maximum pending (unanswered) requests held per session; overflow
    /// yields `503 Service Unavailable`
    pub pending_queue_max: usize,
    /// Maximum bytes buffered toward a single SSE stream before events are
    /// shed
    pub write_highwater_bytes: usize,
    /// How long a held request waits for the backend before the socket is
    /// answered with `504 Gateway Timeout`; `None` waits indefinitely
    pub pending_timeout: Option<Duration>,
    /// Log verbosity the embedding application should honor when installing
    /// its `tracing` subscriber
    pub log_level: Level,
}

impl TransportConfig {
    /// Creates a configuration bound to the given host and port, with all
    /// other knobs at their defaults.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the SSE keepalive interval.
    pub fn with_sse_keepalive_interval(mut self, interval: Duration) -> Self {
        self.sse_keepalive_interval = interval;
        self
    }

    /// Sets the per-session pending-request bound.
    pub fn with_pending_queue_max(mut self, max: usize) -> Self {
        self.pending_queue_max = max;
        self
    }

    /// Sets the SSE write buffer high-water mark.
    pub fn with_write_highwater_bytes(mut self, bytes: usize) -> Self {
        self.write_highwater_bytes = bytes;
        self
    }

    /// Sets the optional backend-response timeout for held requests.
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = Some(timeout);
        self
    }

    /// Sets the advertised log level.
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            sse_keepalive_interval: DEFAULT_SSE_KEEPALIVE_INTERVAL,
            pending_queue_max: DEFAULT_PENDING_QUEUE_MAX,
            write_highwater_bytes: DEFAULT_WRITE_HIGHWATER_BYTES,
            pending_timeout: None,
            log_level: Level::INFO,
        }
    }
}
