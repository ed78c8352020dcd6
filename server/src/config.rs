use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Runtime configuration, read once at startup. Everything has a default
/// so a bare `cargo run` comes up on the local network; the safety knobs
/// (staleness threshold, sweep cadence) are deployment policy, not code.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit bind address; falls back to the machine's local IP.
    pub bind_addr: Option<SocketAddr>,
    /// Plain-HTTP port that redirects to HTTPS when TLS is enabled.
    pub http_redirect_port: u16,
    pub tls: Option<TlsConfig>,

    /// Silence window after which a reporting participant counts as stale.
    pub stale_threshold: Duration,
    /// Cadence of the staleness sweep.
    pub sweep_interval: Duration,
    /// Budget for sweeping a single trip before it is skipped.
    pub sweep_timeout: Duration,

    /// Base URL of the trip/booking service that owns rosters.
    pub roster_url: String,
    /// Endpoint of the notification service.
    pub notify_url: String,
    pub notify_timeout: Duration,
    pub notify_retry_limit: u32,
    pub notify_retry_base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let tls = match (std::env::var("TRACKING_TLS_CERT"), std::env::var("TRACKING_TLS_KEY")) {
            (Ok(cert), Ok(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => None,
        };

        Self {
            bind_addr: std::env::var("TRACKING_BIND_ADDR").ok().and_then(|value| value.parse().ok()),
            http_redirect_port: env_u64("TRACKING_HTTP_REDIRECT_PORT", 80) as u16,
            tls,
            stale_threshold: Duration::from_secs(env_u64("TRACKING_STALE_THRESHOLD_SECS", 15 * 60)),
            sweep_interval: Duration::from_secs(env_u64("TRACKING_SWEEP_INTERVAL_SECS", 60)),
            sweep_timeout: Duration::from_secs(env_u64("TRACKING_SWEEP_TIMEOUT_SECS", 10)),
            roster_url: std::env::var("TRIP_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8086".to_string()),
            notify_url: std::env::var("NOTIFICATION_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8087/notify".to_string()),
            notify_timeout: Duration::from_secs(env_u64("NOTIFICATION_TIMEOUT_SECS", 5)),
            notify_retry_limit: env_u64("NOTIFICATION_RETRY_LIMIT", 5) as u32,
            notify_retry_base_delay: Duration::from_millis(env_u64("NOTIFICATION_RETRY_BASE_MS", 2000)),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
