use std::time::Duration;

use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

const DEFAULT_VEHICLE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_FETCH_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: Url,
    /// Vehicle positions are polled on this interval regardless of push
    /// activity; push frames carry no per-vehicle position deltas.
    pub vehicle_poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Roster page size for vehicle and anomaly fetches.
    pub fetch_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_base: Url::parse(DEFAULT_API_BASE).expect("default base url is valid"),
            vehicle_poll_interval: DEFAULT_VEHICLE_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }
}

impl ClientConfig {
    pub fn with_api_base(api_base: Url) -> Self {
        ClientConfig {
            api_base,
            ..ClientConfig::default()
        }
    }

    /// Push-stream URL for the given token: the HTTP base switched to
    /// the matching ws scheme, with the bearer carried as a query
    /// parameter.
    pub fn stream_url(&self, token: &str) -> Url {
        let mut url = self.api_base.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // set_scheme only rejects invalid transitions; http(s)->ws(s) is allowed.
        let _ = url.set_scheme(scheme);
        url.set_path("/realtime/stream");
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }
}
