//! Sender configuration

use std::time::Duration;

use crate::core::slug::Origin;
use crate::signaling::poller::DEFAULT_RENEW_INTERVAL;

/// Relay used when none is configured
pub const DEFAULT_RELAY_URL: &str = "http://localhost:8080";

/// Upper bound for a single relay request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one sender session
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Base URL of the relay API
    pub relay_url: String,
    /// Origin download links are built against; defaults to the relay's
    pub origin: Option<Origin>,
    pub renew_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            origin: None,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl UploaderConfig {
    /// The configured origin, or the relay URL's own scheme/host/port.
    pub fn download_origin(&self) -> Result<Origin, url::ParseError> {
        match &self.origin {
            Some(origin) => Ok(origin.clone()),
            None => Origin::parse(&self.relay_url),
        }
    }
}
