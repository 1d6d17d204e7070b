use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{NegotiationError, ReceiverError};

/// Host serving both the channel broker and the gateway sockets.
pub const DEFAULT_HOST: &str = "www.berserkr.llc";

/// Broker path answering channel negotiation requests.
pub const DEFAULT_CHANNEL_PATH: &str = "/chainsawchoker/channel";

// =============================================================================
// Receiver configuration
// =============================================================================
//
// Read once per `start()`. Rebuilds after a disconnect reuse the settings
// captured by that `start()`; changes only apply from the next `start()`.

/// Channel identity and shared secret.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelCredentials {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ChannelCredentials {
    fn default() -> Self {
        Self {
            guid: String::new(),
            password: String::new(),
            host: default_host(),
        }
    }
}

impl fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("guid", &self.guid)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

impl ChannelCredentials {
    pub fn validate(&self) -> Result<(), ReceiverError> {
        if self.guid.trim().is_empty() {
            return Err(ReceiverError::InvalidConfig("guid is empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(ReceiverError::InvalidConfig("password is empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(ReceiverError::InvalidConfig("host is empty".to_string()));
        }
        Ok(())
    }
}

/// Where and how to reach the channel broker (lives under `[broker]`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_channel_path")]
    pub path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            port: default_broker_port(),
            path: default_channel_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BrokerConfig {
    /// Channel endpoint on `host`, without query parameters.
    pub fn channel_url(&self, host: &str) -> Result<reqwest::Url, NegotiationError> {
        let raw = format!("{}://{}:{}{}", self.scheme, host, self.port, self.path);
        reqwest::Url::parse(&raw).map_err(|e| NegotiationError::InvalidUrl(format!("{raw}: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Timeouts for the TCP gateway (lives under `[gateway]`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on the auth request/reply exchange after connecting.
    #[serde(default = "default_gateway_timeout_secs")]
    pub auth_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_gateway_timeout_secs(),
            auth_timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Backoff between session rebuilds (lives under `[restart]`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartPolicy {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failed rebuilds tolerated before giving up (None = forever).
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl RestartPolicy {
    /// Delay before rebuild `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// Everything a receiver needs to run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Receiver name, used in log fields.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(flatten)]
    pub credentials: ChannelCredentials,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            credentials: ChannelCredentials::default(),
            broker: BrokerConfig::default(),
            gateway: GatewayConfig::default(),
            restart: RestartPolicy::default(),
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ReceiverError> {
        self.credentials.validate()?;
        if self.broker.port == 0 {
            return Err(ReceiverError::InvalidConfig("broker port is 0".to_string()));
        }
        if !self.broker.path.starts_with('/') {
            return Err(ReceiverError::InvalidConfig(format!(
                "broker path must start with '/': {}",
                self.broker.path
            )));
        }
        if self.gateway.connect_timeout_secs == 0 || self.gateway.auth_timeout_secs == 0 {
            return Err(ReceiverError::InvalidConfig(
                "gateway timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_name() -> String {
    "payload-receiver".to_string()
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_scheme() -> String {
    "https".to_string()
}
fn default_broker_port() -> u16 {
    8443
}
fn default_channel_path() -> String {
    DEFAULT_CHANNEL_PATH.to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
