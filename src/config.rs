use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub queue: String,
    pub durable: bool,
    pub message_ttl: Option<Duration>,
    pub max_priority: Option<u8>,
    pub confirm_delivery: bool,
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            queue: String::new(),
            durable: true,
            message_ttl: None,
            max_priority: None,
            confirm_delivery: true,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Queue-level message TTL as the millisecond value used at declare time.
    pub fn message_ttl_ms(&self) -> Option<u64> {
        self.message_ttl.map(|ttl| ttl.as_millis() as u64)
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.config.queue = queue.into();
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.config.durable = durable;
        self
    }

    /// Queue-level message TTL in whole minutes; 0 disables expiration.
    pub fn message_ttl_minutes(mut self, minutes: u64) -> Self {
        self.config.message_ttl = if minutes > 0 {
            Some(Duration::from_secs(minutes * 60))
        } else {
            None
        };
        self
    }

    /// Maximum message priority; a value above 0 enables priority mode.
    pub fn max_priority(mut self, max: u8) -> Self {
        self.config.max_priority = if max > 0 { Some(max) } else { None };
        self
    }

    pub fn confirm_delivery(mut self, confirm: bool) -> Self {
        self.config.confirm_delivery = confirm;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval = Duration::from_millis(ms);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
