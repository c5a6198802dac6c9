//! Configuration module for environment variable parsing.
//!
//! Both binaries read everything from the environment; unset or unparseable
//! values fall back to defaults.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::queue::{Topology, BUILD_QUEUE, PUBLISH_TIMEOUT, STATUS_EXCHANGE};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Full RabbitMQ URL, built from host and credentials unless `AMQP_URL` is set
    pub amqp_url: String,

    /// Queue carrying build requests
    pub build_queue: String,

    /// Direct exchange for status updates
    pub status_exchange: String,

    /// Deadline for a single publish
    pub publish_timeout: Duration,

    /// Worker pause after polling an empty queue
    pub poll_interval: Duration,

    /// Cap for the worker's backoff after consume errors
    pub backoff_max: Duration,

    /// How long `consume_all` waits for an announced delivery to arrive
    pub drain_idle: Duration,

    /// Duration of the stub build routine
    pub build_duration: Duration,

    /// Port for the gateway to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let amqp_url = env::var("AMQP_URL").unwrap_or_else(|_| {
            amqp_url(
                &env::var("AMQP_USER").unwrap_or_else(|_| "admin".to_string()),
                &env::var("AMQP_PASSWORD").unwrap_or_else(|_| "admin".to_string()),
                &env::var("AMQP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            )
        });

        Config {
            amqp_url,

            build_queue: env::var("BUILD_QUEUE").unwrap_or_else(|_| BUILD_QUEUE.to_string()),

            status_exchange: env::var("STATUS_EXCHANGE")
                .unwrap_or_else(|_| STATUS_EXCHANGE.to_string()),

            publish_timeout: parse_millis("PUBLISH_TIMEOUT_MS", PUBLISH_TIMEOUT),

            poll_interval: parse_millis("POLL_INTERVAL_MS", Duration::from_millis(250)),

            backoff_max: parse_millis("BACKOFF_MAX_MS", Duration::from_secs(30)),

            drain_idle: parse_millis("DRAIN_IDLE_MS", Duration::from_millis(200)),

            build_duration: parse_millis("BUILD_DURATION_MS", Duration::from_secs(10)),

            port: parse_port("PORT", 8080),
        }
    }

    /// Topology names to declare at broker startup.
    pub fn topology(&self) -> Topology {
        Topology {
            build_queue: self.build_queue.clone(),
            status_exchange: self.status_exchange.clone(),
        }
    }
}

/// `amqp://<user>:<password>@<host>:5672/`
pub fn amqp_url(user: &str, password: &str, host: &str) -> String {
    format!("amqp://{}:{}@{}:5672/", user, password, host)
}

/// Parse a millisecond count like "5000" into a `Duration`.
fn parse_millis(name: &str, default: Duration) -> Duration {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid duration, using default");
            default
        }
    }
}

/// Parse a TCP port like "8080".
fn parse_port(name: &str, default: u16) -> u16 {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid port, using default");
            default
        }
    }
}
