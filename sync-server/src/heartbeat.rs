//! Directory registration.
//!
//! While enabled, the server announces itself to a directory service
//! immediately and then every `interval + uniform(0, jitter)`. Failures are
//! logged and the next beat is attempted on schedule.

use crate::config::DirectoryConfig;
use crate::error::DirectoryError;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A directory the server can announce itself to.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Announce `name` listening on `port`.
    async fn heartbeat(&self, name: &str, port: u16) -> Result<(), DirectoryError>;
}

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    name: &'a str,
    port: u16,
}

/// Directory reached over HTTP: `POST {url}/heartbeat`.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    url: String,
}

impl HttpDirectory {
    /// Create a client for the directory at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn heartbeat(&self, name: &str, port: u16) -> Result<(), DirectoryError> {
        let response = self
            .client
            .post(format!("{}/heartbeat", self.url))
            .json(&HeartbeatBody { name, port })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DirectoryError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// When to beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSchedule {
    /// Base interval.
    pub interval: Duration,
    /// Upper bound of the random extra delay.
    pub jitter: Duration,
}

impl HeartbeatSchedule {
    /// Schedule from the `[directory]` section.
    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            jitter: Duration::from_secs(config.jitter_secs),
        }
    }

    /// Delay before the next beat.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.interval + Duration::from_millis(extra)
    }
}

/// Spawn the heartbeat loop. It stops when `shutdown` flips to `true`.
pub fn spawn_heartbeat_task(
    directory: Arc<dyn Directory>,
    name: String,
    port: u16,
    schedule: HeartbeatSchedule,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Directory heartbeat started for {} on port {} (every {:?} + up to {:?})",
            name,
            port,
            schedule.interval,
            schedule.jitter
        );
        loop {
            match directory.heartbeat(&name, port).await {
                Ok(()) => tracing::debug!("Directory heartbeat sent"),
                Err(e) => tracing::warn!("Directory heartbeat failed: {}", e),
            }

            let delay = schedule.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Directory heartbeat stopped");
    })
}
