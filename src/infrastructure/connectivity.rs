//! Connectivity oracles: answer "are we online?" and publish transitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::{AppConfig, AppError, Result};

/// Source of truth for network reachability.
#[async_trait]
pub trait ConnectivityOracle: Send + Sync {
    /// Current answer. May perform a live check.
    async fn is_online(&self) -> bool;

    /// Receiver that observes every change of the online flag.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Update `tx` only when the value changes, so receivers see transitions.
fn publish(tx: &watch::Sender<bool>, online: bool) -> bool {
    tx.send_if_modified(|current| {
        if *current == online {
            false
        } else {
            *current = online;
            true
        }
    })
}

/// Oracle whose answer is set explicitly.
pub struct ManualOracle {
    tx: watch::Sender<bool>,
}

impl ManualOracle {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        if publish(&self.tx, online) {
            tracing::info!(online, "Connectivity changed");
        }
    }
}

#[async_trait]
impl ConnectivityOracle for ManualOracle {
    async fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Oracle that probes the remote endpoint over HTTP.
///
/// Any HTTP response counts as reachable, whatever its status: the question is
/// whether the backend can be talked to, not whether the request was valid.
pub struct ProbeOracle {
    url: String,
    client: reqwest::Client,
    tx: watch::Sender<bool>,
}

impl ProbeOracle {
    /// Build a probe for the configured remote. Starts out offline until the
    /// first probe answers.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote.timeout_secs.clamp(1, 5)))
            .build()
            .map_err(|e| AppError::remote("Failed to build probe client", e))?;
        let (tx, _rx) = watch::channel(false);

        Ok(Self {
            url: format!("{}/rest/v1/", config.remote.url.trim_end_matches('/')),
            client,
            tx,
        })
    }

    /// Probe once and publish the result.
    pub async fn probe(&self) -> bool {
        let online = match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Probe failed");
                false
            }
        };

        if publish(&self.tx, online) {
            tracing::info!(online, "Connectivity changed");
        }
        online
    }

    /// Probe every `interval` in the background.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let oracle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                oracle.probe().await;
            }
        })
    }
}

#[async_trait]
impl ConnectivityOracle for ProbeOracle {
    async fn is_online(&self) -> bool {
        self.probe().await
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
