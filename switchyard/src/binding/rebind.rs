//! Background re-resolution of stale bindings.
//!
//! # Design
//!
//! One scheduler task per binding. The scheduler holds the binding weakly
//! so it never keeps it alive, and waits on the binding's staleness
//! [`Notify`] while the binding is healthy, which costs nothing. Once the
//! binding is unhealthy it attempts a registry lookup and rebind once per
//! interval until one succeeds, then goes back to idling.
//!
//! The loop ends when its [`CancellationToken`] fires or the binding is
//! dropped. The rebind is idempotent, so a spurious wake-up only costs one
//! extra check.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::settings::keys;
use switchyard_core::{ServiceKey, Settings, SettingsError, SharedTimeProvider};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RemotingError;

/// A binding whose endpoint can be re-resolved.
#[async_trait]
pub trait Rebindable: Send + Sync {
    /// Key the binding resolves.
    fn service_key(&self) -> &ServiceKey;

    /// Check whether the binding is believed usable.
    fn is_healthy(&self) -> bool;

    /// Notified when the binding turns unhealthy or is dropped.
    fn staleness_signal(&self) -> Arc<Notify>;

    /// Resolve the key again and swap in a fresh endpoint.
    ///
    /// Returns `Ok(false)` when the service is not registered.
    async fn rebind(&self) -> Result<bool, RemotingError>;
}

/// Rebind scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebindConfig {
    /// Delay between rebind attempts while unhealthy.
    pub interval: Duration,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

impl RebindConfig {
    /// Read `beanRebindAttemptIntervalMillis`, defaulting to 10 seconds.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self {
            interval: settings
                .get_duration_millis(keys::BEAN_REBIND_ATTEMPT_INTERVAL, Self::default().interval)?,
        })
    }

    /// Set the attempt interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Periodically rebinds one binding while it is unhealthy.
pub struct RebindScheduler {
    binding: Weak<dyn Rebindable>,
    signal: Arc<Notify>,
    config: RebindConfig,
    time: SharedTimeProvider,
    cancel: CancellationToken,
}

impl RebindScheduler {
    /// Create a scheduler for `binding`.
    pub fn new<B: Rebindable + 'static>(
        binding: &Arc<B>,
        config: RebindConfig,
        time: SharedTimeProvider,
        cancel: CancellationToken,
    ) -> Self {
        let signal = binding.staleness_signal();
        let weak: Weak<B> = Arc::downgrade(binding);
        Self {
            binding: weak,
            signal,
            config,
            time,
            cancel,
        }
    }

    /// Attempt one rebind if the binding is unhealthy.
    ///
    /// Returns whether the binding is healthy afterwards; a dropped binding
    /// counts as not healthy.
    pub async fn run_once(&self) -> bool {
        let Some(binding) = self.binding.upgrade() else {
            return false;
        };
        if binding.is_healthy() {
            return true;
        }
        match binding.rebind().await {
            Ok(true) => {
                tracing::info!(service = %binding.service_key(), "binding rebound");
                true
            }
            Ok(false) => {
                tracing::warn!(
                    service = %binding.service_key(),
                    interval = ?self.config.interval,
                    "service still not registered, will retry"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    service = %binding.service_key(),
                    error = %e,
                    "rebind failed, will retry"
                );
                false
            }
        }
    }

    /// Run until cancelled or until the binding is dropped.
    pub async fn run(self) {
        loop {
            let healthy = match self.binding.upgrade() {
                Some(binding) => binding.is_healthy(),
                None => break,
            };

            if healthy {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.signal.notified() => continue,
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.time.sleep(self.config.interval) => {}
            }
            self.run_once().await;
        }
        tracing::debug!("rebind scheduler stopped");
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl std::fmt::Debug for RebindScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebindScheduler")
            .field("config", &self.config)
            .field("bound", &(self.binding.strong_count() > 0))
            .finish()
    }
}
