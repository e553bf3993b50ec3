//! Time provider abstraction.
//!
//! Breaker cool-downs, call timeouts, lease expiry and rebind intervals all
//! read time through [`TimeProvider`], so tests can drive them with a paused
//! tokio clock instead of real waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Provider trait for time operations.
///
/// Object safe: components hold an `Arc<dyn TimeProvider>`.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Monotonic time elapsed since the provider was created.
    ///
    /// Use this for deadlines and elapsed-time comparisons.
    fn now(&self) -> Duration;
}

/// Shared handle to a time provider.
pub type SharedTimeProvider = Arc<dyn TimeProvider>;

/// Real time provider using tokio's time facilities.
///
/// Built on `tokio::time::Instant`, so a paused test runtime
/// (`#[tokio::test(start_paused = true)]`) controls it too.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start_time: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
        }
    }

    /// Create a shared handle to a new tokio time provider.
    pub fn shared() -> SharedTimeProvider {
        Arc::new(Self::new())
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}
