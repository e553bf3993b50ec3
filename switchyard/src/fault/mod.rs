//! Fault isolation for remote calls.
//!
//! Every dispatched call runs through a [`FaultGuard`] scoped to a
//! [`CommandGroup`]. All calls sharing a group share its isolation state:
//!
//! - **Bulkhead**: a bound on in-flight calls; excess calls are rejected
//!   immediately instead of queuing.
//! - **Timeout**: each call is bounded; exceeding it counts as a failure.
//! - **Circuit breaker**: Closed → Open after sustained failures, Open →
//!   Half-Open after a cool-down, where a single probe decides between
//!   Closed and Open again.
//!
//! The guard knows nothing about routing or reduction; it wraps any
//! asynchronous unit of work returning a `Result`.

use std::fmt;
use std::time::Duration;

use switchyard_core::settings::keys;
use switchyard_core::{Settings, SettingsError};
use tokio::sync::Semaphore;

mod breaker;
mod guard;

pub use breaker::BreakerStatus;
pub use guard::{FanOutPermit, FaultGuard, GroupStats};

/// Unit of fault isolation.
///
/// Derived from the endpoint group (e.g. a space name) and the simplified
/// service API name, so every service on a given endpoint group gets its
/// own breaker and bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandGroup {
    group_key: String,
    isolation_group: String,
}

impl CommandGroup {
    /// Create a command group from explicit keys.
    pub fn new(group_key: impl Into<String>, isolation_group: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            isolation_group: isolation_group.into(),
        }
    }

    /// Derive the command group for calls to `service_api` on `endpoint_group`.
    ///
    /// ```rust
    /// use switchyard::fault::CommandGroup;
    ///
    /// let group = CommandGroup::for_service("mySpace", "com.example.lunch.LunchService");
    /// assert_eq!(group.group_key(), "mySpace_LunchService");
    /// assert_eq!(group.isolation_group(), "mySpace");
    /// ```
    pub fn for_service(endpoint_group: &str, service_api: &str) -> Self {
        Self::new(
            format!("{}_{}", endpoint_group, simplified_api_name(service_api)),
            endpoint_group,
        )
    }

    /// Key identifying this group.
    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// Endpoint-level group this command group belongs to.
    pub fn isolation_group(&self) -> &str {
        &self.isolation_group
    }
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group_key)
    }
}

/// Last path segment of a fully qualified service identifier.
///
/// Both `.` and `::` separators are understood.
pub fn simplified_api_name(service_api: &str) -> &str {
    let after_path = service_api.rsplit("::").next().unwrap_or(service_api);
    after_path.rsplit('.').next().unwrap_or(after_path)
}

/// Why a call was rejected without being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The breaker is open (or half-open with its probe in flight).
    BreakerOpen,
    /// The group's concurrency bound is exhausted.
    ConcurrencyLimit,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BreakerOpen => write!(f, "circuit breaker open"),
            RejectReason::ConcurrencyLimit => write!(f, "concurrency limit reached"),
        }
    }
}

/// Errors decided locally by the fault guard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    /// The call was rejected and the work never started.
    #[error("call rejected for {group}: {reason}")]
    Rejected {
        /// Group that rejected the call.
        group: CommandGroup,
        /// Why the call was rejected.
        reason: RejectReason,
    },

    /// The call exceeded its time bound.
    #[error("call timed out for {group} after {after:?}")]
    Timeout {
        /// Group the call ran in.
        group: CommandGroup,
        /// The configured bound.
        after: Duration,
    },
}

/// Error type of work run under the guard.
///
/// Rejections and timeouts decided by the guard convert into it, and it
/// decides which of its own values the breaker records as failures.
pub trait GuardedError: From<FaultError> {
    /// Check whether this error is recorded as a breaker failure.
    ///
    /// An error that does not count still ends the call, but leaves the
    /// breaker's failure accounting untouched.
    fn counts_as_failure(&self) -> bool {
        true
    }
}

/// Isolation settings for a command group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultGuardConfig {
    /// Bound on each call's duration.
    pub timeout: Duration,

    /// Maximum in-flight calls per group.
    ///
    /// Capped at [`Semaphore::MAX_PERMITS`].
    pub max_concurrent_calls: usize,

    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,

    /// Error percentage within the rolling window that opens the breaker.
    ///
    /// Zero disables the error-rate check.
    pub error_rate_percent: u32,

    /// Calls required in the rolling window before the error rate applies.
    pub minimum_calls: u32,

    /// Length of the rolling error-rate window.
    pub rolling_window: Duration,

    /// Time an open breaker waits before letting a probe through.
    pub cool_down: Duration,
}

impl Default for FaultGuardConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_concurrent_calls: 10,
            failure_threshold: 20,
            error_rate_percent: 50,
            minimum_calls: 20,
            rolling_window: Duration::from_secs(10),
            cool_down: Duration::from_secs(5),
        }
    }
}

impl FaultGuardConfig {
    /// Read the configuration from settings, defaulting unset keys.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let defaults = Self::default();
        Ok(Self {
            timeout: settings.get_duration_millis(keys::FAULT_GUARD_TIMEOUT, defaults.timeout)?,
            max_concurrent_calls: bounded(
                settings,
                keys::FAULT_GUARD_MAX_CONCURRENT_CALLS,
                defaults.max_concurrent_calls,
                Semaphore::MAX_PERMITS,
            )?,
            failure_threshold: bounded(
                settings,
                keys::FAULT_GUARD_FAILURE_THRESHOLD,
                defaults.failure_threshold,
                u32::MAX,
            )?,
            error_rate_percent: bounded(
                settings,
                keys::FAULT_GUARD_ERROR_RATE_PERCENT,
                defaults.error_rate_percent,
                u32::MAX,
            )?
            .min(100),
            minimum_calls: bounded(
                settings,
                keys::FAULT_GUARD_MINIMUM_CALLS,
                defaults.minimum_calls,
                u32::MAX,
            )?,
            rolling_window: settings
                .get_duration_millis(keys::FAULT_GUARD_ROLLING_WINDOW, defaults.rolling_window)?,
            cool_down: settings.get_duration_millis(keys::FAULT_GUARD_COOL_DOWN, defaults.cool_down)?,
        })
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the concurrency bound, capped at [`Semaphore::MAX_PERMITS`].
    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls.min(Semaphore::MAX_PERMITS);
        self
    }

    /// Set the consecutive-failure threshold.
    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Set the error-rate threshold and the volume it needs.
    pub fn with_error_rate(mut self, percent: u32, minimum_calls: u32) -> Self {
        self.error_rate_percent = percent.min(100);
        self.minimum_calls = minimum_calls;
        self
    }

    /// Set the rolling window length.
    pub fn with_rolling_window(mut self, rolling_window: Duration) -> Self {
        self.rolling_window = rolling_window;
        self
    }

    /// Set the open-state cool-down.
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

/// Read an integer setting that must lie in `0..=max`.
fn bounded<T>(settings: &Settings, name: &str, default: T, max: T) -> Result<T, SettingsError>
where
    T: Copy + PartialOrd + TryFrom<i64> + TryInto<i64>,
{
    let value = settings.get_long(name, default.try_into().unwrap_or(i64::MAX))?;
    T::try_from(value)
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| SettingsError::OutOfRange {
            name: name.to_string(),
            value,
            max: max.try_into().unwrap_or(i64::MAX),
        })
}
