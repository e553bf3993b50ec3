//! Key/value settings store with typed accessors.
//!
//! Settings are passed explicitly to the components that read them (fault
//! guard, registry, rebind scheduler); there is no process-wide instance.
//! Values may be stored typed or as strings, since external configuration
//! sources deliver everything as text.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use switchyard_core::{Settings, settings::keys};
//!
//! let settings = Settings::new();
//! settings.set_string(keys::BEAN_REBIND_ATTEMPT_INTERVAL, "250");
//!
//! let interval = settings
//!     .get_duration_millis(keys::BEAN_REBIND_ATTEMPT_INTERVAL, Duration::from_secs(10))
//!     .expect("numeric setting");
//! assert_eq!(interval, Duration::from_millis(250));
//! ```

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;

/// Names of the settings recognized by switchyard.
pub mod keys {
    /// Interval between rebind attempts of an unhealthy stateful binding.
    pub const BEAN_REBIND_ATTEMPT_INTERVAL: &str = "beanRebindAttemptIntervalMillis";
    /// Per-call timeout applied by the fault guard.
    pub const FAULT_GUARD_TIMEOUT: &str = "faultGuard.timeoutMillis";
    /// Maximum in-flight calls per command group.
    pub const FAULT_GUARD_MAX_CONCURRENT_CALLS: &str = "faultGuard.maxConcurrentCalls";
    /// Consecutive failures that open the breaker.
    pub const FAULT_GUARD_FAILURE_THRESHOLD: &str = "faultGuard.failureThreshold";
    /// Error percentage within the rolling window that opens the breaker.
    pub const FAULT_GUARD_ERROR_RATE_PERCENT: &str = "faultGuard.errorRatePercent";
    /// Calls required in the rolling window before the error rate applies.
    pub const FAULT_GUARD_MINIMUM_CALLS: &str = "faultGuard.minimumCalls";
    /// Length of the rolling error-rate window.
    pub const FAULT_GUARD_ROLLING_WINDOW: &str = "faultGuard.rollingWindowMillis";
    /// Time an open breaker waits before letting a probe through.
    pub const FAULT_GUARD_COOL_DOWN: &str = "faultGuard.coolDownMillis";
    /// Whether the registry hides and evicts entries past their lease.
    pub const REGISTRY_ENFORCE_LEASES: &str = "registry.enforceLeases";
}

/// Errors from typed settings access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// The stored text is not a valid integer.
    #[error("setting {name} is not a number: {value:?}")]
    InvalidNumber {
        /// Setting name.
        name: String,
        /// The stored text.
        value: String,
    },

    /// The stored text is not a valid boolean.
    #[error("setting {name} is not a boolean: {value:?}")]
    InvalidBool {
        /// Setting name.
        name: String,
        /// The stored text.
        value: String,
    },

    /// The stored value is an integer where text was expected, or vice versa.
    #[error("setting {name} has type {found}, expected {expected}")]
    TypeMismatch {
        /// Setting name.
        name: String,
        /// The type that was requested.
        expected: &'static str,
        /// The type that is stored.
        found: &'static str,
    },

    /// A duration setting is negative.
    #[error("setting {name} must not be negative: {value}")]
    NegativeDuration {
        /// Setting name.
        name: String,
        /// The stored value.
        value: i64,
    },

    /// A numeric setting does not fit the range its consumer accepts.
    #[error("setting {name} is out of range: {value} (expected 0..={max})")]
    OutOfRange {
        /// Setting name.
        name: String,
        /// The stored value.
        value: i64,
        /// Largest accepted value.
        max: i64,
    },
}

/// A single stored setting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    /// Integer value.
    Long(i64),
    /// Boolean value.
    Bool(bool),
    /// Text value, parsed on typed access.
    Text(String),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Long(_) => "long",
            SettingValue::Bool(_) => "bool",
            SettingValue::Text(_) => "string",
        }
    }
}

/// Concurrent settings store.
///
/// Reads and writes may happen from any thread without external locking.
#[derive(Debug, Default)]
pub struct Settings {
    values: DashMap<String, SettingValue>,
}

impl Settings {
    /// Create an empty settings store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding every entry of `settings` as text.
    pub fn from_map(settings: &HashMap<String, String>) -> Self {
        let result = Self::new();
        result.set_all(settings);
        result
    }

    /// Store every entry of `settings` as text, overwriting existing values.
    pub fn set_all(&self, settings: &HashMap<String, String>) {
        for (name, value) in settings {
            self.values
                .insert(name.clone(), SettingValue::Text(value.clone()));
        }
    }

    /// Store an integer.
    pub fn set_long(&self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), SettingValue::Long(value));
    }

    /// Store a boolean.
    pub fn set_bool(&self, name: impl Into<String>, value: bool) {
        self.values.insert(name.into(), SettingValue::Bool(value));
    }

    /// Store a text value.
    pub fn set_string(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(name.into(), SettingValue::Text(value.into()));
    }

    /// Remove a setting, returning its previous value.
    pub fn remove(&self, name: &str) -> Option<SettingValue> {
        self.values.remove(name).map(|(_, value)| value)
    }

    /// Raw access to a stored value.
    pub fn get(&self, name: &str) -> Option<SettingValue> {
        self.values.get(name).map(|value| value.clone())
    }

    /// Read an integer, falling back to `default` when unset.
    ///
    /// Text values are parsed as integers.
    pub fn get_long(&self, name: &str, default: i64) -> Result<i64, SettingsError> {
        match self.get(name) {
            None => Ok(default),
            Some(SettingValue::Long(value)) => Ok(value),
            Some(SettingValue::Text(text)) => {
                text.trim()
                    .parse::<i64>()
                    .map_err(|_| SettingsError::InvalidNumber {
                        name: name.to_string(),
                        value: text,
                    })
            }
            Some(other) => Err(SettingsError::TypeMismatch {
                name: name.to_string(),
                expected: "long",
                found: other.type_name(),
            }),
        }
    }

    /// Read a boolean, falling back to `default` when unset.
    ///
    /// Text values `true`/`false` (any case) are accepted.
    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, SettingsError> {
        match self.get(name) {
            None => Ok(default),
            Some(SettingValue::Bool(value)) => Ok(value),
            Some(SettingValue::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(SettingsError::InvalidBool {
                    name: name.to_string(),
                    value: text,
                }),
            },
            Some(other) => Err(SettingsError::TypeMismatch {
                name: name.to_string(),
                expected: "bool",
                found: other.type_name(),
            }),
        }
    }

    /// Read a text value, falling back to `default` when unset.
    ///
    /// Typed values are rendered as text.
    pub fn get_string(&self, name: &str, default: &str) -> String {
        match self.get(name) {
            None => default.to_string(),
            Some(SettingValue::Text(text)) => text,
            Some(SettingValue::Long(value)) => value.to_string(),
            Some(SettingValue::Bool(value)) => value.to_string(),
        }
    }

    /// Read a millisecond duration, falling back to `default` when unset.
    pub fn get_duration_millis(
        &self,
        name: &str,
        default: Duration,
    ) -> Result<Duration, SettingsError> {
        let default_millis = i64::try_from(default.as_millis()).unwrap_or(i64::MAX);
        let millis = self.get_long(name, default_millis)?;
        u64::try_from(millis)
            .map(Duration::from_millis)
            .map_err(|_| SettingsError::NegativeDuration {
                name: name.to_string(),
                value: millis,
            })
    }
}
