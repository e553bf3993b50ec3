//! Service registry: maps service identities to endpoint descriptions.
//!
//! The registry is the platform's "phone book". Providers publish a
//! [`ServiceEntry`] under its [`ServiceKey`]; consumers look entries up when
//! a binding is created and again whenever the rebind scheduler decides a
//! binding is stale.
//!
//! # Design
//!
//! - [`ServiceRegistry`] is a trait so implementations can range from the
//!   in-process map below to a remote registry service.
//! - Registration is an upsert: last writer wins, no merge.
//! - Leases are advisory unless [`LeasePolicy::Enforced`] is configured,
//!   in which case expired entries become invisible and can be evicted.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use switchyard_core::settings::keys;
use switchyard_core::{
    PropertyBagError, ServiceEntry, ServiceKey, Settings, SettingsError, SharedTimeProvider,
    TokioTimeProvider,
};

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No entry is registered under the key.
    #[error("service not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: ServiceKey,
    },

    /// An entry received in wire shape could not be decoded.
    #[error("malformed registry entry: {0}")]
    MalformedEntry(#[from] PropertyBagError),
}

/// Directory of live service entries.
///
/// Implementations synchronize internally: callers may register and look
/// up concurrently from any thread without external locking.
#[async_trait::async_trait]
pub trait ServiceRegistry: Send + Sync + fmt::Debug {
    /// Upsert `entry` under its key with the given lease.
    ///
    /// Always succeeds; the lease replaces the entry's own
    /// `lease_duration_millis`.
    async fn register(&self, entry: ServiceEntry, lease_millis: u64);

    /// Look up the entry for `service_type` and `qualifier`.
    ///
    /// Returns `RegistryError::NotFound` when no entry exists. Never
    /// performs network I/O in the in-process implementation.
    async fn lookup(
        &self,
        service_type: &str,
        qualifier: Option<&str>,
    ) -> Result<ServiceEntry, RegistryError>;

    /// Snapshot of all entries at call time.
    ///
    /// May or may not reflect a registration racing the snapshot.
    async fn list_services(&self) -> Vec<ServiceEntry>;

    /// Remove the entry for `key`, returning it if it existed.
    async fn deregister(&self, key: &ServiceKey) -> Option<ServiceEntry>;
}

/// How the registry treats lease durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeasePolicy {
    /// Leases are informational; entries live until replaced or removed.
    #[default]
    Advisory,
    /// Entries past their lease are invisible and removed by
    /// [`InMemoryServiceRegistry::evict_expired`].
    Enforced,
}

/// Configuration for [`InMemoryServiceRegistry`].
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Lease handling policy.
    pub lease_policy: LeasePolicy,
}

impl RegistryConfig {
    /// Read the registry configuration from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let lease_policy = if settings.get_bool(keys::REGISTRY_ENFORCE_LEASES, false)? {
            LeasePolicy::Enforced
        } else {
            LeasePolicy::Advisory
        };
        Ok(Self { lease_policy })
    }

    /// Set the lease policy.
    pub fn with_lease_policy(mut self, lease_policy: LeasePolicy) -> Self {
        self.lease_policy = lease_policy;
        self
    }
}

#[derive(Debug, Clone)]
struct Registration {
    entry: ServiceEntry,
    expires_at: Duration,
}

/// In-process registry backed by a concurrent map.
///
/// Holds at most one entry per [`ServiceKey`].
#[derive(Debug)]
pub struct InMemoryServiceRegistry {
    entries: DashMap<ServiceKey, Registration>,
    config: RegistryConfig,
    time: SharedTimeProvider,
}

impl InMemoryServiceRegistry {
    /// Create an empty registry with advisory leases.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), TokioTimeProvider::shared())
    }

    /// Create an empty registry with explicit configuration and clock.
    pub fn with_config(config: RegistryConfig, time: SharedTimeProvider) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            time,
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove entries whose lease has run out.
    ///
    /// Returns the number of evicted entries. Does nothing under
    /// [`LeasePolicy::Advisory`].
    pub fn evict_expired(&self) -> usize {
        if self.config.lease_policy == LeasePolicy::Advisory {
            return 0;
        }
        let now = self.time.now();
        let before = self.entries.len();
        self.entries
            .retain(|_, registration| registration.expires_at > now);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::info!(evicted, "evicted expired registry entries");
        }
        evicted
    }

    fn is_visible(&self, registration: &Registration, now: Duration) -> bool {
        match self.config.lease_policy {
            LeasePolicy::Advisory => true,
            LeasePolicy::Enforced => registration.expires_at > now,
        }
    }
}

impl Default for InMemoryServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn register(&self, entry: ServiceEntry, lease_millis: u64) {
        let mut entry = entry;
        entry.lease_duration_millis = lease_millis;
        let expires_at = self.time.now() + Duration::from_millis(lease_millis);
        tracing::debug!(service = %entry.key, lease_millis, "registering service");
        self.entries
            .insert(entry.key.clone(), Registration { entry, expires_at });
    }

    async fn lookup(
        &self,
        service_type: &str,
        qualifier: Option<&str>,
    ) -> Result<ServiceEntry, RegistryError> {
        let key = ServiceKey::new(service_type, qualifier);
        let now = self.time.now();
        match self.entries.get(&key) {
            Some(registration) if self.is_visible(&registration, now) => {
                Ok(registration.entry.clone())
            }
            _ => Err(RegistryError::NotFound { key }),
        }
    }

    async fn list_services(&self) -> Vec<ServiceEntry> {
        let now = self.time.now();
        self.entries
            .iter()
            .filter(|registration| self.is_visible(registration.value(), now))
            .map(|registration| registration.entry.clone())
            .collect()
    }

    async fn deregister(&self, key: &ServiceKey) -> Option<ServiceEntry> {
        self.entries
            .remove(key)
            .map(|(_, registration)| registration.entry)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use switchyard_core::ServiceProperties;

    use super::*;

    fn lunch_entry(space_name: &str) -> ServiceEntry {
        ServiceEntry::new(
            ServiceKey::unqualified("LunchService"),
            ServiceProperties::new()
                .with("api", "GigaSpace")
                .with("spaceName", space_name),
            60_000,
        )
    }

    #[tokio::test]
    async fn test_lookup_empty() {
        let registry = InMemoryServiceRegistry::new();
        let result = registry.lookup("LunchService", None).await;
        assert_eq!(
            result,
            Err(RegistryError::NotFound {
                key: ServiceKey::unqualified("LunchService")
            })
        );
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = InMemoryServiceRegistry::new();
        registry.register(lunch_entry("mySpace"), 60_000).await;

        let entry = registry
            .lookup("LunchService", None)
            .await
            .expect("lookup should succeed");
        assert_eq!(entry.properties.get("spaceName"), Some("mySpace"));
        assert_eq!(entry.properties.api(), Some("GigaSpace"));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let registry = InMemoryServiceRegistry::new();
        registry.register(lunch_entry("first"), 60_000).await;
        registry.register(lunch_entry("second"), 60_000).await;

        let entry = registry
            .lookup("LunchService", None)
            .await
            .expect("lookup should succeed");
        assert_eq!(entry.properties.get("spaceName"), Some("second"));
        assert_eq!(registry.list_services().await.len(), 1);
    }

    #[tokio::test]
    async fn test_qualifier_distinguishes_entries() {
        let registry = InMemoryServiceRegistry::new();
        let qualified = ServiceEntry::new(
            ServiceKey::new("LunchService", Some("eu")),
            ServiceProperties::new().with("spaceName", "euSpace"),
            60_000,
        );
        registry.register(lunch_entry("mySpace"), 60_000).await;
        registry.register(qualified, 60_000).await;

        let eu = registry
            .lookup("LunchService", Some("eu"))
            .await
            .expect("qualified lookup");
        assert_eq!(eu.properties.get("spaceName"), Some("euSpace"));
        assert!(registry.lookup("LunchService", Some("us")).await.is_err());
        assert_eq!(registry.list_services().await.len(), 2);
    }

    #[tokio::test]
    async fn test_register_stores_lease() {
        let registry = InMemoryServiceRegistry::new();
        registry.register(lunch_entry("mySpace"), 5_000).await;
        let entry = registry
            .lookup("LunchService", None)
            .await
            .expect("lookup should succeed");
        assert_eq!(entry.lease_duration_millis, 5_000);
    }

    #[tokio::test]
    async fn test_deregister_and_clear() {
        let registry = InMemoryServiceRegistry::new();
        registry.register(lunch_entry("mySpace"), 60_000).await;

        let removed = registry
            .deregister(&ServiceKey::unqualified("LunchService"))
            .await;
        assert!(removed.is_some());
        assert!(registry.lookup("LunchService", None).await.is_err());

        registry.register(lunch_entry("mySpace"), 60_000).await;
        registry.clear();
        assert!(registry.list_services().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advisory_lease_never_expires() {
        let registry = InMemoryServiceRegistry::new();
        registry.register(lunch_entry("mySpace"), 1_000).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(registry.lookup("LunchService", None).await.is_ok());
        assert_eq!(registry.evict_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforced_lease_expires() {
        let registry = InMemoryServiceRegistry::with_config(
            RegistryConfig::default().with_lease_policy(LeasePolicy::Enforced),
            TokioTimeProvider::shared(),
        );
        registry.register(lunch_entry("mySpace"), 1_000).await;
        assert!(registry.lookup("LunchService", None).await.is_ok());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(registry.lookup("LunchService", None).await.is_err());
        assert!(registry.list_services().await.is_empty());
        assert_eq!(registry.evict_expired(), 1);

        // Re-registration renews the lease.
        registry.register(lunch_entry("mySpace"), 1_000).await;
        assert!(registry.lookup("LunchService", None).await.is_ok());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings::new();
        assert_eq!(
            RegistryConfig::from_settings(&settings)
                .expect("defaults")
                .lease_policy,
            LeasePolicy::Advisory
        );

        settings.set_string(keys::REGISTRY_ENFORCE_LEASES, "true");
        assert_eq!(
            RegistryConfig::from_settings(&settings)
                .expect("enforced")
                .lease_policy,
            LeasePolicy::Enforced
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..50 {
                    let entry = ServiceEntry::new(
                        ServiceKey::unqualified(format!("Service{}", i % 4)),
                        ServiceProperties::new().with("round", round.to_string()),
                        60_000,
                    );
                    registry.register(entry, 60_000).await;
                    let _ = registry.lookup("Service0", None).await;
                    let _ = registry.list_services().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        let services = registry.list_services().await;
        assert_eq!(services.len(), 4);
    }
}
