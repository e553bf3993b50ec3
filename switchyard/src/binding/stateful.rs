//! A cached, swappable binding to one service.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use switchyard_core::{ServiceEntry, ServiceKey};
use tokio::sync::Notify;

use super::rebind::Rebindable;
use super::ServiceBinder;
use crate::error::RemotingError;
use crate::registry::{RegistryError, ServiceRegistry};

struct Bound<S> {
    entry: ServiceEntry,
    service: Arc<S>,
}

/// Binding caching the handle resolved for one [`ServiceKey`].
///
/// The active handle lives behind an [`ArcSwapOption`]: a reader observes
/// either the handle before a rebind or the one after, never a mix. Only
/// the rebind path replaces it.
pub struct StatefulBinding<S> {
    key: ServiceKey,
    registry: Arc<dyn ServiceRegistry>,
    binder: Arc<dyn ServiceBinder<S>>,
    active: ArcSwapOption<Bound<S>>,
    healthy: AtomicBool,
    stale: Arc<Notify>,
}

impl<S: Send + Sync + 'static> StatefulBinding<S> {
    /// Resolve `key` and bind it.
    ///
    /// A service that is not registered yet gives an unbound, unhealthy
    /// binding rather than an error; its scheduler binds it once it shows
    /// up.
    ///
    /// # Errors
    ///
    /// Malformed registry data or a binder refusing the entry.
    pub async fn bind(
        key: ServiceKey,
        registry: Arc<dyn ServiceRegistry>,
        binder: Arc<dyn ServiceBinder<S>>,
    ) -> Result<Arc<Self>, RemotingError> {
        let binding = Arc::new(Self {
            key,
            registry,
            binder,
            active: ArcSwapOption::empty(),
            healthy: AtomicBool::new(false),
            stale: Arc::new(Notify::new()),
        });
        if !binding.try_rebind().await? {
            tracing::info!(service = %binding.key, "service not registered yet, binding left unbound");
        }
        Ok(binding)
    }

    /// The key this binding resolves.
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// The active handle, if bound.
    pub fn current(&self) -> Option<Arc<S>> {
        self.active
            .load()
            .as_ref()
            .map(|bound| Arc::clone(&bound.service))
    }

    /// The registry entry the active handle was built from.
    pub fn entry(&self) -> Option<ServiceEntry> {
        self.active.load().as_ref().map(|bound| bound.entry.clone())
    }

    /// Check whether the binding is believed usable.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Flag the binding as stale and wake its scheduler.
    pub fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            tracing::warn!(service = %self.key, "binding marked unhealthy");
        }
        self.stale.notify_one();
    }

    /// Run `op` against the active handle.
    ///
    /// A discovery-relevant failure marks the binding unhealthy before it
    /// is returned. An unbound binding fails with `NotFound`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, RemotingError>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, RemotingError>>,
    {
        let Some(service) = self.current() else {
            self.mark_unhealthy();
            return Err(RegistryError::NotFound {
                key: self.key.clone(),
            }
            .into());
        };
        let result = op(service).await;
        if let Err(err) = &result {
            if err.is_discovery_relevant() {
                tracing::debug!(service = %self.key, error = %err, "call failed, endpoint looks gone");
                self.mark_unhealthy();
            }
        }
        result
    }

    /// Look the key up again and swap in a fresh handle.
    ///
    /// Returns `Ok(false)` when the service is not registered.
    pub(crate) async fn try_rebind(&self) -> Result<bool, RemotingError> {
        let entry = match self
            .registry
            .lookup(&self.key.service_type, self.key.qualifier.as_deref())
            .await
        {
            Ok(entry) => entry,
            Err(RegistryError::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let service = self.binder.bind(&entry)?;
        self.active.store(Some(Arc::new(Bound { entry, service })));
        self.healthy.store(true, Ordering::SeqCst);
        Ok(true)
    }
}

impl<S> Drop for StatefulBinding<S> {
    fn drop(&mut self) {
        // Lets an idle scheduler notice the binding is gone.
        self.stale.notify_one();
    }
}

impl<S> fmt::Debug for StatefulBinding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulBinding")
            .field("key", &self.key)
            .field("bound", &self.active.load().is_some())
            .field("healthy", &self.healthy.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Rebindable for StatefulBinding<S> {
    fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    fn is_healthy(&self) -> bool {
        StatefulBinding::is_healthy(self)
    }

    fn staleness_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.stale)
    }

    async fn rebind(&self) -> Result<bool, RemotingError> {
        self.try_rebind().await
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{ServiceProperties, SERVICE_TYPE_PROPERTY};

    use super::*;
    use crate::binding::BindError;
    use crate::error::Provenance;
    use crate::registry::InMemoryServiceRegistry;

    #[derive(Debug, PartialEq)]
    struct Endpoint(String);

    fn binder() -> Arc<dyn ServiceBinder<Endpoint>> {
        Arc::new(|entry: &ServiceEntry| -> Result<Arc<Endpoint>, BindError> {
            let uri = entry
                .properties
                .get(ServiceProperties::SERVICE_URI)
                .ok_or_else(|| BindError::Rejected {
                    key: entry.key.clone(),
                    message: "no uri".to_string(),
                })?;
            Ok(Arc::new(Endpoint(uri.to_string())))
        })
    }

    fn entry(uri: &str) -> ServiceEntry {
        ServiceEntry::new(
            ServiceKey::unqualified("LunchService"),
            ServiceProperties::new().with(ServiceProperties::SERVICE_URI, uri),
            60_000,
        )
    }

    #[tokio::test]
    async fn test_bind_registered_service() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        registry.register(entry("local://a"), 60_000).await;

        let binding = StatefulBinding::bind(
            ServiceKey::unqualified("LunchService"),
            registry,
            binder(),
        )
        .await
        .expect("bind");
        assert!(binding.is_healthy());
        assert_eq!(
            binding.current().as_deref(),
            Some(&Endpoint("local://a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_service_gives_unbound_binding() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        let binding = StatefulBinding::bind(
            ServiceKey::unqualified("LunchService"),
            registry,
            binder(),
        )
        .await
        .expect("bind");
        assert!(!binding.is_healthy());
        assert!(binding.current().is_none());

        let result = binding.call(|_endpoint| async { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(RemotingError::Registry(RegistryError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_discovery_failure_marks_unhealthy() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        registry.register(entry("local://a"), 60_000).await;
        let binding = StatefulBinding::bind(
            ServiceKey::unqualified("LunchService"),
            registry,
            binder(),
        )
        .await
        .expect("bind");

        let remote = binding
            .call(|_endpoint| async {
                Err::<(), _>(RemotingError::InvalidArguments {
                    message: "bad".to_string(),
                })
            })
            .await;
        assert!(remote.is_err());
        assert!(binding.is_healthy());

        let gone = binding
            .call(|_endpoint| async {
                Err::<(), _>(RemotingError::ServiceUnavailable {
                    message: "connection refused".to_string(),
                    provenance: Provenance::group("mySpace"),
                })
            })
            .await;
        assert!(gone.is_err());
        assert!(!binding.is_healthy());
        // The stale handle stays readable until a rebind replaces it.
        assert!(binding.current().is_some());
    }

    #[tokio::test]
    async fn test_rebind_swaps_endpoint() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        registry.register(entry("local://a"), 60_000).await;
        let binding = StatefulBinding::bind(
            ServiceKey::unqualified("LunchService"),
            Arc::clone(&registry) as Arc<dyn ServiceRegistry>,
            binder(),
        )
        .await
        .expect("bind");
        binding.mark_unhealthy();

        registry.register(entry("local://b"), 60_000).await;
        assert!(binding.try_rebind().await.expect("rebind"));
        assert!(binding.is_healthy());
        assert_eq!(
            binding.entry().and_then(|e| e
                .properties
                .get(ServiceProperties::SERVICE_URI)
                .map(str::to_string)),
            Some("local://b".to_string())
        );
    }

    #[tokio::test]
    async fn test_binder_rejection_is_an_error() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        let mut bag = entry("local://a").to_property_bag();
        bag.remove(ServiceProperties::SERVICE_URI);
        assert!(bag.contains_key(SERVICE_TYPE_PROPERTY));
        let stripped = ServiceEntry::from_property_bag(&bag).expect("entry");
        registry.register(stripped, 60_000).await;

        let result = StatefulBinding::bind(
            ServiceKey::unqualified("LunchService"),
            registry,
            binder(),
        )
        .await;
        assert!(matches!(
            result,
            Err(RemotingError::Bind(BindError::Rejected { .. }))
        ));
    }
}
