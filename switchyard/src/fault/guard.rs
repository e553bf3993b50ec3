//! The fault guard: bulkhead, timeout and circuit breaker per command group.
//!
//! # Design
//!
//! Group state is created lazily the first time a group is seen and lives
//! for the lifetime of the guard. A call goes through three gates in order:
//!
//! 1. The bulkhead: a non-blocking `try_acquire` on the group's semaphore.
//! 2. The breaker: Closed admits, Open rejects, Half-Open admits one probe.
//! 3. The timeout: the work races the group's time bound.
//!
//! The work closure is only invoked once both gates admitted the call, so a
//! rejected call never reaches the transport. Admission is held by a
//! [`CallPermit`] whose `Drop` releases the bulkhead slot and re-arms an
//! abandoned probe, which keeps the state consistent when a caller drops
//! the call future midway.
//!
//! A fan-out (a broadcast or a routed batch) can also be admitted as one
//! call through [`FaultGuard::admit_fan_out`]: its bulkhead slots are taken
//! all at once or not at all, it passes the breaker once and reports one
//! outcome.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use switchyard_core::{SharedTimeProvider, TokioTimeProvider};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::breaker::{Admission, BreakerStatus, CircuitBreaker};
use super::{CommandGroup, FaultError, FaultGuardConfig, GuardedError, RejectReason};

/// Snapshot of a command group's isolation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    /// Current breaker state.
    pub status: BreakerStatus,
    /// Calls currently holding a bulkhead slot.
    pub in_flight: usize,
    /// Times the breaker opened from Closed.
    pub trips: u64,
    /// Calls that completed successfully.
    pub successes: u64,
    /// Calls that failed, including timeouts.
    pub failures: u64,
    /// Calls rejected before starting.
    pub rejections: u64,
    /// Calls that exceeded the time bound.
    pub timeouts: u64,
}

#[derive(Debug)]
struct GroupState {
    group: CommandGroup,
    config: FaultGuardConfig,
    breaker: CircuitBreaker,
    bulkhead: Arc<Semaphore>,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    timeouts: AtomicU64,
}

impl GroupState {
    fn reject(&self, reason: RejectReason) -> FaultError {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(group = %self.group, %reason, "call rejected");
        FaultError::Rejected {
            group: self.group.clone(),
            reason,
        }
    }
}

/// Admission to run one call. Dropping it without an outcome abandons the call.
struct CallPermit {
    state: Arc<GroupState>,
    admission: Admission,
    finished: bool,
    _slot: OwnedSemaphorePermit,
}

impl CallPermit {
    fn succeed(mut self, time: &SharedTimeProvider) {
        self.finished = true;
        self.state.successes.fetch_add(1, Ordering::Relaxed);
        self.state.breaker.on_success(self.admission, time.now());
    }

    fn fail(mut self, time: &SharedTimeProvider) {
        self.finished = true;
        self.state.failures.fetch_add(1, Ordering::Relaxed);
        self.state.breaker.on_failure(self.admission, time.now());
    }

    /// End the call without recording an outcome.
    fn release(mut self) {
        self.finished = true;
        self.state.breaker.on_abandoned(self.admission);
    }

    fn time_out(self, time: &SharedTimeProvider) -> FaultError {
        let state = Arc::clone(&self.state);
        let after = state.config.timeout;
        state.timeouts.fetch_add(1, Ordering::Relaxed);
        self.fail(time);
        tracing::warn!(group = %state.group, timeout = ?after, "call timed out");
        FaultError::Timeout {
            group: state.group.clone(),
            after,
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(group = %self.state.group, "call abandoned before completion");
            self.state.breaker.on_abandoned(self.admission);
        }
    }
}

/// Admission of a fan-out running as one guarded call.
///
/// Holds the fan-out's bulkhead slots and its breaker admission. The
/// holder reports exactly one outcome; dropping the permit without one
/// abandons the call, releasing the slots and re-arming an abandoned probe.
pub struct FanOutPermit {
    permit: CallPermit,
    time: SharedTimeProvider,
}

impl FanOutPermit {
    /// Command group the fan-out was admitted in.
    pub fn group(&self) -> &CommandGroup {
        &self.permit.state.group
    }

    /// Resolves once the fan-out has exceeded the group's time bound.
    pub fn deadline(&self) -> BoxFuture<'static, ()> {
        let time = Arc::clone(&self.time);
        let timeout = self.permit.state.config.timeout;
        Box::pin(async move { time.sleep(timeout).await })
    }

    /// Record a completed fan-out.
    pub fn succeed(self) {
        self.permit.succeed(&self.time);
    }

    /// Record a failed fan-out.
    pub fn fail(self) {
        self.permit.fail(&self.time);
    }

    /// End the fan-out without recording an outcome.
    pub fn release(self) {
        self.permit.release();
    }

    /// Record a fan-out that outlived its deadline; returns the timeout
    /// error to hand to the sub-calls still outstanding.
    pub fn time_out(self) -> FaultError {
        self.permit.time_out(&self.time)
    }
}

impl std::fmt::Debug for FanOutPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutPermit")
            .field("group", &self.permit.state.group)
            .field("admission", &self.permit.admission)
            .finish()
    }
}

#[derive(Debug)]
struct GuardInner {
    defaults: FaultGuardConfig,
    overrides: DashMap<String, FaultGuardConfig>,
    groups: DashMap<CommandGroup, Arc<GroupState>>,
    time: SharedTimeProvider,
}

/// Fault isolation for asynchronous calls, keyed by [`CommandGroup`].
///
/// Cloning is cheap and clones share all group state.
#[derive(Debug, Clone)]
pub struct FaultGuard {
    inner: Arc<GuardInner>,
}

impl Default for FaultGuard {
    fn default() -> Self {
        Self::new(FaultGuardConfig::default())
    }
}

impl FaultGuard {
    /// Create a guard applying `defaults` to every group.
    pub fn new(defaults: FaultGuardConfig) -> Self {
        Self::with_time(defaults, TokioTimeProvider::shared())
    }

    /// Create a guard reading time from `time`.
    pub fn with_time(defaults: FaultGuardConfig, time: SharedTimeProvider) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                defaults,
                overrides: DashMap::new(),
                groups: DashMap::new(),
                time,
            }),
        }
    }

    /// Use `config` for the group with key `group_key`.
    ///
    /// Applies to group state created after this call; configure groups
    /// before their first call.
    pub fn configure_group(&self, group_key: impl Into<String>, config: FaultGuardConfig) {
        self.inner.overrides.insert(group_key.into(), config);
    }

    /// Run `work` under the isolation policy of `group`.
    ///
    /// `work` is only invoked when the call is admitted. Rejections and
    /// timeouts are returned as `E` through `From<FaultError>`; an `Err`
    /// produced by the work is a breaker failure when
    /// [`GuardedError::counts_as_failure`] says so.
    pub async fn execute<T, E, F, Fut>(&self, group: &CommandGroup, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: GuardedError,
    {
        let state = self.group_state(group);
        let permit = self.admit(&state, 1)?;
        let timeout = state.config.timeout;
        let time = &self.inner.time;

        let outcome = {
            let work = work();
            tokio::pin!(work);
            let deadline = time.sleep(timeout);
            tokio::select! {
                biased;
                result = &mut work => Some(result),
                _ = deadline => None,
            }
        };

        match outcome {
            Some(Ok(value)) => {
                permit.succeed(time);
                Ok(value)
            }
            Some(Err(err)) => {
                if err.counts_as_failure() {
                    permit.fail(time);
                } else {
                    permit.release();
                }
                Err(err)
            }
            None => Err(permit.time_out(time).into()),
        }
    }

    /// Admit a fan-out holding `slots` bulkhead slots as one call.
    ///
    /// The slots are taken all at once or not at all. The caller runs the
    /// fan-out, races it against [`FanOutPermit::deadline`] and reports
    /// its outcome on the returned permit.
    pub fn admit_fan_out(
        &self,
        group: &CommandGroup,
        slots: u32,
    ) -> Result<FanOutPermit, FaultError> {
        let state = self.group_state(group);
        let permit = self.admit(&state, slots)?;
        Ok(FanOutPermit {
            permit,
            time: Arc::clone(&self.inner.time),
        })
    }

    /// Snapshot of `group`'s state, if it has seen any call.
    pub fn stats(&self, group: &CommandGroup) -> Option<GroupStats> {
        let state = self.inner.groups.get(group)?.value().clone();
        Some(GroupStats {
            status: state.breaker.status(),
            in_flight: state
                .config
                .max_concurrent_calls
                .min(Semaphore::MAX_PERMITS)
                .saturating_sub(state.bulkhead.available_permits()),
            trips: state.breaker.trips(),
            successes: state.successes.load(Ordering::Relaxed),
            failures: state.failures.load(Ordering::Relaxed),
            rejections: state.rejections.load(Ordering::Relaxed),
            timeouts: state.timeouts.load(Ordering::Relaxed),
        })
    }

    fn admit(&self, state: &Arc<GroupState>, slots: u32) -> Result<CallPermit, FaultError> {
        let slot = Arc::clone(&state.bulkhead)
            .try_acquire_many_owned(slots)
            .map_err(|_| state.reject(RejectReason::ConcurrencyLimit))?;
        let admission = state
            .breaker
            .try_admit(self.inner.time.now())
            .map_err(|reason| state.reject(reason))?;
        Ok(CallPermit {
            state: Arc::clone(state),
            admission,
            finished: false,
            _slot: slot,
        })
    }

    fn group_state(&self, group: &CommandGroup) -> Arc<GroupState> {
        if let Some(state) = self.inner.groups.get(group) {
            return Arc::clone(state.value());
        }
        let entry = self.inner.groups.entry(group.clone()).or_insert_with(|| {
            let config = self
                .inner
                .overrides
                .get(group.group_key())
                .map(|c| c.value().clone())
                .unwrap_or_else(|| self.inner.defaults.clone());
            tracing::debug!(group = %group, ?config, "creating command group");
            Arc::new(GroupState {
                group: group.clone(),
                breaker: CircuitBreaker::new(group.clone(), &config, self.inner.time.now()),
                bulkhead: Arc::new(Semaphore::new(
                    config.max_concurrent_calls.min(Semaphore::MAX_PERMITS),
                )),
                config,
                successes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                rejections: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            })
        });
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Fault(FaultError),
        Work,
        /// Decided before reaching the remote side.
        Local,
    }

    impl From<FaultError> for TestError {
        fn from(err: FaultError) -> Self {
            TestError::Fault(err)
        }
    }

    impl GuardedError for TestError {
        fn counts_as_failure(&self) -> bool {
            !matches!(self, TestError::Local)
        }
    }

    fn group() -> CommandGroup {
        CommandGroup::new("mySpace_LunchService", "mySpace")
    }

    fn guard(config: FaultGuardConfig) -> FaultGuard {
        FaultGuard::with_time(config, TokioTimeProvider::shared())
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let guard = guard(FaultGuardConfig::default());
        let result: Result<u32, TestError> = guard.execute(&group(), || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));

        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.status, BreakerStatus::Closed);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_work() {
        let guard = guard(
            FaultGuardConfig::default()
                .with_failure_threshold(2)
                .with_error_rate(0, 0),
        );
        for _ in 0..2 {
            let result: Result<(), TestError> =
                guard.execute(&group(), || async { Err(TestError::Work) }).await;
            assert_eq!(result, Err(TestError::Work));
        }

        let invoked = AtomicUsize::new(0);
        let result: Result<(), TestError> = guard
            .execute(&group(), || {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(
            result,
            Err(TestError::Fault(FaultError::Rejected {
                group: group(),
                reason: RejectReason::BreakerOpen,
            }))
        );
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.status, BreakerStatus::Open);
        assert_eq!(stats.trips, 1);
        assert_eq!(stats.rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let guard = guard(
            FaultGuardConfig::default()
                .with_timeout(Duration::from_millis(100))
                .with_failure_threshold(1)
                .with_error_rate(0, 0),
        );
        let result: Result<(), TestError> = guard
            .execute(&group(), || std::future::pending::<Result<(), TestError>>())
            .await;
        assert!(matches!(
            result,
            Err(TestError::Fault(FaultError::Timeout { after, .. })) if after == Duration::from_millis(100)
        ));

        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.status, BreakerStatus::Open);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_bulkhead_rejects_excess_calls() {
        let guard = guard(FaultGuardConfig::default().with_max_concurrent_calls(1));
        let (release, gate) = oneshot::channel::<()>();

        let held = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .execute(&group(), || async move {
                        gate.await.map_err(|_| TestError::Work)?;
                        Ok::<_, TestError>(())
                    })
                    .await
            })
        };
        while guard.stats(&group()).map(|s| s.in_flight) != Some(1) {
            tokio::task::yield_now().await;
        }

        let rejected: Result<(), TestError> = guard.execute(&group(), || async { Ok(()) }).await;
        assert_eq!(
            rejected,
            Err(TestError::Fault(FaultError::Rejected {
                group: group(),
                reason: RejectReason::ConcurrencyLimit,
            }))
        );

        release.send(()).expect("release");
        assert_eq!(held.await.expect("join"), Ok(()));
        assert_eq!(guard.stats(&group()).expect("stats").in_flight, 0);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_slot() {
        let guard = guard(FaultGuardConfig::default().with_max_concurrent_calls(1));
        let group = group();
        {
            let call = guard.execute(&group, || std::future::pending::<Result<(), TestError>>());
            tokio::pin!(call);
            assert!(futures::poll!(call.as_mut()).is_pending());
            assert_eq!(guard.stats(&group).expect("stats").in_flight, 1);
        }
        assert_eq!(guard.stats(&group).expect("stats").in_flight, 0);
    }

    #[tokio::test]
    async fn test_group_override() {
        let guard = guard(FaultGuardConfig::default());
        guard.configure_group(
            "mySpace_LunchService",
            FaultGuardConfig::default().with_max_concurrent_calls(0),
        );
        let result: Result<(), TestError> = guard.execute(&group(), || async { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(TestError::Fault(FaultError::Rejected {
                reason: RejectReason::ConcurrencyLimit,
                ..
            }))
        ));

        let other = CommandGroup::new("mySpace_MenuService", "mySpace");
        let result: Result<(), TestError> = guard.execute(&other, || async { Ok(()) }).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_errors_that_do_not_count_leave_the_breaker_closed() {
        let guard = guard(
            FaultGuardConfig::default()
                .with_failure_threshold(2)
                .with_error_rate(0, 0),
        );
        for _ in 0..5 {
            let result: Result<(), TestError> =
                guard.execute(&group(), || async { Err(TestError::Local) }).await;
            assert_eq!(result, Err(TestError::Local));
        }

        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.status, BreakerStatus::Closed);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_oversized_bulkhead_is_capped() {
        let guard = guard(FaultGuardConfig {
            max_concurrent_calls: usize::MAX,
            ..FaultGuardConfig::default()
        });
        let result: Result<u32, TestError> = guard.execute(&group(), || async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
        assert_eq!(guard.stats(&group()).expect("stats").in_flight, 0);
    }

    #[tokio::test]
    async fn test_fan_out_takes_its_slots_all_or_nothing() {
        let guard = guard(FaultGuardConfig::default().with_max_concurrent_calls(4));
        let wide = guard.admit_fan_out(&group(), 5);
        assert!(matches!(
            wide,
            Err(FaultError::Rejected {
                reason: RejectReason::ConcurrencyLimit,
                ..
            })
        ));
        assert_eq!(guard.stats(&group()).expect("stats").in_flight, 0);

        let permit = guard.admit_fan_out(&group(), 3).expect("admitted");
        assert_eq!(guard.stats(&group()).expect("stats").in_flight, 3);
        assert!(guard.admit_fan_out(&group(), 2).is_err());

        permit.succeed();
        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_times_out_once() {
        let guard = guard(
            FaultGuardConfig::default()
                .with_timeout(Duration::from_millis(200))
                .with_failure_threshold(1)
                .with_error_rate(0, 0),
        );
        let permit = guard.admit_fan_out(&group(), 2).expect("admitted");
        permit.deadline().await;
        let err = permit.time_out();
        assert_eq!(
            err,
            FaultError::Timeout {
                group: group(),
                after: Duration::from_millis(200),
            }
        );

        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.status, BreakerStatus::Open);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_dropped_fan_out_releases_its_slots() {
        let guard = guard(FaultGuardConfig::default().with_max_concurrent_calls(3));
        let permit = guard.admit_fan_out(&group(), 3).expect("admitted");
        assert_eq!(guard.stats(&group()).expect("stats").in_flight, 3);
        drop(permit);

        let stats = guard.stats(&group()).expect("stats");
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.successes + stats.failures, 0);
    }
}
