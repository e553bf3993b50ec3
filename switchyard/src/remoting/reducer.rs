//! Reduction of scatter/gather results.
//!
//! A broadcast hands its reducer one [`RemoteResult`] per partition that
//! answered, sorted by partition index. Failed partitions stay in the input
//! as `Err` entries so the reducer decides whether they matter.

use crate::error::RemotingError;

/// Outcome of one sub-call of a batch or broadcast.
#[derive(Debug)]
pub struct RemoteResult<T> {
    /// Partition index for broadcasts, submission index for routed batches.
    pub index: usize,
    /// Decoded value or the sub-call's failure.
    pub result: Result<T, RemotingError>,
}

impl<T> RemoteResult<T> {
    /// Create a result for sub-call `index`.
    pub fn new(index: usize, result: Result<T, RemotingError>) -> Self {
        Self { index, result }
    }

    /// The value, if the sub-call succeeded.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The failure, if the sub-call failed.
    pub fn error(&self) -> Option<&RemotingError> {
        self.result.as_ref().err()
    }

    /// Unwrap every value, failing with `PartialBroadcastFailure` naming
    /// the failed indexes if any sub-call failed.
    pub fn require_all(results: Vec<RemoteResult<T>>) -> Result<Vec<T>, RemotingError> {
        let total = results.len() as u32;
        let mut values = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for remote in results {
            match remote.result {
                Ok(value) => values.push(value),
                Err(_) => failed.push(remote.index as u32),
            }
        }
        if failed.is_empty() {
            Ok(values)
        } else {
            Err(RemotingError::PartialBroadcastFailure { failed, total })
        }
    }
}

/// Fold collapsing per-partition results into the call's result.
pub trait RemoteResultReducer<T, R>: Send + Sync {
    /// Reduce `results`, sorted by partition index.
    fn reduce(&self, results: Vec<RemoteResult<T>>) -> Result<R, RemotingError>;
}

impl<T, R, F> RemoteResultReducer<T, R> for F
where
    F: Fn(Vec<RemoteResult<T>>) -> Result<R, RemotingError> + Send + Sync,
{
    fn reduce(&self, results: Vec<RemoteResult<T>>) -> Result<R, RemotingError> {
        self(results)
    }
}

/// Returns the first non-null value in partition order.
///
/// Failed partitions are skipped. When every partition failed, the first
/// failure is returned instead of `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstNonNullReducer;

impl<T> RemoteResultReducer<Option<T>, Option<T>> for FirstNonNullReducer {
    fn reduce(&self, results: Vec<RemoteResult<Option<T>>>) -> Result<Option<T>, RemotingError> {
        let mut first_error = None;
        let mut any_ok = false;
        for remote in results {
            match remote.result {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => any_ok = true,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) if !any_ok => Err(err),
            _ => Ok(None),
        }
    }
}

/// Collects every value in partition order, failing on any failed partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectAllReducer;

impl<T> RemoteResultReducer<T, Vec<T>> for CollectAllReducer {
    fn reduce(&self, results: Vec<RemoteResult<T>>) -> Result<Vec<T>, RemotingError> {
        RemoteResult::require_all(results)
    }
}
