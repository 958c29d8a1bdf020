//! Fault-injecting storage.
//!
//! Wraps another backend and fails a seeded, reproducible fraction of calls
//! with `StorageError::Io`. The key manager and the replicated store are run
//! over it to check that a failed write never leaves them believing the data
//! is durable.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use parley_proto::CellRecord;

use super::{Storage, StorageError};

/// Seed used by [`ChaoticStorage::new`].
const DEFAULT_SEED: u64 = 0x5EED_C4A0_5EED_0F00;

/// Storage that fails some calls before they reach the inner backend.
///
/// Clones share the fault sequence, the failure rate and the call counter.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    faults: Arc<Mutex<FaultSequence>>,
    calls: Arc<AtomicUsize>,
}

/// splitmix64 stream plus the rate it is compared against.
struct FaultSequence {
    state: u64,
    rate: f64,
}

impl FaultSequence {
    /// Next roll in `[0, 1)`.
    fn roll(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        // Top 53 bits fill an f64 mantissa exactly
        (z >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Fail `failure_rate` of all calls, with a fixed seed.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= failure_rate <= 1.0`.
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Fail `failure_rate` of all calls; the same seed fails the same calls.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= failure_rate <= 1.0`.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        check_rate(failure_rate);
        Self {
            inner,
            faults: Arc::new(Mutex::new(FaultSequence { state: seed, rate: failure_rate })),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change the failure rate for this handle and every clone.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= failure_rate <= 1.0`.
    pub fn set_failure_rate(&self, failure_rate: f64) {
        check_rate(failure_rate);
        if let Ok(mut faults) = self.faults.lock() {
            faults.rate = failure_rate;
        }
    }

    /// The wrapped backend, bypassing fault injection.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Calls made so far, failed or not.
    pub fn operation_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn maybe_fail(&self, operation: &str) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut faults =
            self.faults.lock().map_err(|_| StorageError::Io("fault sequence poisoned".to_string()))?;

        if faults.roll() < faults.rate {
            return Err(StorageError::Io(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

fn check_rate(failure_rate: f64) {
    assert!((0.0..=1.0).contains(&failure_rate), "failure rate {failure_rate} outside [0, 1]");
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn put(&self, path: &str, value: &[u8]) -> Result<(), StorageError> {
        self.maybe_fail("put")?;
        self.inner.put(path, value)
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.maybe_fail("get")?;
        self.inner.get(path)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.maybe_fail("delete")?;
        self.inner.delete(path)
    }

    fn store_cells(&self, scope: &str, cells: &[CellRecord]) -> Result<(), StorageError> {
        self.maybe_fail("store_cells")?;
        self.inner.store_cells(scope, cells)
    }

    fn load_cells(&self, scope: &str) -> Result<Vec<CellRecord>, StorageError> {
        self.maybe_fail("load_cells")?;
        self.inner.load_cells(scope)
    }
}
