//! The [`Environment`] the client runs on outside of tests.
//!
//! Time comes from tokio's clock rather than `std::time::Instant`, so a
//! runtime started with paused time (`start_paused`) controls reconnect
//! backoff and rejoin delays. Message timestamps and store stamps read the
//! system wall clock. Randomness comes from the OS.

use std::time::Duration;

use parley_core::env::Environment;

/// Tokio clock, system wall clock and OS randomness.
///
/// XChaCha20-Poly1305 nonces, message ids and the replicated-store node id
/// are all drawn from [`Environment::random_bytes`].
///
/// # Panics
///
/// `random_bytes` panics if the OS generator is unavailable.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// The environment is stateless; every value is equivalent.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS random source available");
    }

    fn wall_clock_millis(&self) -> u64 {
        // A clock before the epoch reads as 0; stamps stay monotonic via the HLC
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}
