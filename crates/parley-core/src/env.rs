//! Clock and randomness, injected.
//!
//! The connection state machine, the ordering buffer and the replicated store
//! never read the system clock or the OS RNG themselves. They are handed an
//! [`Environment`], which the client fills with tokio time and getrandom and
//! tests fill with [`test_utils::MockEnv`].

use std::time::Duration;

/// Time and randomness for the client.
///
/// # Contract
///
/// - [`now`](Self::now) is monotonic.
/// - [`random_bytes`](Self::random_bytes) is fit for nonces outside of tests.
/// - Nothing here fails in normal operation; an unusable OS RNG may panic.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point on the monotonic clock.
    ///
    /// Production uses `tokio::time::Instant` so paused-time tests drive it;
    /// [`test_utils::MockEnv`] uses a manually advanced virtual instant.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Monotonic now. Never earlier than a previous call.
    fn now(&self) -> Self::Instant;

    /// Resolve after `duration`.
    ///
    /// Only the async drivers await this; the sans-IO cores receive
    /// timestamps instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes. Seeded implementations repeat their
    /// output for the same seed.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Used for message timestamps and replicated-store clock stamps. Unlike
    /// `now()`, this may jump; consumers must tolerate that.
    fn wall_clock_millis(&self) -> u64;

    /// Replica node ids and request ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Message ids, rendered as 32 hex digits.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

/// Deterministic environment for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    #![allow(clippy::expect_used)]

    use std::{
        ops::{Add, Sub},
        sync::{Arc, Mutex},
        time::Duration,
    };

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::Environment;

    /// Wall clock a fresh [`MockEnv`] starts at (2024-01-01T00:00:00Z).
    pub const DEFAULT_WALL_CLOCK_MILLIS: u64 = 1_704_067_200_000;

    /// Virtual instant: time elapsed since the environment was created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct MockInstant(Duration);

    impl MockInstant {
        /// Instant at virtual time zero.
        pub const ZERO: Self = Self(Duration::ZERO);

        /// Time elapsed since virtual time zero.
        pub fn elapsed_since_start(self) -> Duration {
            self.0
        }
    }

    impl Sub for MockInstant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            self.0.saturating_sub(rhs.0)
        }
    }

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self {
            Self(self.0 + rhs)
        }
    }

    struct MockState {
        elapsed: Duration,
        wall_millis: u64,
        rng: ChaCha8Rng,
    }

    /// Environment with a manual clock and seeded RNG.
    ///
    /// Clones share the same clock and RNG. `sleep` advances the clock and
    /// completes immediately.
    #[derive(Clone)]
    pub struct MockEnv {
        state: Arc<Mutex<MockState>>,
    }

    impl MockEnv {
        /// Create an environment seeded with `seed`.
        pub fn with_seed(seed: u64) -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    elapsed: Duration::ZERO,
                    wall_millis: DEFAULT_WALL_CLOCK_MILLIS,
                    rng: ChaCha8Rng::seed_from_u64(seed),
                })),
            }
        }

        /// Advance both clocks by `duration`.
        pub fn advance(&self, duration: Duration) {
            let mut state = self.state.lock().expect("MockEnv mutex poisoned");
            state.elapsed += duration;
            state.wall_millis += duration.as_millis() as u64;
        }

        /// Jump the wall clock without touching the monotonic clock.
        pub fn set_wall_clock_millis(&self, millis: u64) {
            self.state.lock().expect("MockEnv mutex poisoned").wall_millis = millis;
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::with_seed(0)
        }
    }

    impl Environment for MockEnv {
        type Instant = MockInstant;

        fn now(&self) -> MockInstant {
            MockInstant(self.state.lock().expect("MockEnv mutex poisoned").elapsed)
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.state.lock().expect("MockEnv mutex poisoned").rng.fill_bytes(buffer);
        }

        fn wall_clock_millis(&self) -> u64 {
            self.state.lock().expect("MockEnv mutex poisoned").wall_millis
        }
    }

}
