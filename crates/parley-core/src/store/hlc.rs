//! Hybrid logical clock.
//!
//! Stamps combine wall-clock milliseconds with a logical counter so that a
//! node's stamps strictly increase even if its wall clock stalls or steps
//! back, and so that observing a remote stamp pushes the local clock past it.

use parley_proto::Stamp;

/// Hybrid logical clock for one replica node.
#[derive(Debug, Clone)]
pub struct HybridClock {
    node: u64,
    last: Stamp,
}

impl HybridClock {
    /// Create a clock for `node`.
    pub fn new(node: u64) -> Self {
        Self { node, last: Stamp { millis: 0, counter: 0, node } }
    }

    /// Node id stamped on every local write.
    pub fn node(&self) -> u64 {
        self.node
    }

    /// Latest stamp issued or observed.
    pub fn last(&self) -> Stamp {
        self.last
    }

    /// Issue a stamp for a local write.
    ///
    /// # Invariants
    ///
    /// - Post: the result is strictly greater than every stamp previously
    ///   issued or observed by this clock
    pub fn tick(&mut self, wall_millis: u64) -> Stamp {
        let (millis, counter) = if wall_millis > self.last.millis {
            (wall_millis, 0)
        } else {
            bump(self.last.millis, self.last.counter)
        };

        self.last = Stamp { millis, counter, node: self.node };
        self.last
    }

    /// Fold a remote stamp into the clock.
    pub fn observe(&mut self, remote: Stamp, wall_millis: u64) {
        let millis = wall_millis.max(self.last.millis).max(remote.millis);

        let (millis, counter) = if millis == self.last.millis && millis == remote.millis {
            bump(millis, self.last.counter.max(remote.counter))
        } else if millis == self.last.millis {
            bump(millis, self.last.counter)
        } else if millis == remote.millis {
            bump(millis, remote.counter)
        } else {
            (millis, 0)
        };

        self.last = Stamp { millis, counter, node: self.node };
    }
}

/// Next `(millis, counter)` after the given one.
fn bump(millis: u64, counter: u32) -> (u64, u32) {
    match counter.checked_add(1) {
        Some(counter) => (millis, counter),
        None => (millis.saturating_add(1), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_follows_wall_clock() {
        let mut clock = HybridClock::new(7);
        let a = clock.tick(1000);
        let b = clock.tick(2000);
        assert_eq!(a, Stamp { millis: 1000, counter: 0, node: 7 });
        assert_eq!(b, Stamp { millis: 2000, counter: 0, node: 7 });
    }

    #[test]
    fn stalled_wall_clock_bumps_counter() {
        let mut clock = HybridClock::new(7);
        let a = clock.tick(1000);
        let b = clock.tick(1000);
        let c = clock.tick(900);
        assert!(a < b && b < c);
        assert_eq!(c.millis, 1000);
        assert_eq!(c.counter, 2);
    }

    #[test]
    fn observe_moves_past_remote() {
        let mut clock = HybridClock::new(1);
        clock.tick(1000);

        let remote = Stamp { millis: 5000, counter: 3, node: 2 };
        clock.observe(remote, 1200);
        let next = clock.tick(1300);
        assert!(next > remote);
    }

    #[test]
    fn observe_older_remote_keeps_monotonic() {
        let mut clock = HybridClock::new(1);
        let issued = clock.tick(5000);
        clock.observe(Stamp { millis: 10, counter: 0, node: 2 }, 4000);
        assert!(clock.tick(4000) > issued);
    }

    #[test]
    fn counter_overflow_carries_into_millis() {
        assert_eq!(bump(10, u32::MAX), (11, 0));
    }
}
