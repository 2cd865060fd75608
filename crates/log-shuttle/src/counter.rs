// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared event counter with an atomic read-and-reset cycle.
///
/// Any number of workers add to the counter without coordination; a reader
/// periodically swaps the running total back to zero and reports it. The
/// swap is a single atomic step, so every concurrent `add` lands in exactly
/// one reported window - never in two, never in none.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    #[must_use]
    pub fn new() -> Self {
        Counter {
            value: AtomicU64::new(0),
        }
    }

    /// Adds `n` to the running total and returns the new total. Never
    /// blocks, never fails.
    pub fn add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Returns the current total and resets it to zero in one atomic step.
    pub fn read_and_reset(&self) -> u64 {
        self.value.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_add_accumulates() {
        let counter = Counter::new();
        assert_eq!(counter.add(1), 1);
        assert_eq!(counter.add(41), 42);
        assert_eq!(counter.read_and_reset(), 42);
    }

    #[test]
    fn test_read_and_reset_zeroes() {
        let counter = Counter::new();
        counter.add(7);
        assert_eq!(counter.read_and_reset(), 7);
        assert_eq!(counter.read_and_reset(), 0);
    }

    #[test]
    fn test_concurrent_adds_never_lose_updates() {
        use std::thread;
        use std::time::Duration;

        let counter = Arc::new(Counter::new());

        let mut adders = Vec::new();
        for _ in 0..4 {
            let counter_add = Arc::clone(&counter);
            adders.push(thread::spawn(move || {
                for _ in 0..1000 {
                    counter_add.add(1);
                }
            }));
        }

        let counter_read = Arc::clone(&counter);
        let reader = thread::spawn(move || {
            let mut collected = 0;
            for _ in 0..10 {
                thread::sleep(Duration::from_millis(1));
                collected += counter_read.read_and_reset();
            }
            collected
        });

        for handle in adders {
            handle.join().unwrap();
        }
        let collected = reader.join().unwrap();
        let remainder = counter.read_and_reset();

        assert_eq!(collected + remainder, 4000);
    }

    proptest! {
        // Interleaved adds and resets always account for every update.
        #[test]
        fn prop_read_and_reset_accounts_for_every_add(
            ops in proptest::collection::vec(0u64..1000, 1..100),
        ) {
            let counter = Counter::new();
            let mut collected = 0u64;
            for (i, n) in ops.iter().enumerate() {
                counter.add(*n);
                if i % 3 == 0 {
                    collected += counter.read_and_reset();
                }
            }
            collected += counter.read_and_reset();
            prop_assert_eq!(collected, ops.iter().sum::<u64>());
        }
    }
}
