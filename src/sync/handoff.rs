// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Two-thread configuration handover.
//!
//! Configuration data is updated by a single non-real-time thread and read by
//! a single real-time thread. Two instances of the data exist; the updater
//! mutates the instance not currently in use by the reader, switches the
//! active index, then waits for the reader to release its lock and replays
//! the same mutation on the other instance. After two update-and-switch
//! cycles both instances agree.
//!
//! The reader's lock/unlock pair is wait-free and never suspends. The
//! updater's switch suspends by polling with millisecond-scale sleeps; by
//! construction it completes within one audio cycle.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Shared<T> {
    configs: [UnsafeCell<T>; 2],
    /// Index of the instance the reader currently sees.
    active: AtomicUsize,
    /// Set while the reader holds its lock.
    locked: AtomicBool,
}

// Each instance is accessed by exactly one thread at a time: the reader only
// touches the active instance while holding its lock, and the updater only
// touches the inactive instance (waiting out the reader's lock after a
// switch).
unsafe impl<T: Send> Sync for Shared<T> {}

/// Creates a config handover seeded with two clones of `initial` and splits
/// it into its updater and reader halves.
pub fn config_handoff<T: Clone + Send>(initial: T) -> (ConfigUpdater<T>, ConfigReader<T>) {
    let shared = Arc::new(Shared {
        configs: [
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial),
        ],
        active: AtomicUsize::new(0),
        locked: AtomicBool::new(false),
    });
    (
        ConfigUpdater {
            shared: shared.clone(),
            update_index: 1,
        },
        ConfigReader { shared },
    )
}

/// Handle used by the real-time thread.
pub struct ConfigReader<T> {
    shared: Arc<Shared<T>>,
}

/// Handle used by the non-real-time updater thread.
pub struct ConfigUpdater<T> {
    shared: Arc<Shared<T>>,
    update_index: usize,
}

/// Read access to the active config instance. Dropping the guard releases
/// the reader lock.
pub struct ConfigGuard<'a, T> {
    shared: &'a Shared<T>,
    index: usize,
}

impl<T: Send> ConfigReader<T> {
    /// Locks and returns the active instance. Wait-free; never suspends.
    pub fn lock(&mut self) -> ConfigGuard<'_, T> {
        self.shared.locked.store(true, Ordering::SeqCst);
        let index = self.shared.active.load(Ordering::SeqCst);
        ConfigGuard {
            shared: &self.shared,
            index,
        }
    }
}

impl<T> Deref for ConfigGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The updater never mutates this instance while the lock flag is set.
        unsafe { &*self.shared.configs[self.index].get() }
    }
}

impl<T> Drop for ConfigGuard<'_, T> {
    fn drop(&mut self) {
        self.shared.locked.store(false, Ordering::SeqCst);
    }
}

impl<T: Send> ConfigUpdater<T> {
    /// Returns the instance not currently in use by the reader, for mutation.
    /// After mutating, call [`switch`](Self::switch) and replay the same
    /// mutation on the instance it returns.
    pub fn get_for_update(&mut self) -> &mut T {
        self.update_index = self.shared.active.load(Ordering::SeqCst) ^ 1;
        // The reader only touches the active instance; this is the other one.
        unsafe { &mut *self.shared.configs[self.update_index].get() }
    }

    /// Atomically flips the active index, waits for the reader to release
    /// its lock, then returns the now-inactive instance so the caller can
    /// replay the mutation on it.
    pub fn switch(&mut self) -> &mut T {
        self.shared
            .active
            .store(self.update_index, Ordering::SeqCst);
        while self.shared.locked.load(Ordering::SeqCst) {
            spin_sleep::sleep(Duration::from_millis(1));
        }
        let old = self.update_index ^ 1;
        unsafe { &mut *self.shared.configs[old].get() }
    }

    /// Applies `mutate` to both instances with a switch in between, so the
    /// change becomes visible to the reader exactly once and both instances
    /// end up in agreement.
    pub fn update_with(&mut self, mutate: impl Fn(&mut T)) {
        mutate(self.get_for_update());
        mutate(self.switch());
    }
}

/// Bundles construction for callers that want to name the pair.
pub struct ConfigHandoff;

impl ConfigHandoff {
    /// See [`config_handoff`].
    pub fn new<T: Clone + Send>(initial: T) -> (ConfigUpdater<T>, ConfigReader<T>) {
        config_handoff(initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_reader_sees_update_after_switch() {
        let (mut updater, mut reader) = config_handoff(0u64);

        assert_eq!(*reader.lock(), 0);

        updater.update_with(|v| *v = 7);
        assert_eq!(*reader.lock(), 7);
    }

    #[test]
    fn test_both_instances_agree_after_replay() {
        let (mut updater, _reader) = config_handoff(vec![1u8, 2, 3]);

        updater.update_with(|v| v.push(4));

        // After the replay, the instance handed back by a further switch must
        // be identical to the one the first call handed back.
        let first = updater.get_for_update().clone();
        let second = updater.switch().clone();
        assert_eq!(first, second);
        assert_eq!(first, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_switch_waits_for_reader_unlock() {
        let (mut updater, mut reader) = config_handoff(0u64);

        let unlocked = Arc::new(AtomicBool::new(false));
        let unlocked_for_reader = unlocked.clone();

        let reader_thread = thread::spawn(move || {
            let guard = reader.lock();
            assert_eq!(*guard, 0);
            thread::sleep(Duration::from_millis(20));
            unlocked_for_reader.store(true, Ordering::SeqCst);
            drop(guard);
            reader
        });

        // Give the reader time to take its lock, then switch; the switch must
        // not return before the reader unlocked.
        thread::sleep(Duration::from_millis(5));
        updater.update_with(|v| *v = 1);
        assert!(unlocked.load(Ordering::SeqCst));

        let mut reader = reader_thread.join().unwrap();
        assert_eq!(*reader.lock(), 1);
    }

    #[test]
    fn test_no_torn_reads_under_concurrent_switches() {
        // The config is a pair that must always hold equal halves; a torn
        // read would observe a mix of old and new.
        let (mut updater, mut reader) = config_handoff((0u64, 0u64));

        let writer = thread::spawn(move || {
            for i in 1..200u64 {
                updater.update_with(|pair| *pair = (i, i));
            }
        });

        for _ in 0..10_000 {
            let pair = reader.lock();
            assert_eq!(pair.0, pair.1);
        }
        writer.join().unwrap();
    }
}
