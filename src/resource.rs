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

//! Keyed, reference-counted sharing of large immutable assets.
//!
//! Samples and instruments are expensive to create and shared across engine
//! channels. The resource manager runs the user-supplied create/destroy
//! callbacks on the non-real-time thread, hands out `Arc` references, and
//! destroys an asset exactly once when its last borrower hands it back.
//!
//! A consumer may demand more of a resource than it was originally created
//! with (a larger per-cycle frame budget needs a larger cache trailer); such
//! a borrow triggers an update: the resource is recreated and every existing
//! borrower is notified so it can rebind.
//!
//! This type is never accessed from the audio thread.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Creates and destroys resources on behalf of the manager.
pub trait ResourceLoader<K, R>: Send + Sync {
    type Error;

    /// Creates the resource for `key`, sized for `max_frames_per_cycle`.
    fn create(&self, key: &K, max_frames_per_cycle: usize) -> Result<R, Self::Error>;

    /// Called when the last borrower has handed the resource back, before it
    /// is dropped.
    fn destroy(&self, _key: &K, _resource: &Arc<R>) {}
}

/// A borrower of resources. Consumers are identified by pointer, so each
/// borrow must be matched by a hand-back with the same consumer.
pub trait ResourceConsumer<R>: Send + Sync {
    /// Largest number of frames per cycle this consumer will ever demand
    /// from the resource. Drives cache-trailer sizing.
    fn max_frames_per_cycle(&self) -> usize {
        0
    }

    /// Called when the manager replaced the resource out from under this
    /// consumer. The consumer must drop `old` and rebind to `new`.
    fn resource_updated(&self, _old: &Arc<R>, _new: &Arc<R>) {}
}

struct Entry<K, R> {
    resource: Arc<R>,
    /// Demand the resource was created with.
    max_frames_per_cycle: usize,
    /// One weak reference per outstanding borrow.
    borrowers: Vec<Weak<dyn ResourceConsumer<R>>>,
    custom: Option<Box<dyn Any + Send + Sync>>,
    key: K,
}

/// Keyed, reference-counted store of shared immutable assets.
pub struct ResourceManager<K, R, L> {
    loader: L,
    entries: Mutex<HashMap<K, Entry<K, R>>>,
}

impl<K, R, L> ResourceManager<K, R, L>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    L: ResourceLoader<K, R>,
{
    /// Creates a manager around the given loader.
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Borrows the resource for `key`, creating it on first use. If the
    /// consumer demands more than the cached resource was created with, the
    /// resource is recreated and all existing borrowers are notified.
    pub fn borrow(
        &self,
        key: &K,
        consumer: &Arc<dyn ResourceConsumer<R>>,
    ) -> Result<Arc<R>, L::Error> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            let demand = consumer.max_frames_per_cycle();
            if demand > entry.max_frames_per_cycle {
                info!(
                    ?key,
                    old_demand = entry.max_frames_per_cycle,
                    new_demand = demand,
                    "Consumer demand grew, recreating resource"
                );
                let new = Arc::new(self.loader.create(key, demand)?);
                let old = std::mem::replace(&mut entry.resource, new.clone());
                entry.max_frames_per_cycle = demand;
                for borrower in entry.borrowers.iter().filter_map(Weak::upgrade) {
                    borrower.resource_updated(&old, &new);
                }
            }
            entry.borrowers.push(Arc::downgrade(consumer));
            debug!(?key, borrows = entry.borrowers.len(), "Resource borrowed");
            return Ok(entry.resource.clone());
        }

        let demand = consumer.max_frames_per_cycle();
        let resource = Arc::new(self.loader.create(key, demand)?);
        entries.insert(
            key.clone(),
            Entry {
                resource: resource.clone(),
                max_frames_per_cycle: demand,
                borrowers: vec![Arc::downgrade(consumer)],
                custom: None,
                key: key.clone(),
            },
        );
        info!(?key, "Resource created");
        Ok(resource)
    }

    /// Hands back one borrow of `key` by `consumer`. When the last borrow is
    /// returned, the loader's destroy callback runs and the entry (including
    /// its custom data) is dropped.
    pub fn hand_back(&self, key: &K, consumer: &Arc<dyn ResourceConsumer<R>>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        let target = Arc::as_ptr(consumer) as *const ();
        if let Some(position) = entry.borrowers.iter().position(|w| {
            w.upgrade()
                .map(|arc| Arc::as_ptr(&arc) as *const () == target)
                .unwrap_or(false)
        }) {
            entry.borrowers.swap_remove(position);
        }
        // Dead weak references no longer count as borrows either.
        entry.borrowers.retain(|w| w.strong_count() > 0);

        if entry.borrowers.is_empty() {
            let entry = entries.remove(key).expect("entry present");
            info!(key = ?entry.key, "Destroying resource after last hand-back");
            self.loader.destroy(key, &entry.resource);
        }
    }

    /// Number of outstanding borrows of `key`.
    pub fn borrow_count(&self, key: &K) -> usize {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.borrowers.len())
            .unwrap_or(0)
    }

    /// Attaches typed custom data to the resource for `key`. Passing `None`
    /// clears it. Returns false if the key has no live entry.
    pub fn set_custom_data<T: Any + Send + Sync>(&self, key: &K, data: Option<T>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.custom = data.map(|d| Box::new(d) as Box<dyn Any + Send + Sync>);
                true
            }
            None => false,
        }
    }

    /// Reads a copy of the typed custom data attached to `key`.
    pub fn custom_data<T: Any + Send + Sync + Clone>(&self, key: &K) -> Option<T> {
        self.entries
            .lock()
            .get(key)
            .and_then(|e| e.custom.as_ref())
            .and_then(|d| d.downcast_ref::<T>())
            .cloned()
    }

    /// Keys with live entries.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl CountingLoader {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }
        }
    }

    impl ResourceLoader<String, usize> for CountingLoader {
        type Error = std::convert::Infallible;

        fn create(&self, _key: &String, max_frames_per_cycle: usize) -> Result<usize, Self::Error> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(max_frames_per_cycle)
        }

        fn destroy(&self, _key: &String, _resource: &Arc<usize>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestConsumer {
        demand: usize,
        updates: AtomicUsize,
    }

    impl TestConsumer {
        fn arc(demand: usize) -> Arc<Self> {
            Arc::new(Self {
                demand,
                updates: AtomicUsize::new(0),
            })
        }
    }

    impl ResourceConsumer<usize> for TestConsumer {
        fn max_frames_per_cycle(&self) -> usize {
            self.demand
        }

        fn resource_updated(&self, _old: &Arc<usize>, _new: &Arc<usize>) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_destroy_called_once_after_last_hand_back() {
        let manager = ResourceManager::new(CountingLoader::new());
        let key = "sample".to_string();
        let first = TestConsumer::arc(128);
        let second = TestConsumer::arc(128);
        let first_dyn: Arc<dyn ResourceConsumer<usize>> = first.clone();
        let second_dyn: Arc<dyn ResourceConsumer<usize>> = second.clone();

        let a = manager.borrow(&key, &first_dyn).unwrap();
        let b = manager.borrow(&key, &second_dyn).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.loader.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.borrow_count(&key), 2);

        manager.hand_back(&key, &first_dyn);
        assert_eq!(manager.loader.destroyed.load(Ordering::SeqCst), 0);

        manager.hand_back(&key, &second_dyn);
        assert_eq!(manager.loader.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.borrow_count(&key), 0);

        // Handing back a dead key is a no-op.
        manager.hand_back(&key, &second_dyn);
        assert_eq!(manager.loader.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_larger_demand_triggers_update() {
        let manager = ResourceManager::new(CountingLoader::new());
        let key = "sample".to_string();
        let small = TestConsumer::arc(128);
        let large = TestConsumer::arc(1024);
        let small_dyn: Arc<dyn ResourceConsumer<usize>> = small.clone();
        let large_dyn: Arc<dyn ResourceConsumer<usize>> = large.clone();

        let a = manager.borrow(&key, &small_dyn).unwrap();
        assert_eq!(*a, 128);

        let b = manager.borrow(&key, &large_dyn).unwrap();
        assert_eq!(*b, 1024);
        assert_eq!(manager.loader.created.load(Ordering::SeqCst), 2);
        assert_eq!(small.updates.load(Ordering::SeqCst), 1);

        // A later borrow with a smaller demand reuses the bigger resource.
        let again = TestConsumer::arc(64);
        let again_dyn: Arc<dyn ResourceConsumer<usize>> = again.clone();
        let c = manager.borrow(&key, &again_dyn).unwrap();
        assert_eq!(*c, 1024);
        assert_eq!(manager.loader.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_custom_data_round_trip() {
        let manager = ResourceManager::new(CountingLoader::new());
        let key = "sample".to_string();
        let consumer = TestConsumer::arc(128);
        let consumer_dyn: Arc<dyn ResourceConsumer<usize>> = consumer.clone();

        assert!(!manager.set_custom_data(&key, Some(0.5f32)));
        manager.borrow(&key, &consumer_dyn).unwrap();

        assert!(manager.set_custom_data(&key, Some(0.5f32)));
        assert_eq!(manager.custom_data::<f32>(&key), Some(0.5));

        manager.set_custom_data::<f32>(&key, None);
        assert_eq!(manager.custom_data::<f32>(&key), None);
    }
}
