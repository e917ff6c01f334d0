//! Ordered index of filter sets keyed by operation.
//!
//! One [`FilterSet`] exists per [`OperationKey`], created lazily. The
//! index hands out [`FilterSetHandle`]s that pair the set with a drained
//! reference, so teardown can wait for every in-flight caller without a
//! per-call exclusive lock.

use std::{
    collections::BTreeMap,
    ops::Deref,
    sync::{
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use crate::{error::FilterError, filter_set::FilterSet};

/// Which interception framework produced the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InterceptorKind {
    FileSystem,
    Process,
    Network,
}

/// Whether the operation was intercepted before or after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationPoint {
    Pre,
    Post,
}

/// Identity of the intercepted-operation kind a filter set governs.
/// Orders the index by plain field-tuple comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub interceptor: InterceptorKind,
    pub operation: u32,
    pub minor: u32,
    pub point: OperationPoint,
}

/// A live reference to a filter set.
///
/// Holding a handle keeps the set's teardown blocked; the reference is
/// released on drop, on every exit path.
pub struct FilterSetHandle {
    set: Arc<FilterSet>,
}

impl Deref for FilterSetHandle {
    type Target = FilterSet;

    fn deref(&self) -> &FilterSet {
        &self.set
    }
}

impl Drop for FilterSetHandle {
    fn drop(&mut self) {
        self.set.release_ref();
    }
}

type SetMap = BTreeMap<OperationKey, Arc<FilterSet>>;

fn read_sets(lock: &RwLock<SetMap>) -> RwLockReadGuard<'_, SetMap> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_sets(lock: &RwLock<SetMap>) -> RwLockWriteGuard<'_, SetMap> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide store of every filter set, plus the filter-id generator
/// and the advisory active flag.
pub struct FilterSetIndex {
    sets: RwLock<SetMap>,
    filter_ids: Arc<AtomicU64>,
    active: AtomicBool,
}

impl FilterSetIndex {
    /// Starts paused; callers enable evaluation explicitly.
    pub fn new() -> Self {
        FilterSetIndex {
            sets: RwLock::new(BTreeMap::new()),
            filter_ids: Arc::new(AtomicU64::new(0)),
            active: AtomicBool::new(false),
        }
    }

    /// Looks up the set for `key` without creating one.
    pub fn get(&self, key: OperationKey) -> Result<FilterSetHandle, FilterError> {
        let sets = read_sets(&self.sets);
        let set = sets.get(&key).ok_or(FilterError::NotFound)?;
        if !set.try_acquire() {
            return Err(FilterError::Unavailable);
        }
        Ok(FilterSetHandle {
            set: Arc::clone(set),
        })
    }

    /// Looks up the set for `key`, creating an empty one on a miss.
    ///
    /// An acquire failure on a set caught mid-teardown is reported as
    /// [`FilterError::Unavailable`] and is not retried here.
    pub fn get_or_create(&self, key: OperationKey) -> Result<FilterSetHandle, FilterError> {
        let mut sets = write_sets(&self.sets);
        let set = sets
            .entry(key)
            .or_insert_with(|| Arc::new(FilterSet::new(Arc::clone(&self.filter_ids))));
        if !set.try_acquire() {
            return Err(FilterError::Unavailable);
        }
        Ok(FilterSetHandle {
            set: Arc::clone(set),
        })
    }

    /// Destroys every filter set, waiting for each one's in-flight
    /// callers to drain.
    ///
    /// Sets are unlinked from the map one at a time and closed outside
    /// the map lock, so lookups on other keys proceed while a busy set
    /// drains.
    pub fn delete_all(&self) {
        loop {
            let entry = write_sets(&self.sets).pop_first();
            let Some((key, set)) = entry else { break };
            set.close();
            log::debug!("deleted filter set for {key:?}");
        }
    }

    /// Removes every filter registered by `owner_pid` across all sets.
    /// Returns the number of filters removed.
    pub fn cleanup_by_process(&self, owner_pid: u32) -> usize {
        let sets: Vec<Arc<FilterSet>> = read_sets(&self.sets).values().cloned().collect();

        let mut removed = 0;
        for set in sets {
            // Skip sets already being torn down.
            if !set.try_acquire() {
                continue;
            }
            removed += set.cleanup_by_process(owner_pid);
            set.release_ref();
        }
        removed
    }

    /// Next globally unique filter id. Strictly increasing, never
    /// reused while the index is alive.
    pub fn next_filter_id(&self) -> u64 {
        self.filter_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Advisory flag: the engine evaluates whenever invoked, callers
    /// decide whether to invoke it.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of filter sets currently registered.
    pub fn len(&self) -> usize {
        read_sets(&self.sets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FilterSetIndex {
    fn default() -> Self {
        FilterSetIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(operation: u32) -> OperationKey {
        OperationKey {
            interceptor: InterceptorKind::FileSystem,
            operation,
            minor: 0,
            point: OperationPoint::Pre,
        }
    }

    #[test]
    fn get_miss_is_not_found() {
        let index = FilterSetIndex::new();
        assert!(matches!(index.get(key(1)), Err(FilterError::NotFound)));
    }

    #[test]
    fn get_or_create_is_lazy_and_stable() {
        let index = FilterSetIndex::new();
        assert!(index.is_empty());

        let first = index.get_or_create(key(1)).unwrap();
        assert_eq!(index.len(), 1);
        drop(first);

        // Same key resolves to the same set, different key creates.
        let _again = index.get(key(1)).unwrap();
        let _other = index.get_or_create(key(2)).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn keys_order_by_field_tuple() {
        let lower = OperationKey {
            interceptor: InterceptorKind::FileSystem,
            operation: 1,
            minor: 9,
            point: OperationPoint::Post,
        };
        let higher = OperationKey {
            interceptor: InterceptorKind::FileSystem,
            operation: 2,
            minor: 0,
            point: OperationPoint::Pre,
        };
        assert!(lower < higher);
        assert!(
            OperationKey {
                interceptor: InterceptorKind::Process,
                ..lower
            } > higher
        );
    }

    #[test]
    fn filter_ids_are_process_wide() {
        let index = FilterSetIndex::new();
        let id = index.next_filter_id();
        assert_eq!(index.next_filter_id(), id + 1);
    }

    #[test]
    fn active_flag_is_advisory_state() {
        let index = FilterSetIndex::new();
        assert!(!index.is_active());
        index.set_active(true);
        assert!(index.is_active());
        index.set_active(false);
        assert!(!index.is_active());
    }

    #[test]
    fn delete_all_empties_the_index() {
        let index = FilterSetIndex::new();
        index.get_or_create(key(1)).unwrap();
        index.get_or_create(key(2)).unwrap();
        index.delete_all();
        assert!(index.is_empty());
        assert!(matches!(index.get(key(1)), Err(FilterError::NotFound)));
    }
}
