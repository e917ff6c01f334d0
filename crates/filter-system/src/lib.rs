//! Integration shim between the interception layer and the filtering
//! engine.
//!
//! A [`FilteringSystem`] holds the attached filter storages and turns
//! "this operation was intercepted" into index lookup plus verdict
//! evaluation, merging the answers of every active storage. The
//! [`lifecycle`] module provides the process-wide instance the driver
//! glue calls into.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use filter_engine::{EventData, FilterError, FilterSetIndex, OperationKey, ParamsMask, Verdict};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SystemError {
    #[error("filtering system is already initialized")]
    AlreadyInitialized,
    #[error("filtering system is not initialized")]
    NotInitialized,
}

type StorageList = Vec<Arc<FilterSetIndex>>;

fn read_storages(lock: &RwLock<StorageList>) -> RwLockReadGuard<'_, StorageList> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_storages(lock: &RwLock<StorageList>) -> RwLockWriteGuard<'_, StorageList> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The set of filter storages consulted for every intercepted
/// operation.
pub struct FilteringSystem {
    storages: RwLock<StorageList>,
}

impl FilteringSystem {
    pub fn new() -> Self {
        FilteringSystem {
            storages: RwLock::new(Vec::new()),
        }
    }

    pub fn attach(&self, storage: Arc<FilterSetIndex>) {
        write_storages(&self.storages).push(storage);
    }

    /// Detaches a previously attached storage. Returns false when the
    /// storage was not attached.
    pub fn detach(&self, storage: &Arc<FilterSetIndex>) -> bool {
        let mut storages = write_storages(&self.storages);
        let before = storages.len();
        storages.retain(|attached| !Arc::ptr_eq(attached, storage));
        storages.len() != before
    }

    /// Evaluates an intercepted operation against every attached,
    /// active storage and merges the verdicts and wish masks via OR.
    ///
    /// Paused storages, keys without a filter set and sets caught
    /// mid-teardown all contribute nothing; evaluation errors from the
    /// event accessor propagate so the caller can apply its fail-safe
    /// policy instead of the engine guessing one.
    pub fn filter_event(
        &self,
        key: OperationKey,
        event: &dyn EventData,
    ) -> Result<(Verdict, ParamsMask), FilterError> {
        let storages = read_storages(&self.storages);

        let mut verdict = Verdict::NOT_FILTERED;
        let mut params_mask = ParamsMask::EMPTY;

        for storage in storages.iter() {
            if !storage.is_active() {
                continue;
            }
            let set = match storage.get(key) {
                Ok(set) => set,
                Err(FilterError::NotFound) | Err(FilterError::Unavailable) => continue,
                Err(error) => return Err(error),
            };
            let (set_verdict, set_mask) = set.get_verdict(event)?;
            verdict |= set_verdict;
            params_mask |= set_mask;
        }

        Ok((verdict, params_mask))
    }

    /// Tears down every attached storage, draining in-flight callers.
    pub fn shutdown(&self) {
        let storages = std::mem::take(&mut *write_storages(&self.storages));
        for storage in storages {
            storage.set_active(false);
            storage.delete_all();
        }
        log::debug!("filtering system shut down");
    }
}

impl Default for FilteringSystem {
    fn default() -> Self {
        FilteringSystem::new()
    }
}

/// Process-wide lifecycle of the filtering system.
///
/// [`initialize`](lifecycle::initialize) and
/// [`destroy`](lifecycle::destroy) must be called exactly once each, in
/// that order, bracketing all other use.
pub mod lifecycle {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref INSTANCE: RwLock<Option<Arc<FilteringSystem>>> = RwLock::new(None);
    }

    pub fn initialize() -> Result<(), SystemError> {
        let mut slot = INSTANCE
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Err(SystemError::AlreadyInitialized);
        }
        *slot = Some(Arc::new(FilteringSystem::new()));
        log::debug!("filtering system initialized");
        Ok(())
    }

    pub fn instance() -> Result<Arc<FilteringSystem>, SystemError> {
        INSTANCE
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .cloned()
            .ok_or(SystemError::NotInitialized)
    }

    /// Shuts the instance down and releases it. Callers must have
    /// stopped submitting events; in-flight evaluations are drained by
    /// the per-set teardown.
    pub fn destroy() -> Result<(), SystemError> {
        let system = INSTANCE
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(SystemError::NotInitialized)?;
        system.shutdown();
        Ok(())
    }
}
