//! A filter set: every registered filter for one operation key, the
//! deduplicated predicates they depend on, and the matching logic that
//! turns an intercepted operation into a verdict.

use std::sync::{
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    bitmap::Bitmap,
    error::FilterError,
    event::{EventData, ParamsMask, Verdict},
    params::{PredicateList, PredicateSpec},
    rundown::Rundown,
    slots::{FilterRecord, SlotTable},
};

/// Registration request for one filter.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    /// Priority/category tag. Only the lowest-position matching filter
    /// of each group contributes to the verdict. Must be non-zero.
    pub group_id: u8,
    /// Decision bits this filter contributes. Must be non-empty.
    pub verdict: Verdict,
    /// Process that registered the filter, for per-process cleanup.
    pub owner_pid: u32,
    /// Policy value stored for the caller layer; not enforced here.
    pub request_timeout_ms: u32,
    /// Parameters the caller should collect when this filter wins.
    /// Must be non-empty.
    pub wish_mask: ParamsMask,
    /// Parameter conditions, all of which must match.
    pub params: Vec<PredicateSpec>,
}

struct FilterSetInner {
    slots: SlotTable,
    predicates: PredicateList,
}

/// Filters registered for a single operation key.
///
/// A reader/writer lock covers the slots, bitmaps and predicate list:
/// shared for [`get_verdict`](FilterSet::get_verdict), exclusive for
/// registration and removal. Nothing blocks or suspends inside either
/// section. Lifetime is additionally guarded by a [`Rundown`] so the
/// index can tear a set down without racing in-flight callers.
pub struct FilterSet {
    rundown: Rundown,
    filter_ids: Arc<AtomicU64>,
    inner: RwLock<FilterSetInner>,
}

fn read_inner(lock: &RwLock<FilterSetInner>) -> RwLockReadGuard<'_, FilterSetInner> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_inner(lock: &RwLock<FilterSetInner>) -> RwLockWriteGuard<'_, FilterSetInner> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FilterSet {
    pub(crate) fn new(filter_ids: Arc<AtomicU64>) -> Self {
        FilterSet {
            rundown: Rundown::new(),
            filter_ids,
            inner: RwLock::new(FilterSetInner {
                slots: SlotTable::new(),
                predicates: PredicateList::new(),
            }),
        }
    }

    pub(crate) fn try_acquire(&self) -> bool {
        self.rundown.try_acquire()
    }

    pub(crate) fn release_ref(&self) {
        self.rundown.release();
    }

    /// Blocks new references and waits for outstanding ones to drain.
    pub(crate) fn close(&self) {
        self.rundown.close();
    }

    pub fn filter_count(&self) -> usize {
        read_inner(&self.inner).slots.filter_count()
    }

    pub fn is_empty(&self) -> bool {
        self.filter_count() == 0
    }

    /// Registers a filter and returns its globally unique id.
    ///
    /// The whole call runs under the exclusive lock. On failure the set
    /// is left exactly as it was: predicate attachments made for this
    /// call are rolled back and the chosen slot stays free.
    pub fn add_filter(&self, filter: FilterSpec) -> Result<u64, FilterError> {
        if filter.group_id == 0 {
            return Err(FilterError::InvalidArgument("group id must be non-zero"));
        }
        if filter.verdict.is_empty() {
            return Err(FilterError::InvalidArgument("verdict must be non-empty"));
        }
        if filter.wish_mask.is_empty() {
            return Err(FilterError::InvalidArgument("wish mask must be non-empty"));
        }

        let mut guard = write_inner(&self.inner);
        let inner = &mut *guard;

        let position = inner.slots.allocate()?;

        for spec in filter.params {
            if let Err(error) = inner.predicates.attach(spec, position) {
                // The slot was free before this call, so detaching the
                // position undoes every attachment made above.
                inner.predicates.detach_position(position);
                return Err(error);
            }
        }

        let filter_id = self.filter_ids.fetch_add(1, Ordering::Relaxed) + 1;
        inner.slots.occupy(
            position,
            FilterRecord {
                filter_id,
                group_id: filter.group_id,
                verdict: filter.verdict,
                wish_mask: filter.wish_mask,
                request_timeout_ms: filter.request_timeout_ms,
                owner_pid: filter.owner_pid,
                occupied: true,
            },
        );

        log::debug!(
            "registered filter {filter_id} (group {}) at slot {position}",
            filter.group_id
        );
        Ok(filter_id)
    }

    /// Evaluates every registered filter against an intercepted
    /// operation.
    ///
    /// Each predicate is checked once; filters depending on a failed
    /// predicate are excluded. Among the survivors one filter wins per
    /// group (lowest slot position) and the winners' verdicts and wish
    /// masks are OR-combined. "Nothing matched" is a normal
    /// [`Verdict::NOT_FILTERED`] result, while an event that cannot
    /// resolve a requested parameter is an error.
    pub fn get_verdict(
        &self,
        event: &dyn EventData,
    ) -> Result<(Verdict, ParamsMask), FilterError> {
        let inner = read_inner(&self.inner);
        let total = inner.slots.len();

        let mut excluded = Bitmap::new();
        let mut excluded_count = 0;
        for position in 0..total {
            if !inner.slots.is_occupied(position) {
                excluded.set(position);
                excluded_count += 1;
            }
        }
        if excluded_count == total {
            return Ok((Verdict::NOT_FILTERED, ParamsMask::EMPTY));
        }

        for predicate in inner.predicates.iter() {
            if predicate.evaluate(event)? {
                continue;
            }
            for &position in predicate.positions() {
                if excluded.test(position) {
                    continue;
                }
                excluded.set(position);
                excluded_count += 1;
                if excluded_count == total {
                    // No filter left standing.
                    return Ok((Verdict::NOT_FILTERED, ParamsMask::EMPTY));
                }
            }
        }

        let mut verdict = Verdict::NOT_FILTERED;
        let mut params_mask = ParamsMask::EMPTY;
        let mut groups_seen = Bitmap::new();
        let mut groups_left = inner.slots.group_count();
        let mut next = 0;

        while groups_left > 0 {
            let position = match excluded.find_first_clear(next) {
                Some(position) if position < total => position,
                _ => break,
            };
            next = position + 1;

            let record = inner.slots.record(position);
            if groups_seen.test(record.group_id as usize) {
                // A lower slot already won this group.
                continue;
            }
            groups_seen.set(record.group_id as usize);
            groups_left -= 1;

            verdict |= record.verdict;
            params_mask |= record.wish_mask;
        }

        Ok((verdict, params_mask))
    }

    /// Removes every filter registered by `owner_pid`, detaching its
    /// slot from all predicates and fixing group presence. Returns the
    /// number of filters removed.
    pub fn cleanup_by_process(&self, owner_pid: u32) -> usize {
        let mut guard = write_inner(&self.inner);
        let inner = &mut *guard;

        let mut removed = 0;
        for position in 0..inner.slots.len() {
            if !inner.slots.is_occupied(position)
                || inner.slots.record(position).owner_pid != owner_pid
            {
                continue;
            }
            inner.predicates.detach_position(position);
            inner.slots.release(position);
            removed += 1;
        }

        if removed > 0 {
            log::debug!("removed {removed} filters owned by pid {owner_pid}");
        }
        removed
    }
}
