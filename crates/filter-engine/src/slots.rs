//! Growable table of filter records addressed by stable slot positions,
//! plus the active-slot and group-presence bitmaps.

use crate::{
    bitmap::{Bitmap, MAP_CAPACITY},
    error::FilterError,
    event::{ParamsMask, Verdict},
};

/// One registered filter.
#[derive(Debug, Clone)]
pub struct FilterRecord {
    pub filter_id: u64,
    pub group_id: u8,
    pub verdict: Verdict,
    pub wish_mask: ParamsMask,
    pub request_timeout_ms: u32,
    pub owner_pid: u32,
    pub(crate) occupied: bool,
}

impl FilterRecord {
    fn free() -> Self {
        FilterRecord {
            filter_id: 0,
            group_id: 0,
            verdict: Verdict::NOT_FILTERED,
            wish_mask: ParamsMask::EMPTY,
            request_timeout_ms: 0,
            owner_pid: 0,
            occupied: false,
        }
    }
}

/// Slot storage for one filter set.
///
/// Slots are never removed once grown; releasing a filter leaves its
/// slot free for reuse by a later registration. Filter ids are assigned
/// elsewhere and never reused even when the position is.
pub(crate) struct SlotTable {
    records: Vec<FilterRecord>,
    active: Bitmap,
    group_presence: Bitmap,
    group_count: usize,
    filter_count: usize,
}

impl SlotTable {
    pub(crate) fn new() -> Self {
        SlotTable {
            records: Vec::new(),
            active: Bitmap::new(),
            group_presence: Bitmap::new(),
            group_count: 0,
            filter_count: 0,
        }
    }

    /// Total slot count, free ones included.
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn filter_count(&self) -> usize {
        self.filter_count
    }

    pub(crate) fn group_count(&self) -> usize {
        self.group_count
    }

    pub(crate) fn is_occupied(&self, position: usize) -> bool {
        debug_assert_eq!(self.active.test(position), self.records[position].occupied);
        self.active.test(position)
    }

    pub(crate) fn record(&self, position: usize) -> &FilterRecord {
        &self.records[position]
    }

    /// Lowest free position, growing the table by one when every slot
    /// is taken. The returned slot stays free until [`occupy`] is
    /// called, so a failed registration needs no slot rollback.
    ///
    /// [`occupy`]: SlotTable::occupy
    pub(crate) fn allocate(&mut self) -> Result<usize, FilterError> {
        for position in 0..self.records.len() {
            if !self.records[position].occupied {
                return Ok(position);
            }
        }

        if self.records.len() == MAP_CAPACITY {
            return Err(FilterError::ResourceExhausted(
                "filter set reached its slot capacity",
            ));
        }

        self.records.push(FilterRecord::free());
        Ok(self.records.len() - 1)
    }

    pub(crate) fn occupy(&mut self, position: usize, record: FilterRecord) {
        debug_assert!(!self.records[position].occupied);
        debug_assert!(record.occupied);

        let group = record.group_id as usize;
        self.records[position] = record;
        self.active.set(position);
        if !self.group_presence.test(group) {
            self.group_presence.set(group);
            self.group_count += 1;
        }
        self.filter_count += 1;
    }

    /// Frees an occupied slot, fixing group presence when the last
    /// member of a group leaves. Returns false on an already free slot.
    pub(crate) fn release(&mut self, position: usize) -> bool {
        if !self.records[position].occupied {
            return false;
        }

        let group = self.records[position].group_id;
        self.records[position] = FilterRecord::free();
        self.active.clear(position);
        self.filter_count -= 1;

        let group_still_present = self
            .records
            .iter()
            .any(|record| record.occupied && record.group_id == group);
        if !group_still_present {
            self.group_presence.clear(group as usize);
            self.group_count -= 1;
        }
        true
    }
}
