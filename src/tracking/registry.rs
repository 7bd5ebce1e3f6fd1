//! Object identities and their lifecycle within one session.

use std::collections::BTreeSet;

use crate::error::{Result, SegTrackError};
use crate::tracking::mask::ObjectId;
use crate::tracking::object_state::{ObjectOrigin, ObjectState};

/// Registry entry binding a stable id to an object's provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Label the object carries in every mask of the session
    pub id: ObjectId,
    /// Prompt path that created the object
    pub origin: ObjectOrigin,
    /// Frame index at which the object was registered
    pub created_at_frame: usize,
    /// Current lifecycle state
    pub state: ObjectState,
    /// Consecutive re-segmentation checks that failed to re-detect the object
    pub missed_checks: u32,
}

impl ObjectRecord {
    pub fn is_active(&self) -> bool {
        self.state == ObjectState::Active
    }
}

/// Session-scoped id allocator and record store.
///
/// Ids are issued monotonically from 1 and never reissued, not even after
/// `retire`. Allocation fails with `SegTrackError::Capacity` once
/// `max_obj_num` ids are live or every id in `[1, max_obj_num]` has been issued.
#[derive(Debug, Clone)]
pub struct ObjectRegistry {
    max_obj_num: u16,
    next_id: u32,
    retired: usize,
    records: Vec<ObjectRecord>,
}

impl ObjectRegistry {
    pub fn new(max_obj_num: u16) -> Self {
        Self {
            max_obj_num,
            next_id: 1,
            retired: 0,
            records: Vec::new(),
        }
    }

    pub fn max_obj_num(&self) -> u16 {
        self.max_obj_num
    }

    /// Id the next `allocate_id` call would return, without reserving it.
    pub fn peek_next_id(&self) -> Option<ObjectId> {
        if self.has_capacity() {
            Some(self.next_id as ObjectId)
        } else {
            None
        }
    }

    /// Number of issued ids that are not retired.
    pub fn live_count(&self) -> usize {
        (self.next_id as usize - 1) - self.retired
    }

    fn has_capacity(&self) -> bool {
        self.next_id <= self.max_obj_num as u32 && self.live_count() < self.max_obj_num as usize
    }

    /// Reserve the next unused id.
    pub fn allocate_id(&mut self) -> Result<ObjectId> {
        if !self.has_capacity() {
            return Err(SegTrackError::Capacity {
                max_obj_num: self.max_obj_num,
            });
        }
        let id = self.next_id as ObjectId;
        self.next_id += 1;
        Ok(id)
    }

    /// Allocate an id and store an active record for it.
    pub fn register(&mut self, origin: ObjectOrigin, frame_idx: usize) -> Result<ObjectRecord> {
        let id = self.allocate_id()?;
        let record = ObjectRecord {
            id,
            origin,
            created_at_frame: frame_idx,
            state: ObjectState::Active,
            missed_checks: 0,
        };
        self.records.push(record.clone());
        log::debug!("registered object {} ({:?}) at frame {}", id, origin, frame_idx);
        Ok(record)
    }

    /// Mark a record inactive. Its id stays reserved. Returns false for unknown
    /// or already retired ids.
    pub fn retire(&mut self, id: ObjectId) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.is_active() => {
                record.state = ObjectState::Retired;
                self.retired += 1;
                true
            }
            _ => false,
        }
    }

    /// Ids of all active records.
    pub fn active_ids(&self) -> BTreeSet<ObjectId> {
        self.records
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_active()).count()
    }

    /// Whether `id` was ever handed out by this registry.
    pub fn is_issued(&self, id: ObjectId) -> bool {
        id >= 1 && (id as u32) < self.next_id
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }

    /// Reset the miss counter of a re-detected object.
    pub fn mark_detected(&mut self, id: ObjectId) {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
            record.missed_checks = 0;
        }
    }

    /// Count a failed re-detection and return the new consecutive miss count.
    pub fn mark_missed(&mut self, id: ObjectId) -> u32 {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.missed_checks += 1;
                record.missed_checks
            }
            None => 0,
        }
    }
}
