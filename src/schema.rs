//! Dataset-definition synchronizer.
//!
//! Diffs dataset snapshots across polling cycles into create/delete
//! events. A redefined dataset (same id, different creation time) is a
//! full replace: the metric/tag list may have changed, so consumers must
//! tear down and rebuild everything derived from it.

use std::collections::HashMap;

use crate::onefs::types::DatasetEntry;

/// The id of the built-in System dataset, assumed immutable and never
/// diffed.
pub const SYSTEM_DATASET_ID: u32 = 0;

/// A change to the set of defined datasets.
#[derive(Debug, Clone)]
pub enum SchemaEvent {
    Created(DatasetEntry),
    Deleted(u32),
}

/// Diff a fresh dataset snapshot against the previous one.
///
/// With no previous state, every non-system dataset is a create. A
/// changed creation time yields a delete followed by a create for that
/// id. Events are ordered by dataset id, deletes before creates within
/// an id.
pub fn diff(
    previous: Option<&HashMap<u32, DatasetEntry>>,
    current: &[DatasetEntry],
) -> Vec<SchemaEvent> {
    let mut events = Vec::new();

    let current_by_id: HashMap<u32, &DatasetEntry> = current
        .iter()
        .filter(|ds| ds.id != SYSTEM_DATASET_ID)
        .map(|ds| (ds.id, ds))
        .collect();

    let Some(previous) = previous else {
        let mut ids: Vec<u32> = current_by_id.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            events.push(SchemaEvent::Created(current_by_id[&id].clone()));
        }
        return events;
    };

    let mut ids: Vec<u32> = previous
        .keys()
        .chain(current_by_id.keys())
        .copied()
        .filter(|&id| id != SYSTEM_DATASET_ID)
        .collect();
    ids.sort_unstable();
    ids.dedup();

    for id in ids {
        match (previous.get(&id), current_by_id.get(&id)) {
            (None, Some(new)) => events.push(SchemaEvent::Created((*new).clone())),
            (Some(_), None) => events.push(SchemaEvent::Deleted(id)),
            (Some(old), Some(new)) => {
                if old.creation_time != new.creation_time {
                    events.push(SchemaEvent::Deleted(id));
                    events.push(SchemaEvent::Created((*new).clone()));
                }
            }
            (None, None) => unreachable!("id came from one of the two maps"),
        }
    }

    events
}
