//! The append-only version ledger.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::{CalverError, CalverResult};
use crate::event::{EventId, EventRecord, Snapshot, UserId, Version, VersionSummary};
use crate::store::EventStore;

/// Ledger of whole-event snapshots. Snapshots are stored whole, so
/// reconstructing any version is a single lookup; deltas are only derived
/// for display.
#[derive(Clone)]
pub struct VersionStore {
    store: Arc<dyn EventStore>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        VersionStore { store }
    }

    /// Create an event with version 1 authored by its owner.
    pub fn create(
        &self,
        owner: UserId,
        snapshot: Snapshot,
        note: Option<String>,
    ) -> CalverResult<(EventRecord, Version)> {
        let now = Utc::now();
        let record = EventRecord {
            id: EventId::new(),
            owner,
            current_version: 1,
            created_at: now,
        };
        let first = Version {
            event_id: record.id,
            number: 1,
            snapshot,
            author: owner,
            created_at: now,
            note,
        };
        self.store.create(&record, &first)?;
        debug!(event = %record.id, "created event at version 1");
        Ok((record, first))
    }

    /// Append a snapshot as version `expected + 1`.
    ///
    /// Fails with `ConcurrencyConflict` when another append already
    /// advanced the event past `expected`.
    pub fn append(
        &self,
        event: EventId,
        expected: u32,
        snapshot: Snapshot,
        author: UserId,
        note: Option<String>,
    ) -> CalverResult<Version> {
        let number = expected
            .checked_add(1)
            .ok_or_else(|| CalverError::Internal("version counter overflow".into()))?;
        let version = Version {
            event_id: event,
            number,
            snapshot,
            author,
            created_at: Utc::now(),
            note,
        };
        let stored = self.store.append(expected, &version)?;
        debug_assert_eq!(stored, number);
        Ok(version)
    }

    /// Fetch a version, `NotFound` when out of range.
    pub fn get(&self, event: EventId, number: u32) -> CalverResult<Version> {
        self.store
            .version(event, number)?
            .ok_or_else(|| CalverError::version_not_found(event, number))
    }

    /// The full snapshot valid at `number`.
    pub fn reconstruct(&self, event: EventId, number: u32) -> CalverResult<Snapshot> {
        self.get(event, number).map(|v| v.snapshot)
    }

    /// The latest version, i.e. the event's current state.
    pub fn current(&self, record: &EventRecord) -> CalverResult<Version> {
        self.get(record.id, record.current_version)
    }

    /// Version summaries in ascending order.
    pub fn list_versions(&self, event: EventId) -> CalverResult<Vec<VersionSummary>> {
        if self.store.event(event)?.is_none() {
            return Err(CalverError::event_not_found(event));
        }
        self.store.versions(event)
    }
}
