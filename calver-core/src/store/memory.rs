//! In-process event store.
//!
//! Each event lives behind its own lock, so writers to different events
//! never contend; the outer map lock is only held long enough to look an
//! entry up.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{CalverError, CalverResult};
use crate::event::{EventId, EventRecord, UserId, Version, VersionSummary};
use crate::permission::{Grant, GrantRole};
use crate::store::EventStore;

struct EventEntry {
    record: EventRecord,
    versions: Vec<Version>,
    grants: HashMap<UserId, GrantRole>,
    deleted: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<EventId, Arc<RwLock<EventEntry>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: EventId) -> CalverResult<Option<Arc<RwLock<EventEntry>>>> {
        let events = self.events.read().map_err(|_| CalverError::poisoned())?;
        Ok(events.get(&id).cloned())
    }

    fn with_entry<T>(
        &self,
        id: EventId,
        f: impl FnOnce(&EventEntry) -> T,
    ) -> CalverResult<Option<T>> {
        let Some(entry) = self.entry(id)? else {
            return Ok(None);
        };
        let entry = entry.read().map_err(|_| CalverError::poisoned())?;
        if entry.deleted {
            return Ok(None);
        }
        Ok(Some(f(&entry)))
    }

    fn with_entry_mut<T>(
        &self,
        id: EventId,
        f: impl FnOnce(&mut EventEntry) -> CalverResult<T>,
    ) -> CalverResult<T> {
        let entry = self
            .entry(id)?
            .ok_or_else(|| CalverError::event_not_found(id))?;
        let mut entry = entry.write().map_err(|_| CalverError::poisoned())?;
        if entry.deleted {
            return Err(CalverError::event_not_found(id));
        }
        f(&mut entry)
    }
}

impl EventStore for MemoryStore {
    fn create(&self, record: &EventRecord, first: &Version) -> CalverResult<()> {
        let mut events = self.events.write().map_err(|_| CalverError::poisoned())?;
        if events.contains_key(&record.id) {
            return Err(CalverError::Internal(format!(
                "event {} already exists",
                record.id
            )));
        }
        let entry = EventEntry {
            record: record.clone(),
            versions: vec![first.clone()],
            grants: HashMap::new(),
            deleted: false,
        };
        events.insert(record.id, Arc::new(RwLock::new(entry)));
        Ok(())
    }

    fn event(&self, id: EventId) -> CalverResult<Option<EventRecord>> {
        self.with_entry(id, |entry| entry.record.clone())
    }

    fn append(&self, expected: u32, version: &Version) -> CalverResult<u32> {
        self.with_entry_mut(version.event_id, |entry| {
            let actual = entry.record.current_version;
            if actual != expected {
                return Err(CalverError::ConcurrencyConflict { expected, actual });
            }
            if version.number != expected + 1 {
                return Err(CalverError::Internal(format!(
                    "version {} does not follow {}",
                    version.number, expected
                )));
            }
            entry.versions.push(version.clone());
            entry.record.current_version = version.number;
            Ok(version.number)
        })
    }

    fn version(&self, id: EventId, number: u32) -> CalverResult<Option<Version>> {
        let found = self.with_entry(id, |entry| {
            number
                .checked_sub(1)
                .and_then(|idx| entry.versions.get(idx as usize))
                .cloned()
        })?;
        Ok(found.flatten())
    }

    fn versions(&self, id: EventId) -> CalverResult<Vec<VersionSummary>> {
        let summaries: Option<Vec<VersionSummary>> =
            self.with_entry(id, |entry| entry.versions.iter().map(Version::summary).collect())?;
        Ok(summaries.unwrap_or_default())
    }

    fn delete(&self, id: EventId) -> CalverResult<bool> {
        let mut events = self.events.write().map_err(|_| CalverError::poisoned())?;
        let Some(entry) = events.remove(&id) else {
            return Ok(false);
        };
        // In-flight appends may still hold the entry.
        entry.write().map_err(|_| CalverError::poisoned())?.deleted = true;
        Ok(true)
    }

    fn grant(&self, event: EventId, user: UserId) -> CalverResult<Option<GrantRole>> {
        let role = self.with_entry(event, |entry| entry.grants.get(&user).copied())?;
        Ok(role.flatten())
    }

    fn grants(&self, event: EventId) -> CalverResult<Vec<Grant>> {
        let grants = self.with_entry(event, |entry| {
            let mut grants: Vec<Grant> = entry
                .grants
                .iter()
                .map(|(user, role)| Grant {
                    event_id: event,
                    user_id: *user,
                    role: *role,
                })
                .collect();
            grants.sort_by_key(|g| g.user_id);
            grants
        })?;
        Ok(grants.unwrap_or_default())
    }

    fn put_grant(&self, grant: &Grant) -> CalverResult<Option<GrantRole>> {
        self.with_entry_mut(grant.event_id, |entry| {
            Ok(entry.grants.insert(grant.user_id, grant.role))
        })
    }

    fn remove_grant(&self, event: EventId, user: UserId) -> CalverResult<bool> {
        self.with_entry_mut(event, |entry| Ok(entry.grants.remove(&user).is_some()))
    }

    fn visible_events(&self, user: UserId) -> CalverResult<Vec<EventRecord>> {
        let entries: Vec<_> = {
            let events = self.events.read().map_err(|_| CalverError::poisoned())?;
            events.values().cloned().collect()
        };

        let mut visible = Vec::new();
        for entry in entries {
            let entry = entry.read().map_err(|_| CalverError::poisoned())?;
            if !entry.deleted
                && (entry.record.owner == user || entry.grants.contains_key(&user))
            {
                visible.push(entry.record.clone());
            }
        }
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Snapshot;
    use chrono::Utc;

    fn seeded() -> (MemoryStore, EventRecord) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let record = EventRecord {
            id: EventId::new(),
            owner: UserId::new(),
            current_version: 1,
            created_at: now,
        };
        let first = Version {
            event_id: record.id,
            number: 1,
            snapshot: Snapshot::new("Launch", now, now),
            author: record.owner,
            created_at: now,
            note: None,
        };
        store.create(&record, &first).unwrap();
        (store, record)
    }

    #[test]
    fn test_grants_are_unique_per_user() {
        let (store, record) = seeded();
        let user = UserId::new();
        let grant = |role| Grant {
            event_id: record.id,
            user_id: user,
            role,
        };

        assert_eq!(store.put_grant(&grant(GrantRole::Viewer)).unwrap(), None);
        assert_eq!(
            store.put_grant(&grant(GrantRole::Editor)).unwrap(),
            Some(GrantRole::Viewer)
        );
        assert_eq!(store.grants(record.id).unwrap().len(), 1);
        assert!(store.remove_grant(record.id, user).unwrap());
        assert!(!store.remove_grant(record.id, user).unwrap());
    }

    #[test]
    fn test_visible_events_include_owned_and_granted() {
        let (store, record) = seeded();
        let guest = UserId::new();
        assert!(store.visible_events(guest).unwrap().is_empty());
        assert_eq!(store.visible_events(record.owner).unwrap().len(), 1);

        store
            .put_grant(&Grant {
                event_id: record.id,
                user_id: guest,
                role: GrantRole::Viewer,
            })
            .unwrap();
        assert_eq!(store.visible_events(guest).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_removes_history() {
        let (store, record) = seeded();
        assert!(store.delete(record.id).unwrap());
        assert!(store.event(record.id).unwrap().is_none());
        assert!(store.version(record.id, 1).unwrap().is_none());
        assert!(!store.delete(record.id).unwrap());
    }
}
