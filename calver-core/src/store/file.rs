//! Directory-backed event store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <event-id>/event.json          owner and creation time
//! <event-id>/grants.json         collaborator grants
//! <event-id>/versions/00000001.json
//! <event-id>/versions/00000002.json
//! ```
//!
//! A version file is first written to a temp file and then hard-linked to
//! its final name. Linking fails if the name is taken, which makes the
//! append a compare-and-set across processes: of two writers racing for the
//! same number exactly one link succeeds, and a reader never sees a partly
//! written version. Grant updates are read-modify-write on `grants.json`
//! and hold an exclusive lock on `grants.lock` while they run.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CalverError, CalverResult};
use crate::event::{EventId, EventRecord, UserId, Version, VersionSummary};
use crate::permission::{Grant, GrantRole};
use crate::store::EventStore;

const EVENT_FILE: &str = "event.json";
const GRANTS_FILE: &str = "grants.json";
const GRANTS_LOCK_FILE: &str = "grants.lock";
const VERSIONS_DIR: &str = "versions";

#[derive(Serialize, Deserialize)]
struct StoredEvent {
    id: EventId,
    owner: UserId,
    created_at: DateTime<Utc>,
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> CalverResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn event_dir(&self, id: EventId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn version_path(event_dir: &Path, number: u32) -> PathBuf {
        event_dir
            .join(VERSIONS_DIR)
            .join(format!("{:08}.json", number))
    }

    /// Highest version number present on disk.
    fn current_version(event_dir: &Path) -> CalverResult<u32> {
        let entries = fs::read_dir(event_dir.join(VERSIONS_DIR))?;
        let current = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    path.file_stem()?.to_str()?.parse::<u32>().ok()
                } else {
                    None
                }
            })
            .max()
            .unwrap_or(0);
        Ok(current)
    }

    fn read_record(event_dir: &Path) -> CalverResult<Option<EventRecord>> {
        let content = match fs::read_to_string(event_dir.join(EVENT_FILE)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredEvent = serde_json::from_str(&content)?;
        let current_version = match Self::current_version(event_dir) {
            Ok(n) => n,
            // Deleted between reading event.json and listing versions.
            Err(CalverError::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(EventRecord {
            id: stored.id,
            owner: stored.owner,
            current_version,
            created_at: stored.created_at,
        }))
    }

    fn read_grants(event_dir: &Path) -> CalverResult<BTreeMap<UserId, GrantRole>> {
        match fs::read_to_string(event_dir.join(GRANTS_FILE)) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_grants(event_dir: &Path, grants: &BTreeMap<UserId, GrantRole>) -> CalverResult<()> {
        let content = serde_json::to_vec_pretty(grants)?;
        write_atomic(&event_dir.join(GRANTS_FILE), &content)
    }

    fn stage(staging: &Path, record: &EventRecord, first: &Version) -> CalverResult<()> {
        fs::create_dir_all(staging.join(VERSIONS_DIR))?;
        let stored = StoredEvent {
            id: record.id,
            owner: record.owner,
            created_at: record.created_at,
        };
        fs::write(staging.join(EVENT_FILE), serde_json::to_vec_pretty(&stored)?)?;
        fs::write(
            Self::version_path(staging, first.number),
            serde_json::to_vec_pretty(first)?,
        )?;
        Ok(())
    }

    /// Hold an exclusive lock on the event's grants until the guard drops.
    /// The lock is a file lock, so it also excludes other processes.
    fn lock_grants(event_dir: &Path) -> CalverResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(event_dir.join(GRANTS_LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn require_event_dir(&self, id: EventId) -> CalverResult<PathBuf> {
        let dir = self.event_dir(id);
        if dir.join(EVENT_FILE).exists() {
            Ok(dir)
        } else {
            Err(CalverError::event_not_found(id))
        }
    }
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, content: &[u8]) -> CalverResult<()> {
    let temp = temp_sibling(path);
    fs::write(&temp, content)?;
    fs::rename(&temp, path)?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = format!(".tmp-{}", Uuid::new_v4());
    path.with_file_name(name)
}

impl EventStore for FileStore {
    fn create(&self, record: &EventRecord, first: &Version) -> CalverResult<()> {
        // Assemble the whole event in a staging directory, then move it into
        // place so the row and version 1 appear together.
        let staging = self.root.join(format!(".staging-{}", Uuid::new_v4()));
        let staged = Self::stage(&staging, record, first)
            .and_then(|()| Ok(fs::rename(&staging, self.event_dir(record.id))?));

        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                debug!(path = %staging.display(), error = %cleanup, "could not remove staging directory");
            }
            return Err(e);
        }
        debug!(event = %record.id, root = %self.root.display(), "stored new event");
        Ok(())
    }

    fn event(&self, id: EventId) -> CalverResult<Option<EventRecord>> {
        Self::read_record(&self.event_dir(id))
    }

    fn append(&self, expected: u32, version: &Version) -> CalverResult<u32> {
        let id = version.event_id;
        let dir = self.require_event_dir(id)?;

        let actual = Self::current_version(&dir)?;
        if actual != expected {
            return Err(CalverError::ConcurrencyConflict { expected, actual });
        }
        if version.number != expected + 1 {
            return Err(CalverError::Internal(format!(
                "version {} does not follow {}",
                version.number, expected
            )));
        }

        let target = Self::version_path(&dir, version.number);
        let temp = temp_sibling(&target);
        fs::write(&temp, serde_json::to_vec_pretty(version)?)?;
        let linked = fs::hard_link(&temp, &target);
        if let Err(e) = fs::remove_file(&temp) {
            debug!(path = %temp.display(), error = %e, "could not remove temp version file");
        }

        match linked {
            Ok(()) => Ok(version.number),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let actual = Self::current_version(&dir)?;
                Err(CalverError::ConcurrencyConflict { expected, actual })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CalverError::event_not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn version(&self, id: EventId, number: u32) -> CalverResult<Option<Version>> {
        match fs::read_to_string(Self::version_path(&self.event_dir(id), number)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn versions(&self, id: EventId) -> CalverResult<Vec<VersionSummary>> {
        let dir = self.event_dir(id);
        let Some(record) = Self::read_record(&dir)? else {
            return Ok(Vec::new());
        };
        (1..=record.current_version)
            .map(|n| {
                self.version(id, n)?
                    .map(|v| v.summary())
                    .ok_or_else(|| CalverError::version_not_found(id, n))
            })
            .collect()
    }

    fn delete(&self, id: EventId) -> CalverResult<bool> {
        match fs::remove_dir_all(self.event_dir(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn grant(&self, event: EventId, user: UserId) -> CalverResult<Option<GrantRole>> {
        Ok(Self::read_grants(&self.event_dir(event))?.get(&user).copied())
    }

    fn grants(&self, event: EventId) -> CalverResult<Vec<Grant>> {
        let grants = Self::read_grants(&self.event_dir(event))?
            .into_iter()
            .map(|(user_id, role)| Grant {
                event_id: event,
                user_id,
                role,
            })
            .collect();
        Ok(grants)
    }

    fn put_grant(&self, grant: &Grant) -> CalverResult<Option<GrantRole>> {
        let dir = self.require_event_dir(grant.event_id)?;
        let _lock = Self::lock_grants(&dir)?;
        let mut grants = Self::read_grants(&dir)?;
        let previous = grants.insert(grant.user_id, grant.role);
        Self::write_grants(&dir, &grants)?;
        Ok(previous)
    }

    fn remove_grant(&self, event: EventId, user: UserId) -> CalverResult<bool> {
        let dir = self.require_event_dir(event)?;
        let _lock = Self::lock_grants(&dir)?;
        let mut grants = Self::read_grants(&dir)?;
        if grants.remove(&user).is_none() {
            return Ok(false);
        }
        Self::write_grants(&dir, &grants)?;
        Ok(true)
    }

    fn visible_events(&self, user: UserId) -> CalverResult<Vec<EventRecord>> {
        let mut visible = Vec::new();
        for entry in fs::read_dir(&self.root)?.filter_map(|entry| entry.ok()) {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<EventId>().ok())
            else {
                continue;
            };
            let dir = entry.path();
            let Some(record) = Self::read_record(&dir)? else {
                continue;
            };
            if record.owner == user || Self::read_grants(&dir)?.contains_key(&user) {
                visible.push(record);
            } else {
                debug!(event = %id, "skipping event not visible to user");
            }
        }
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Snapshot;
    use chrono::TimeZone;

    fn version(event_id: EventId, number: u32, author: UserId, title: &str) -> Version {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Version {
            event_id,
            number,
            snapshot: Snapshot::new(title, start, start),
            author,
            created_at: Utc::now(),
            note: None,
        }
    }

    fn seeded(store: &FileStore) -> EventRecord {
        let record = EventRecord {
            id: EventId::new(),
            owner: UserId::new(),
            current_version: 1,
            created_at: Utc::now(),
        };
        store
            .create(&record, &version(record.id, 1, record.owner, "Kickoff"))
            .unwrap();
        record
    }

    #[test]
    fn test_create_and_append_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = seeded(&store);

        assert_eq!(
            store.append(1, &version(record.id, 2, record.owner, "Kickoff v2")).unwrap(),
            2
        );

        let reopened = FileStore::open(dir.path()).unwrap();
        let loaded = reopened.event(record.id).unwrap().unwrap();
        assert_eq!(loaded.current_version, 2);
        assert_eq!(loaded.owner, record.owner);
        assert_eq!(
            reopened.version(record.id, 2).unwrap().unwrap().snapshot.title,
            "Kickoff v2"
        );
        assert_eq!(reopened.versions(record.id).unwrap().len(), 2);
    }

    #[test]
    fn test_append_with_stale_expectation_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = seeded(&store);
        store
            .append(1, &version(record.id, 2, record.owner, "first"))
            .unwrap();

        let err = store
            .append(1, &version(record.id, 2, record.owner, "second"))
            .unwrap_err();
        assert!(matches!(
            err,
            CalverError::ConcurrencyConflict {
                expected: 1,
                actual: 2
            }
        ));
        assert_eq!(
            store.version(record.id, 2).unwrap().unwrap().snapshot.title,
            "first"
        );
    }

    #[test]
    fn test_grants_persist_and_delete_removes_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = seeded(&store);
        let guest = UserId::new();

        store
            .put_grant(&Grant {
                event_id: record.id,
                user_id: guest,
                role: GrantRole::Editor,
            })
            .unwrap();
        assert_eq!(
            store.grant(record.id, guest).unwrap(),
            Some(GrantRole::Editor)
        );
        assert_eq!(store.visible_events(guest).unwrap().len(), 1);

        assert!(store.delete(record.id).unwrap());
        assert!(store.event(record.id).unwrap().is_none());
        assert!(store.visible_events(guest).unwrap().is_empty());
    }

    #[test]
    fn test_failed_create_leaves_no_staging_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = seeded(&store);

        // The event directory already exists, so moving the staged copy fails.
        assert!(store
            .create(&record, &version(record.id, 1, record.owner, "Again"))
            .is_err());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(
            store.version(record.id, 1).unwrap().unwrap().snapshot.title,
            "Kickoff"
        );
    }

    #[test]
    fn test_concurrent_grant_writers_from_separate_stores_keep_every_grant() {
        let dir = tempfile::tempdir().unwrap();
        let record = seeded(&FileStore::open(dir.path()).unwrap());

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = FileStore::open(dir.path()).unwrap();
                let event_id = record.id;
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .put_grant(&Grant {
                                event_id,
                                user_id: UserId::new(),
                                role: GrantRole::Viewer,
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.grants(record.id).unwrap().len(), 40);
    }
}
