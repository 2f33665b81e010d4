//! Orchestration of event mutations.
//!
//! Every mutation walks the same stages:
//!
//! ```text
//! Received → AuthorizationChecked → Applied → Versioned → Committed
//!     ↘ Rejected             ↘ Rejected     ↘ ConcurrencyConflict
//! ```
//!
//! Nothing is written before `Versioned`, and the append is a single
//! compare-and-append, so a mutation is either committed with exactly one new
//! version or leaves no trace. Conflicts are reported, never retried here.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::diff::{self, FieldDelta};
use crate::error::{CalverError, CalverResult};
use crate::event::{EventId, EventRecord, EventUpdate, Snapshot, UserId, Version};
use crate::notify::{CommitNotice, CommitNotifier, NoticeKind};
use crate::permission::{Action, Grant, GrantRole, PermissionEvaluator};
use crate::store::{EventStore, VersionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStage {
    Received,
    AuthorizationChecked,
    Applied,
    Versioned,
    Committed,
    Rejected,
    ConcurrencyConflict,
}

impl fmt::Display for MutationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Apply a partial update to the current snapshot.
    Update(EventUpdate),
    /// Make an earlier version's snapshot current again, as a new version.
    Restore { version: u32 },
}

#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub event_id: EventId,
    pub actor: UserId,
    /// The version the caller believes is current.
    pub expected_version: u32,
    pub mutation: Mutation,
    pub note: Option<String>,
}

/// Result of a committed mutation.
#[derive(Debug, Clone)]
pub struct Committed {
    pub record: EventRecord,
    pub version: Version,
    /// Empty when the mutation left every field as it was.
    pub deltas: Vec<FieldDelta>,
}

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn EventStore>,
    permissions: PermissionEvaluator,
    versions: VersionStore,
    notifier: CommitNotifier,
}

fn trace_stage(event: EventId, stage: MutationStage) {
    debug!(%event, %stage, "mutation stage");
}

fn reject<T>(event: EventId, err: CalverError) -> CalverResult<T> {
    let stage = if matches!(err, CalverError::ConcurrencyConflict { .. }) {
        MutationStage::ConcurrencyConflict
    } else {
        MutationStage::Rejected
    };
    debug!(%event, %stage, error = %err, "mutation stopped");
    Err(err)
}

impl Coordinator {
    pub fn new(store: Arc<dyn EventStore>, notifier: CommitNotifier) -> Self {
        Coordinator {
            permissions: PermissionEvaluator::new(store.clone()),
            versions: VersionStore::new(store.clone()),
            store,
            notifier,
        }
    }

    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn notifier(&self) -> &CommitNotifier {
        &self.notifier
    }

    /// Create an event owned by `owner`, together with version 1.
    pub fn create(
        &self,
        owner: UserId,
        snapshot: Snapshot,
        note: Option<String>,
    ) -> CalverResult<Committed> {
        snapshot.validate()?;
        let (record, version) = self.versions.create(owner, snapshot, note)?;
        let deltas = diff::initial(&version.snapshot);
        info!(event = %record.id, %owner, "event created");
        self.notifier.notify(CommitNotice {
            event_id: record.id,
            kind: NoticeKind::Created,
            version: Some(1),
        });
        Ok(Committed {
            record,
            version,
            deltas,
        })
    }

    fn required_actions(mutation: &Mutation) -> CalverResult<Vec<Action>> {
        match mutation {
            Mutation::Update(update) => {
                if update.is_empty() {
                    return Err(CalverError::Validation("update has no fields".into()));
                }
                let mut actions = Vec::new();
                if update.touches_fields() {
                    actions.push(Action::EditFields);
                }
                if update.touches_recurrence() {
                    actions.push(Action::EditRecurrence);
                }
                Ok(actions)
            }
            // Recurrence is checked once the restored snapshot is known.
            Mutation::Restore { .. } => Ok(vec![Action::EditFields]),
        }
    }

    fn authorize(&self, request: &MutationRequest) -> CalverResult<EventRecord> {
        let actions = Self::required_actions(&request.mutation)?;
        let mut record = None;
        for action in actions {
            record = Some(
                self.permissions
                    .require(request.actor, request.event_id, action)?,
            );
        }
        record.ok_or_else(|| CalverError::Internal("no action to authorize".into()))
    }

    fn apply(&self, record: &EventRecord, mutation: &Mutation) -> CalverResult<(Snapshot, Snapshot)> {
        let current = self.versions.current(record)?.snapshot;
        let next = match mutation {
            Mutation::Update(update) => current.apply(update),
            Mutation::Restore { version } => self.versions.reconstruct(record.id, *version)?,
        };
        next.validate()?;
        Ok((current, next))
    }

    /// Run a mutation through authorization, application and versioning.
    pub fn mutate(&self, request: MutationRequest) -> CalverResult<Committed> {
        let event = request.event_id;
        trace_stage(event, MutationStage::Received);

        let mut record = match self.authorize(&request) {
            Ok(record) => record,
            Err(e) => return reject(event, e),
        };
        trace_stage(event, MutationStage::AuthorizationChecked);

        // The token must name the version this mutation is built on.
        let base = record.current_version;
        if request.expected_version != base {
            return reject(
                event,
                CalverError::ConcurrencyConflict {
                    expected: request.expected_version,
                    actual: base,
                },
            );
        }

        let (current, next) = match self.apply(&record, &request.mutation) {
            Ok(pair) => pair,
            Err(e) => return reject(event, e),
        };
        if matches!(request.mutation, Mutation::Restore { .. }) && current.recurrence != next.recurrence {
            if let Err(e) = self
                .permissions
                .require(request.actor, event, Action::EditRecurrence)
            {
                return reject(event, e);
            }
        }
        let deltas = diff::diff(&current, &next);
        trace_stage(event, MutationStage::Applied);

        let version = match self.versions.append(
            event,
            base,
            next,
            request.actor,
            request.note,
        ) {
            Ok(version) => version,
            Err(e) => return reject(event, e),
        };
        trace_stage(event, MutationStage::Versioned);

        record.current_version = version.number;
        info!(%event, version = version.number, actor = %request.actor, changes = deltas.len(), "event updated");
        self.notifier.notify(CommitNotice {
            event_id: event,
            kind: NoticeKind::Updated,
            version: Some(version.number),
        });
        trace_stage(event, MutationStage::Committed);

        Ok(Committed {
            record,
            version,
            deltas,
        })
    }

    pub fn delete(&self, actor: UserId, event: EventId) -> CalverResult<()> {
        self.permissions.require(actor, event, Action::Delete)?;
        if !self.store.delete(event)? {
            return Err(CalverError::event_not_found(event));
        }
        info!(%event, %actor, "event deleted");
        self.notifier.notify(CommitNotice {
            event_id: event,
            kind: NoticeKind::Deleted,
            version: None,
        });
        Ok(())
    }

    /// Grant `target` a role, replacing any grant they already hold.
    pub fn share(
        &self,
        actor: UserId,
        event: EventId,
        target: UserId,
        role: GrantRole,
        expected_version: Option<u32>,
    ) -> CalverResult<Grant> {
        let record = self.permissions.require(actor, event, Action::Share)?;
        if target == record.owner {
            return Err(CalverError::Validation(
                "the owner cannot be granted a role".into(),
            ));
        }
        if let Some(expected) = expected_version {
            if expected != record.current_version {
                return Err(CalverError::ConcurrencyConflict {
                    expected,
                    actual: record.current_version,
                });
            }
        }
        let grant = Grant {
            event_id: event,
            user_id: target,
            role,
        };
        let previous = self.store.put_grant(&grant)?;
        info!(%event, user = %target, ?role, ?previous, "event shared");
        Ok(grant)
    }

    pub fn revoke(&self, actor: UserId, event: EventId, target: UserId) -> CalverResult<()> {
        self.permissions.require(actor, event, Action::Share)?;
        if !self.store.remove_grant(event, target)? {
            return Err(CalverError::NotFound(format!(
                "grant for user {target} on event {event}"
            )));
        }
        info!(%event, user = %target, "share revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Frequency, RecurrencePattern};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Coordinator, EventRecord) {
        let coordinator = Coordinator::new(Arc::new(MemoryStore::new()), CommitNotifier::new());
        let start = Utc.with_ymd_and_hms(2024, 9, 2, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 9, 2, 11, 0, 0).unwrap();
        let committed = coordinator
            .create(UserId::new(), Snapshot::new("Sprint review", start, end), None)
            .unwrap();
        (coordinator, committed.record)
    }

    fn update(event: EventId, actor: UserId, expected: u32, update: EventUpdate) -> MutationRequest {
        MutationRequest {
            event_id: event,
            actor,
            expected_version: expected,
            mutation: Mutation::Update(update),
            note: None,
        }
    }

    fn retitle(title: &str) -> EventUpdate {
        EventUpdate {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_update_appends_one_version_and_notifies() {
        let (coordinator, record) = setup();
        let mut notices = coordinator.notifier().subscribe();

        let committed = coordinator
            .mutate(update(record.id, record.owner, 1, retitle("Sprint demo")))
            .unwrap();
        assert_eq!(committed.version.number, 2);
        assert_eq!(committed.record.current_version, 2);
        assert_eq!(committed.deltas.len(), 1);

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.version, Some(2));
        assert_eq!(notice.kind, NoticeKind::Updated);
    }

    #[test]
    fn test_viewer_is_rejected_before_anything_is_written() {
        let (coordinator, record) = setup();
        let viewer = UserId::new();
        coordinator
            .share(record.owner, record.id, viewer, GrantRole::Viewer, None)
            .unwrap();

        let err = coordinator
            .mutate(update(record.id, viewer, 1, retitle("hijacked")))
            .unwrap_err();
        assert!(matches!(err, CalverError::Forbidden { .. }));
        assert_eq!(coordinator.versions().list_versions(record.id).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_update_leaves_no_version() {
        let (coordinator, record) = setup();
        let bad = EventUpdate {
            end: Some(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let err = coordinator
            .mutate(update(record.id, record.owner, 1, bad))
            .unwrap_err();
        assert!(matches!(err, CalverError::Validation(_)));

        let bad_rule = EventUpdate {
            recurrence: Some(Some(RecurrencePattern::new(Frequency::Daily, 0))),
            ..Default::default()
        };
        assert!(coordinator
            .mutate(update(record.id, record.owner, 1, bad_rule))
            .is_err());
        assert_eq!(coordinator.versions().list_versions(record.id).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_token_conflicts() {
        let (coordinator, record) = setup();
        coordinator
            .mutate(update(record.id, record.owner, 1, retitle("one")))
            .unwrap();
        let err = coordinator
            .mutate(update(record.id, record.owner, 1, retitle("two")))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unchanged_update_still_appends_a_version() {
        let (coordinator, record) = setup();
        let committed = coordinator
            .mutate(update(record.id, record.owner, 1, retitle("Sprint review")))
            .unwrap();
        assert_eq!(committed.version.number, 2);
        assert!(committed.deltas.is_empty());
        assert_eq!(coordinator.versions().list_versions(record.id).unwrap().len(), 2);

        let err = coordinator
            .mutate(update(record.id, record.owner, 1, retitle("Sprint review")))
            .unwrap_err();
        assert!(matches!(
            err,
            CalverError::ConcurrencyConflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    /// Delegates to a memory store, but commits `pending` as another writer
    /// right after the first event lookup returns.
    struct InterleavedStore {
        inner: MemoryStore,
        pending: std::sync::Mutex<Option<(u32, Version)>>,
    }

    impl InterleavedStore {
        fn interleave(&self, expected: u32, version: Version) {
            *self.pending.lock().unwrap() = Some((expected, version));
        }
    }

    impl EventStore for InterleavedStore {
        fn create(&self, record: &EventRecord, first: &Version) -> CalverResult<()> {
            self.inner.create(record, first)
        }

        fn event(&self, id: EventId) -> CalverResult<Option<EventRecord>> {
            let read = self.inner.event(id)?;
            if let Some((expected, version)) = self.pending.lock().unwrap().take() {
                self.inner.append(expected, &version)?;
            }
            Ok(read)
        }

        fn append(&self, expected: u32, version: &Version) -> CalverResult<u32> {
            self.inner.append(expected, version)
        }

        fn version(&self, id: EventId, number: u32) -> CalverResult<Option<Version>> {
            self.inner.version(id, number)
        }

        fn versions(&self, id: EventId) -> CalverResult<Vec<crate::event::VersionSummary>> {
            self.inner.versions(id)
        }

        fn delete(&self, id: EventId) -> CalverResult<bool> {
            self.inner.delete(id)
        }

        fn grant(&self, event: EventId, user: UserId) -> CalverResult<Option<GrantRole>> {
            self.inner.grant(event, user)
        }

        fn grants(&self, event: EventId) -> CalverResult<Vec<Grant>> {
            self.inner.grants(event)
        }

        fn put_grant(&self, grant: &Grant) -> CalverResult<Option<GrantRole>> {
            self.inner.put_grant(grant)
        }

        fn remove_grant(&self, event: EventId, user: UserId) -> CalverResult<bool> {
            self.inner.remove_grant(event, user)
        }

        fn visible_events(&self, user: UserId) -> CalverResult<Vec<EventRecord>> {
            self.inner.visible_events(user)
        }
    }

    fn interleaved() -> (Arc<InterleavedStore>, Coordinator, EventRecord) {
        let store = Arc::new(InterleavedStore {
            inner: MemoryStore::new(),
            pending: std::sync::Mutex::new(None),
        });
        let coordinator = Coordinator::new(store.clone(), CommitNotifier::new());
        let start = Utc.with_ymd_and_hms(2024, 9, 2, 10, 0, 0).unwrap();
        let record = coordinator
            .create(UserId::new(), Snapshot::new("Sprint review", start, start), None)
            .unwrap()
            .record;
        coordinator
            .mutate(update(record.id, record.owner, 1, retitle("Sprint review v2")))
            .unwrap();
        (store, coordinator, record)
    }

    fn other_writer(coordinator: &Coordinator, record: &EventRecord) -> Version {
        let mut snapshot = coordinator.versions().reconstruct(record.id, 2).unwrap();
        snapshot.location = Some("Other writer's room".into());
        Version {
            event_id: record.id,
            number: 3,
            snapshot,
            author: UserId::new(),
            created_at: Utc::now(),
            note: None,
        }
    }

    #[rstest::rstest]
    #[case::token_ahead_of_read(3)]
    #[case::token_matches_read(2)]
    fn test_commit_between_read_and_append_is_not_lost(#[case] expected: u32) {
        let (store, coordinator, record) = interleaved();
        store.interleave(2, other_writer(&coordinator, &record));

        let err = coordinator
            .mutate(update(record.id, record.owner, expected, retitle("C")))
            .unwrap_err();
        assert!(err.is_retryable());

        let versions = coordinator.versions().list_versions(record.id).unwrap();
        assert_eq!(versions.len(), 3);
        let latest = coordinator.versions().reconstruct(record.id, 3).unwrap();
        assert_eq!(latest.location.as_deref(), Some("Other writer's room"));
        assert_eq!(latest.title, "Sprint review v2");
    }

    #[test]
    fn test_restore_appends_copy_of_old_version() {
        let (coordinator, record) = setup();
        coordinator
            .mutate(update(record.id, record.owner, 1, retitle("renamed")))
            .unwrap();
        let committed = coordinator
            .mutate(MutationRequest {
                event_id: record.id,
                actor: record.owner,
                expected_version: 2,
                mutation: Mutation::Restore { version: 1 },
                note: Some("undo rename".into()),
            })
            .unwrap();
        assert_eq!(committed.version.number, 3);
        assert_eq!(committed.version.snapshot.title, "Sprint review");
    }

    #[test]
    fn test_share_rules() {
        let (coordinator, record) = setup();
        let editor = UserId::new();
        assert!(matches!(
            coordinator.share(record.owner, record.id, record.owner, GrantRole::Viewer, None),
            Err(CalverError::Validation(_))
        ));
        assert!(matches!(
            coordinator.share(record.owner, record.id, editor, GrantRole::Editor, Some(7)),
            Err(CalverError::ConcurrencyConflict { .. })
        ));
        coordinator
            .share(record.owner, record.id, editor, GrantRole::Editor, Some(1))
            .unwrap();
        assert!(matches!(
            coordinator.share(editor, record.id, UserId::new(), GrantRole::Viewer, None),
            Err(CalverError::Forbidden { .. })
        ));
        assert!(matches!(
            coordinator.delete(editor, record.id),
            Err(CalverError::Forbidden { .. })
        ));

        coordinator.revoke(record.owner, record.id, editor).unwrap();
        assert!(!coordinator
            .permissions()
            .authorize(editor, record.id, Action::View));
    }
}
