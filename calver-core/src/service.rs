//! The operations offered to API callers.
//!
//! Mutations go through the [`Coordinator`]. Reads (history, changelog,
//! diff, listing) go straight to the ledger, gated by the same permission
//! checks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::info;

use crate::cache::{DiffCache, MemoryDiffCache, NoCache};
use crate::changelog::{ChangeRecord, ChangelogBuilder};
use crate::config::{CalverConfig, StoreBackend};
use crate::coordinator::{Committed, Coordinator, Mutation, MutationRequest};
use crate::date_range::{DateRange, Page};
use crate::diff::FieldDelta;
use crate::error::{CalverError, CalverResult};
use crate::event::{EventId, EventUpdate, EventView, Snapshot, UserId, VersionSummary};
use crate::notify::{CacheInvalidator, CommitNotice, CommitNotifier};
use crate::permission::{Action, Grant, GrantRole, PermissionEvaluator, Role};
use crate::store::{EventStore, FileStore, MemoryStore, VersionStore};

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub display_timezone: Tz,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub max_occurrences_per_event: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            display_timezone: Tz::UTC,
            default_page_size: 100,
            max_page_size: 500,
            max_occurrences_per_event: 366,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &CalverConfig) -> CalverResult<Self> {
        Ok(ServiceSettings {
            display_timezone: config.timezone()?,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            max_occurrences_per_event: config.max_occurrences_per_event,
        })
    }

    pub fn page(&self, offset: Option<usize>, limit: Option<usize>) -> Page {
        Page::from_args(offset, limit, self.default_page_size, self.max_page_size)
    }
}

/// A committed update or restore together with what it changed.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatedEvent {
    pub event: EventView,
    pub changes: Vec<FieldDelta>,
}

impl From<Committed> for UpdatedEvent {
    fn from(committed: Committed) -> Self {
        UpdatedEvent {
            event: EventView::new(&committed.record, committed.version),
            changes: committed.deltas,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedEvent {
    #[serde(flatten)]
    pub event: EventView,
    pub role: Role,
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventListing {
    pub events: Vec<ListedEvent>,
    /// Matching events before pagination.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub event_id: EventId,
    pub from_version: u32,
    pub to_version: u32,
    pub deltas: Vec<FieldDelta>,
}

pub struct EventService {
    store: Arc<dyn EventStore>,
    coordinator: Coordinator,
    changelog: ChangelogBuilder,
    cache: Arc<dyn DiffCache>,
    settings: ServiceSettings,
}

impl EventService {
    pub fn new(
        store: Arc<dyn EventStore>,
        cache: Arc<dyn DiffCache>,
        settings: ServiceSettings,
    ) -> Self {
        let coordinator = Coordinator::new(store.clone(), CommitNotifier::new());
        let changelog = ChangelogBuilder::new(
            VersionStore::new(store.clone()),
            cache.clone(),
            settings.display_timezone,
        );
        EventService {
            store,
            coordinator,
            changelog,
            cache,
            settings,
        }
    }

    /// An in-memory service with default settings and a diff cache.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDiffCache::new()),
            ServiceSettings::default(),
        )
    }

    pub fn from_config(config: &CalverConfig) -> CalverResult<Self> {
        let store: Arc<dyn EventStore> = match config.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::File => Arc::new(FileStore::open(config.data_path())?),
        };
        let cache: Arc<dyn DiffCache> = if config.cache_enabled {
            Arc::new(MemoryDiffCache::new())
        } else {
            Arc::new(NoCache)
        };
        info!(store = ?config.store, cache = config.cache_enabled, "event service ready");
        Ok(Self::new(store, cache, ServiceSettings::from_config(config)?))
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CommitNotice> {
        self.coordinator.notifier().subscribe()
    }

    /// A cache invalidator listening to this service's commits. The caller
    /// is expected to drive it with [`CacheInvalidator::run`].
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::new(self.cache.clone(), self.subscribe())
    }

    fn permissions(&self) -> &PermissionEvaluator {
        self.coordinator.permissions()
    }

    fn versions(&self) -> &VersionStore {
        self.coordinator.versions()
    }

    pub fn create_event(
        &self,
        actor: UserId,
        snapshot: Snapshot,
        note: Option<String>,
    ) -> CalverResult<EventView> {
        let committed = self.coordinator.create(actor, snapshot, note)?;
        Ok(EventView::new(&committed.record, committed.version))
    }

    pub fn get_event(&self, actor: UserId, event: EventId) -> CalverResult<EventView> {
        let record = self.permissions().require(actor, event, Action::View)?;
        let current = self.versions().current(&record)?;
        Ok(EventView::new(&record, current))
    }

    pub fn update_event(
        &self,
        actor: UserId,
        event: EventId,
        expected_version: u32,
        update: EventUpdate,
        note: Option<String>,
    ) -> CalverResult<UpdatedEvent> {
        self.coordinator
            .mutate(MutationRequest {
                event_id: event,
                actor,
                expected_version,
                mutation: Mutation::Update(update),
                note,
            })
            .map(UpdatedEvent::from)
    }

    /// Make `version` current again by appending a copy of it.
    pub fn restore_event(
        &self,
        actor: UserId,
        event: EventId,
        version: u32,
        expected_version: u32,
        note: Option<String>,
    ) -> CalverResult<UpdatedEvent> {
        self.coordinator
            .mutate(MutationRequest {
                event_id: event,
                actor,
                expected_version,
                mutation: Mutation::Restore { version },
                note,
            })
            .map(UpdatedEvent::from)
    }

    pub fn delete_event(&self, actor: UserId, event: EventId) -> CalverResult<()> {
        self.coordinator.delete(actor, event)
    }

    pub fn share_event(
        &self,
        actor: UserId,
        event: EventId,
        target: UserId,
        role: GrantRole,
        expected_version: Option<u32>,
    ) -> CalverResult<Grant> {
        self.coordinator
            .share(actor, event, target, role, expected_version)
    }

    pub fn revoke_share(&self, actor: UserId, event: EventId, target: UserId) -> CalverResult<()> {
        self.coordinator.revoke(actor, event, target)
    }

    /// Collaborators of an event, visible to anyone who can view it.
    pub fn grants(&self, actor: UserId, event: EventId) -> CalverResult<Vec<Grant>> {
        self.permissions().require(actor, event, Action::View)?;
        self.store.grants(event)
    }

    pub fn get_event_at_version(
        &self,
        actor: UserId,
        event: EventId,
        version: u32,
    ) -> CalverResult<EventView> {
        let record = self
            .permissions()
            .require(actor, event, Action::ViewHistory)?;
        let version = self.versions().get(event, version)?;
        Ok(EventView::new(&record, version))
    }

    pub fn history(&self, actor: UserId, event: EventId) -> CalverResult<Vec<VersionSummary>> {
        self.permissions()
            .require(actor, event, Action::ViewHistory)?;
        self.versions().list_versions(event)
    }

    /// One page of the changelog, oldest first. Only the entries inside the
    /// page are built.
    pub fn changelog(
        &self,
        actor: UserId,
        event: EventId,
        page: Page,
    ) -> CalverResult<Vec<ChangeRecord>> {
        let record = self
            .permissions()
            .require(actor, event, Action::ViewHistory)?;
        self.changelog.window(&record, page).collect()
    }

    pub fn diff(
        &self,
        actor: UserId,
        event: EventId,
        from: u32,
        to: u32,
    ) -> CalverResult<VersionDiff> {
        let record = self
            .permissions()
            .require(actor, event, Action::ViewHistory)?;
        for number in [from, to] {
            if number == 0 || number > record.current_version {
                return Err(CalverError::version_not_found(event, number));
            }
        }
        let deltas = self.changelog.diff_versions(event, from, to)?;
        Ok(VersionDiff {
            event_id: event,
            from_version: from,
            to_version: to,
            deltas: deltas.as_ref().clone(),
        })
    }

    /// Events the actor may view with at least one occurrence starting in
    /// `range`, ordered by first occurrence then id.
    pub fn list_events(
        &self,
        actor: UserId,
        range: DateRange,
        page: Page,
    ) -> CalverResult<EventListing> {
        range.validate()?;
        let mut matches = Vec::new();
        for record in self.store.visible_events(actor)? {
            let role = self.permissions().resolve_role(actor, record.id)?;
            if !role.permits(Action::View) {
                continue;
            }
            let current = self.versions().current(&record)?;
            let duration = current.snapshot.end - current.snapshot.start;
            let occurrences: Vec<Occurrence> = current
                .snapshot
                .occurrences(range)
                .take(self.settings.max_occurrences_per_event)
                .map(|start| Occurrence {
                    start,
                    end: start + duration,
                })
                .collect();
            if occurrences.is_empty() {
                continue;
            }
            matches.push(ListedEvent {
                event: EventView::new(&record, current),
                role,
                occurrences,
            });
        }

        matches.sort_by(|a, b| {
            a.occurrences[0]
                .start
                .cmp(&b.occurrences[0].start)
                .then_with(|| a.event.id.cmp(&b.event.id))
        });
        let total = matches.len();
        let events = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(EventListing {
            events,
            total,
            offset: page.offset,
            limit: page.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Frequency, RecurrencePattern};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn standup() -> Snapshot {
        Snapshot {
            recurrence: Some(RecurrencePattern::new(Frequency::Weekly, 1).count(10)),
            ..Snapshot::new("Standup", at(2024, 3, 4, 9), at(2024, 3, 4, 10))
        }
    }

    #[test]
    fn test_update_returns_changes_and_history_grows() {
        let service = EventService::in_memory();
        let owner = UserId::new();
        let event = service.create_event(owner, standup(), None).unwrap();

        let updated = service
            .update_event(
                owner,
                event.id,
                1,
                EventUpdate {
                    location: Some(Some("Room 4".into())),
                    ..Default::default()
                },
                Some("moved".into()),
            )
            .unwrap();
        assert_eq!(updated.event.version, 2);
        assert_eq!(updated.changes.len(), 1);

        let history = service.history(owner, event.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].note.as_deref(), Some("moved"));

        let old = service.get_event_at_version(owner, event.id, 1).unwrap();
        assert_eq!(old.snapshot.location, None);
        assert_eq!(old.current_version, 2);
    }

    #[test]
    fn test_diff_rejects_unknown_versions() {
        let service = EventService::in_memory();
        let owner = UserId::new();
        let event = service.create_event(owner, standup(), None).unwrap();

        assert!(matches!(
            service.diff(owner, event.id, 1, 2),
            Err(CalverError::NotFound(_))
        ));
        assert!(service.diff(owner, event.id, 1, 1).unwrap().deltas.is_empty());
    }

    #[test]
    fn test_strangers_see_nothing() {
        let service = EventService::in_memory();
        let owner = UserId::new();
        let stranger = UserId::new();
        let event = service.create_event(owner, standup(), None).unwrap();

        assert!(matches!(
            service.get_event(stranger, event.id),
            Err(CalverError::Forbidden { .. })
        ));
        assert!(matches!(
            service.changelog(stranger, event.id, Page::new(0, 10)),
            Err(CalverError::Forbidden { .. })
        ));
        let listing = service
            .list_events(stranger, DateRange::unbounded(), Page::new(0, 10))
            .unwrap();
        assert_eq!(listing.total, 0);
    }

    #[test]
    fn test_listing_orders_and_paginates() {
        let service = EventService::in_memory();
        let owner = UserId::new();
        let viewer = UserId::new();
        let weekly = service.create_event(owner, standup(), None).unwrap();
        let once = service
            .create_event(
                owner,
                Snapshot::new("Kickoff", at(2024, 3, 1, 12), at(2024, 3, 1, 13)),
                None,
            )
            .unwrap();
        service
            .create_event(
                owner,
                Snapshot::new("Retro", at(2024, 5, 1, 12), at(2024, 5, 1, 13)),
                None,
            )
            .unwrap();
        service
            .share_event(owner, weekly.id, viewer, GrantRole::Viewer, None)
            .unwrap();

        let march = DateRange::new(at(2024, 3, 1, 0), at(2024, 4, 1, 0)).unwrap();
        let listing = service.list_events(owner, march, Page::new(0, 10)).unwrap();
        assert_eq!(listing.total, 2);
        assert_eq!(listing.events[0].event.id, once.id);
        assert_eq!(listing.events[1].event.id, weekly.id);
        assert_eq!(listing.events[1].occurrences.len(), 4);
        assert_eq!(listing.events[1].occurrences[0].end, at(2024, 3, 4, 10));

        let second_page = service.list_events(owner, march, Page::new(1, 1)).unwrap();
        assert_eq!(second_page.events.len(), 1);
        assert_eq!(second_page.events[0].event.id, weekly.id);

        let shared = service.list_events(viewer, march, Page::new(0, 10)).unwrap();
        assert_eq!(shared.total, 1);
        assert_eq!(shared.events[0].role, Role::Viewer);
    }

    #[test]
    fn test_occurrences_per_event_are_capped() {
        let service = EventService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoCache),
            ServiceSettings {
                max_occurrences_per_event: 2,
                ..ServiceSettings::default()
            },
        );
        let owner = UserId::new();
        service.create_event(owner, standup(), None).unwrap();
        let listing = service
            .list_events(owner, DateRange::unbounded(), Page::new(0, 10))
            .unwrap();
        assert_eq!(listing.events[0].occurrences.len(), 2);
    }
}
