//! Persistence for events, versions and collaborator grants.
//!
//! [`EventStore`] is the contract a persistence backend fulfils. The one
//! operation with real concurrency semantics is [`EventStore::append`]: a
//! compare-and-append on (event, expected version) that either writes the
//! whole version or nothing.

mod file;
mod memory;
mod versions;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use versions::VersionStore;

use crate::error::CalverResult;
use crate::event::{EventId, EventRecord, UserId, Version, VersionSummary};
use crate::permission::{Grant, GrantRole};

/// Durable storage for events, their versions and grants.
///
/// # Version semantics
///
/// - [`create`](Self::create) stores the event row together with version 1.
/// - [`append`](Self::append) succeeds only if the stored current version
///   equals `expected`; otherwise it fails with
///   [`CalverError::ConcurrencyConflict`](crate::error::CalverError::ConcurrencyConflict)
///   and nothing is written.
/// - Stored versions are never modified or removed, except when the whole
///   event is deleted.
#[cfg_attr(test, mockall::automock)]
pub trait EventStore: Send + Sync {
    /// Store a new event row and its first version as one unit.
    fn create(&self, record: &EventRecord, first: &Version) -> CalverResult<()>;

    fn event(&self, id: EventId) -> CalverResult<Option<EventRecord>>;

    /// Append `version` if the current version is still `expected`.
    /// Returns the new current version number.
    fn append(&self, expected: u32, version: &Version) -> CalverResult<u32>;

    fn version(&self, id: EventId, number: u32) -> CalverResult<Option<Version>>;

    /// Summaries of every stored version, ascending.
    fn versions(&self, id: EventId) -> CalverResult<Vec<VersionSummary>>;

    /// Remove the event with its versions and grants.
    /// Returns `false` if it did not exist.
    fn delete(&self, id: EventId) -> CalverResult<bool>;

    fn grant(&self, event: EventId, user: UserId) -> CalverResult<Option<GrantRole>>;

    fn grants(&self, event: EventId) -> CalverResult<Vec<Grant>>;

    /// Insert or replace a grant, returning the role it replaced.
    fn put_grant(&self, grant: &Grant) -> CalverResult<Option<GrantRole>>;

    /// Returns `false` if there was no such grant.
    fn remove_grant(&self, event: EventId, user: UserId) -> CalverResult<bool>;

    /// Events the user owns or holds a grant on.
    fn visible_events(&self, user: UserId) -> CalverResult<Vec<EventRecord>>;
}
