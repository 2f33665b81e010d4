//! Human-readable change history, projected from the version ledger.
//!
//! The changelog is never stored. Entry `n` is derived from versions `n - 1`
//! and `n`, oldest first, so it reads as a narrative and is identical every
//! time it is rebuilt from the same versions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::cache::{DiffCache, DiffKey};
use crate::date_range::Page;
use crate::diff::{self, FieldDelta};
use crate::error::CalverResult;
use crate::event::{EventId, EventRecord, UserId, Version};
use crate::store::VersionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
}

/// What changed between two versions, who changed it and when.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub event_id: EventId,
    /// 0 for the entry that created the event.
    pub from_version: u32,
    pub to_version: u32,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub deltas: Vec<FieldDelta>,
    pub summary: String,
}

fn summarize(version: &Version, deltas: &[FieldDelta], tz: &Tz) -> String {
    let verb = if version.number == 1 { "created" } else { "updated" };
    let when = version.created_at.with_timezone(tz).format("%Y-%m-%d %H:%M %Z");
    let mut summary = format!("v{} {} by {} at {}", version.number, verb, version.author, when);
    if let Some(note) = &version.note {
        summary.push_str(&format!(" ({})", note));
    }
    if deltas.is_empty() {
        summary.push_str(": no field changes");
    } else {
        let changes: Vec<String> = deltas.iter().map(|d| d.render(tz)).collect();
        summary.push_str(": ");
        summary.push_str(&changes.join("; "));
    }
    summary
}

/// Builds changelog entries and cached diffs from the version ledger.
#[derive(Clone)]
pub struct ChangelogBuilder {
    versions: VersionStore,
    cache: Arc<dyn DiffCache>,
    timezone: Tz,
}

impl ChangelogBuilder {
    pub fn new(versions: VersionStore, cache: Arc<dyn DiffCache>, timezone: Tz) -> Self {
        ChangelogBuilder {
            versions,
            cache,
            timezone,
        }
    }

    /// The whole changelog, oldest first.
    pub fn changelog(&self, record: &EventRecord) -> Changelog<'_> {
        Changelog {
            builder: self,
            event_id: record.id,
            next: 1,
            end: record.current_version,
            previous: None,
        }
    }

    /// Entries `offset + 1 ..= offset + limit`, built on demand.
    pub fn window(&self, record: &EventRecord, page: Page) -> Changelog<'_> {
        let first = u32::try_from(page.offset)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let last = u32::try_from(page.offset.saturating_add(page.limit))
            .unwrap_or(u32::MAX)
            .min(record.current_version);
        Changelog {
            builder: self,
            event_id: record.id,
            next: first,
            end: last,
            previous: None,
        }
    }

    /// Deltas between two versions of an event, memoized.
    pub fn diff_versions(
        &self,
        event: EventId,
        from: u32,
        to: u32,
    ) -> CalverResult<Arc<Vec<FieldDelta>>> {
        let key = DiffKey::new(event, from, to);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let old = self.versions.reconstruct(event, from)?;
        let new = self.versions.reconstruct(event, to)?;
        let deltas = Arc::new(diff::diff(&old, &new));
        self.cache.put(key, deltas.clone());
        Ok(deltas)
    }

    fn record_for(&self, version: &Version, previous: Option<&Version>) -> ChangeRecord {
        let deltas = match previous {
            None => diff::initial(&version.snapshot),
            Some(previous) => {
                let key = DiffKey::new(version.event_id, previous.number, version.number);
                match self.cache.get(&key) {
                    Some(hit) => hit.as_ref().clone(),
                    None => {
                        let deltas = diff::diff(&previous.snapshot, &version.snapshot);
                        self.cache.put(key, Arc::new(deltas.clone()));
                        deltas
                    }
                }
            }
        };
        ChangeRecord {
            event_id: version.event_id,
            from_version: previous.map(|p| p.number).unwrap_or(0),
            to_version: version.number,
            author: version.author,
            timestamp: version.created_at,
            kind: if previous.is_none() {
                ChangeType::Created
            } else {
                ChangeType::Updated
            },
            note: version.note.clone(),
            summary: summarize(version, &deltas, &self.timezone),
            deltas,
        }
    }
}

/// Lazy changelog cursor. Each step loads at most two versions, and the
/// previous one is reused from the last step.
#[derive(Clone)]
pub struct Changelog<'a> {
    builder: &'a ChangelogBuilder,
    event_id: EventId,
    next: u32,
    end: u32,
    previous: Option<Version>,
}

impl Changelog<'_> {
    fn step(&mut self, number: u32) -> CalverResult<ChangeRecord> {
        let versions = &self.builder.versions;
        let version = versions.get(self.event_id, number)?;
        let previous = match self.previous.take() {
            Some(previous) if previous.number + 1 == number => Some(previous),
            _ if number > 1 => Some(versions.get(self.event_id, number - 1)?),
            _ => None,
        };
        let record = self.builder.record_for(&version, previous.as_ref());
        self.previous = Some(version);
        Ok(record)
    }
}

impl Iterator for Changelog<'_> {
    type Item = CalverResult<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let number = self.next;
        self.next += 1;
        let result = self.step(number);
        if result.is_err() {
            // A broken ledger ends the sequence after reporting once.
            self.next = self.end.saturating_add(1);
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_add(1).saturating_sub(self.next) as usize;
        (0, Some(remaining))
    }
}
