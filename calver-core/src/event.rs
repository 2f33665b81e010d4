//! Event data model.
//!
//! An event's mutable fields live in a [`Snapshot`]. The persisted
//! [`EventRecord`] only carries identity, ownership and the version counter;
//! the current field values are always read from the highest stored
//! [`Version`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{CalverError, CalverResult};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_LOCATION_LEN: usize = 200;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                $name(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an event.
    EventId
);
uuid_id!(
    /// Identifier of a user, as asserted by the identity provider.
    UserId
);

/// How often a recurring event repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        };
        f.write_str(s)
    }
}

fn default_interval() -> u32 {
    1
}

/// A recurrence rule attached to an event. The anchor occurrence is the
/// event's own start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl RecurrencePattern {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        RecurrencePattern {
            frequency,
            interval,
            until: None,
            count: None,
        }
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }
}

/// Renders as an RFC 5545 style rule, e.g. `FREQ=WEEKLY;INTERVAL=2;COUNT=4`.
impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={};INTERVAL={}", self.frequency, self.interval)?;
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format("%Y%m%dT%H%M%SZ"))?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={}", count)?;
        }
        Ok(())
    }
}

/// The complete set of mutable field values for an event at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub recurrence: Option<RecurrencePattern>,
}

impl Snapshot {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Snapshot {
            title: title.into(),
            description: None,
            start,
            end,
            location: None,
            recurrence: None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Check field values before anything is persisted.
    pub fn validate(&self) -> CalverResult<()> {
        let title_len = self.title.trim().chars().count();
        if title_len == 0 {
            return Err(CalverError::Validation("title must not be empty".into()));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(CalverError::Validation(format!(
                "title exceeds {MAX_TITLE_LEN} characters"
            )));
        }
        if self
            .description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(CalverError::Validation(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if self
            .location
            .as_ref()
            .is_some_and(|l| l.chars().count() > MAX_LOCATION_LEN)
        {
            return Err(CalverError::Validation(format!(
                "location exceeds {MAX_LOCATION_LEN} characters"
            )));
        }
        if self.end < self.start {
            return Err(CalverError::Validation(
                "end time is before start time".into(),
            ));
        }
        if let Some(pattern) = &self.recurrence {
            if pattern.interval == 0 {
                return Err(CalverError::Validation(
                    "recurrence interval must be positive".into(),
                ));
            }
            if pattern.count == Some(0) {
                return Err(CalverError::Validation(
                    "recurrence count must be positive".into(),
                ));
            }
            if pattern.until.is_some_and(|until| until < self.start) {
                return Err(CalverError::Validation(
                    "recurrence ends before the event starts".into(),
                ));
            }
        }
        Ok(())
    }

    /// Return a copy of this snapshot with the update's fields applied.
    pub fn apply(&self, update: &EventUpdate) -> Snapshot {
        let mut next = self.clone();
        if let Some(title) = &update.title {
            next.title = title.clone();
        }
        if let Some(description) = &update.description {
            next.description = description.clone();
        }
        if let Some(start) = update.start {
            next.start = start;
        }
        if let Some(end) = update.end {
            next.end = end;
        }
        if let Some(location) = &update.location {
            next.location = location.clone();
        }
        if let Some(recurrence) = &update.recurrence {
            next.recurrence = recurrence.clone();
        }
        next
    }
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update. Absent fields are left untouched; for optional fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurrence: Option<Option<RecurrencePattern>>,
}

impl EventUpdate {
    /// Whether any non-recurrence field is present.
    pub fn touches_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.start.is_some()
            || self.end.is_some()
            || self.location.is_some()
    }

    pub fn touches_recurrence(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_fields() && !self.touches_recurrence()
    }
}

/// The persisted event row. Field values are not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub owner: UserId,
    pub current_version: u32,
    pub created_at: DateTime<Utc>,
}

/// An immutable, numbered snapshot plus authorship metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub event_id: EventId,
    pub number: u32,
    pub snapshot: Snapshot,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Version {
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            number: self.number,
            author: self.author,
            created_at: self.created_at,
            note: self.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub number: u32,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// An event as seen by API callers: the record joined with one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventView {
    pub id: EventId,
    pub owner: UserId,
    pub version: u32,
    pub current_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

impl EventView {
    pub fn new(record: &EventRecord, version: Version) -> Self {
        EventView {
            id: record.id,
            owner: record.owner,
            version: version.number,
            current_version: record.current_version,
            created_at: record.created_at,
            updated_at: version.created_at,
            updated_by: version.author,
            snapshot: version.snapshot,
        }
    }
}
