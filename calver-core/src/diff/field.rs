//! The tracked-field table.
//!
//! Every versioned event field has one [`FieldDescriptor`]. The diff engine
//! walks [`TRACKED_FIELDS`] in order and never branches on field names, so
//! tracking a new field means adding one entry here.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{CalverError, CalverResult};
use crate::event::{RecurrencePattern, Snapshot};

/// A field value lifted out of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Instant(DateTime<Utc>),
    Recurrence(RecurrencePattern),
}

/// Snapshot fields as independent optionals, used to rebuild a snapshot
/// from a sequence of deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub recurrence: Option<RecurrencePattern>,
}

impl SnapshotDraft {
    pub fn build(self) -> CalverResult<Snapshot> {
        let missing = |name: &str| CalverError::Validation(format!("missing field '{name}'"));
        Ok(Snapshot {
            title: self.title.ok_or_else(|| missing("title"))?,
            description: self.description,
            start: self.start.ok_or_else(|| missing("start"))?,
            end: self.end.ok_or_else(|| missing("end"))?,
            location: self.location,
            recurrence: self.recurrence,
        })
    }
}

impl From<Snapshot> for SnapshotDraft {
    fn from(s: Snapshot) -> Self {
        SnapshotDraft {
            title: Some(s.title),
            description: s.description,
            start: Some(s.start),
            end: Some(s.end),
            location: s.location,
            recurrence: s.recurrence,
        }
    }
}

pub struct FieldDescriptor {
    pub name: &'static str,
    pub get: fn(&Snapshot) -> Option<FieldValue>,
    pub set: fn(&mut SnapshotDraft, Option<FieldValue>) -> CalverResult<()>,
    pub equals: fn(&FieldValue, &FieldValue) -> bool,
    pub render: fn(&FieldValue, &Tz) -> String,
}

/// Tracked fields in schema declaration order. Diff output follows this order.
pub static TRACKED_FIELDS: [FieldDescriptor; 6] = [
    FieldDescriptor {
        name: "title",
        get: |s| Some(FieldValue::Text(s.title.clone())),
        set: |d, v| {
            d.title = as_text(v)?;
            Ok(())
        },
        equals: exact,
        render: render_value,
    },
    FieldDescriptor {
        name: "description",
        get: |s| s.description.clone().map(FieldValue::Text),
        set: |d, v| {
            d.description = as_text(v)?;
            Ok(())
        },
        equals: exact,
        render: render_value,
    },
    FieldDescriptor {
        name: "start",
        get: |s| Some(FieldValue::Instant(s.start)),
        set: |d, v| {
            d.start = as_instant(v)?;
            Ok(())
        },
        equals: same_instant,
        render: render_value,
    },
    FieldDescriptor {
        name: "end",
        get: |s| Some(FieldValue::Instant(s.end)),
        set: |d, v| {
            d.end = as_instant(v)?;
            Ok(())
        },
        equals: same_instant,
        render: render_value,
    },
    FieldDescriptor {
        name: "location",
        get: |s| s.location.clone().map(FieldValue::Text),
        set: |d, v| {
            d.location = as_text(v)?;
            Ok(())
        },
        equals: exact,
        render: render_value,
    },
    FieldDescriptor {
        name: "recurrence",
        get: |s| s.recurrence.clone().map(FieldValue::Recurrence),
        set: |d, v| {
            d.recurrence = as_recurrence(v)?;
            Ok(())
        },
        equals: exact,
        render: render_value,
    },
];

pub fn descriptor(name: &str) -> Option<&'static FieldDescriptor> {
    TRACKED_FIELDS.iter().find(|f| f.name == name)
}

fn exact(a: &FieldValue, b: &FieldValue) -> bool {
    a == b
}

/// Two instants are equal when they denote the same point in time.
fn same_instant(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Instant(a), FieldValue::Instant(b)) => a.timestamp() == b.timestamp()
            && a.timestamp_subsec_nanos() == b.timestamp_subsec_nanos(),
        _ => a == b,
    }
}

fn render_value(value: &FieldValue, tz: &Tz) -> String {
    match value {
        FieldValue::Text(s) => format!("\"{}\"", s),
        FieldValue::Instant(dt) => dt.with_timezone(tz).format("%Y-%m-%d %H:%M %Z").to_string(),
        FieldValue::Recurrence(pattern) => pattern.to_string(),
    }
}

fn mismatch(expected: &str, value: &FieldValue) -> CalverError {
    CalverError::Validation(format!("expected {expected}, got {value:?}"))
}

fn as_text(value: Option<FieldValue>) -> CalverResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(FieldValue::Text(s)) => Ok(Some(s)),
        Some(other) => Err(mismatch("text", &other)),
    }
}

fn as_instant(value: Option<FieldValue>) -> CalverResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(FieldValue::Instant(dt)) => Ok(Some(dt)),
        Some(other) => Err(mismatch("instant", &other)),
    }
}

fn as_recurrence(value: Option<FieldValue>) -> CalverResult<Option<RecurrencePattern>> {
    match value {
        None => Ok(None),
        Some(FieldValue::Recurrence(p)) => Ok(Some(p)),
        Some(other) => Err(mismatch("recurrence rule", &other)),
    }
}
