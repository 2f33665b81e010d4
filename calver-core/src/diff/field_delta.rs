use std::fmt;

use chrono_tz::Tz;
use serde::Serialize;

use crate::diff::field::{FieldValue, descriptor};
use crate::diff::ChangeKind;

/// One field-level difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    pub field: &'static str,
    pub kind: ChangeKind,
    pub old: Option<FieldValue>,
    pub new: Option<FieldValue>,
}

impl FieldDelta {
    /// The same change seen from the other side: old and new swapped,
    /// added and removed swapped.
    pub fn invert(&self) -> FieldDelta {
        FieldDelta {
            field: self.field,
            kind: self.kind.invert(),
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }

    /// Human-readable one-liner, instants shown in `tz`.
    pub fn render(&self, tz: &Tz) -> String {
        let Some(field) = descriptor(self.field) else {
            return format!("{} {}", self.kind, self.field);
        };
        let show = |v: &Option<FieldValue>| {
            v.as_ref()
                .map(|v| (field.render)(v, tz))
                .unwrap_or_else(|| "(none)".to_string())
        };
        match self.kind {
            ChangeKind::Added => format!("{} {}: {}", self.kind, self.field, show(&self.new)),
            ChangeKind::Removed => format!("{} {}: {}", self.kind, self.field, show(&self.old)),
            ChangeKind::Modified => format!(
                "{} {}: {} → {}",
                self.kind,
                self.field,
                show(&self.old),
                show(&self.new)
            ),
        }
    }
}

impl fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&Tz::UTC))
    }
}
