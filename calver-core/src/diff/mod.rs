//! Field-level structural diffs between event snapshots.
//!
//! [`diff`] is a pure function of two snapshots: it does not care whether
//! they are adjacent versions, and its output order is the order of
//! [`TRACKED_FIELDS`].

mod change_kind;
mod field;
mod field_delta;

pub use change_kind::ChangeKind;
pub use field::{FieldDescriptor, FieldValue, SnapshotDraft, TRACKED_FIELDS, descriptor};
pub use field_delta::FieldDelta;

use crate::error::{CalverError, CalverResult};
use crate::event::Snapshot;

fn diff_from(old: Option<&Snapshot>, new: &Snapshot) -> Vec<FieldDelta> {
    TRACKED_FIELDS
        .iter()
        .filter_map(|field| {
            let before = old.and_then(|s| (field.get)(s));
            let after = (field.get)(new);
            let kind = match (&before, &after) {
                (None, None) => return None,
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(a), Some(b)) if (field.equals)(a, b) => return None,
                (Some(_), Some(_)) => ChangeKind::Modified,
            };
            Some(FieldDelta {
                field: field.name,
                kind,
                old: before,
                new: after,
            })
        })
        .collect()
}

/// Deltas turning `old` into `new`.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<FieldDelta> {
    diff_from(Some(old), new)
}

/// Every present field of `snapshot`, marked as added.
pub fn initial(snapshot: &Snapshot) -> Vec<FieldDelta> {
    diff_from(None, snapshot)
}

/// Reverse a delta sequence, giving the diff in the other direction.
pub fn invert(deltas: &[FieldDelta]) -> Vec<FieldDelta> {
    deltas.iter().map(FieldDelta::invert).collect()
}

/// Apply deltas onto a draft, setting each touched field to its new value.
pub fn apply(draft: &mut SnapshotDraft, deltas: &[FieldDelta]) -> CalverResult<()> {
    for delta in deltas {
        let field = descriptor(delta.field).ok_or_else(|| {
            CalverError::Validation(format!("unknown field '{}'", delta.field))
        })?;
        (field.set)(draft, delta.new.clone())?;
    }
    Ok(())
}
