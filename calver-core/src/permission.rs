//! Role resolution and the fixed role/action policy.
//!
//! A user's effective role on an event is `Owner` when they own it, else the
//! role of their collaborator grant, else `None`. Ownership is never
//! represented as a grant, so it cannot be downgraded by sharing.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CalverError, CalverResult};
use crate::event::{EventId, EventRecord, UserId};
use crate::store::EventStore;

/// Effective role of a user on one event, totally ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    None,
    Viewer,
    Editor,
    Owner,
}

impl Role {
    /// The policy table. There is no per-event override.
    pub fn permits(self, action: Action) -> bool {
        match self {
            Role::Owner => true,
            Role::Editor => !matches!(action, Action::Share | Action::Delete),
            Role::Viewer => matches!(action, Action::View | Action::ViewHistory),
            Role::None => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::None => "none",
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        };
        f.write_str(s)
    }
}

/// A role that can be granted to a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantRole {
    Editor,
    Viewer,
}

impl From<GrantRole> for Role {
    fn from(role: GrantRole) -> Self {
        match role {
            GrantRole::Editor => Role::Editor,
            GrantRole::Viewer => Role::Viewer,
        }
    }
}

/// A collaborator grant, unique per (event, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub event_id: EventId,
    pub user_id: UserId,
    pub role: GrantRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    ViewHistory,
    EditFields,
    EditRecurrence,
    Share,
    Delete,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::View,
        Action::ViewHistory,
        Action::EditFields,
        Action::EditRecurrence,
        Action::Share,
        Action::Delete,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::View => "view",
            Action::ViewHistory => "view history of",
            Action::EditFields => "edit",
            Action::EditRecurrence => "edit recurrence of",
            Action::Share => "share",
            Action::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Resolve the effective role from an event record and the user's grant.
pub fn effective_role(record: &EventRecord, user: UserId, grant: Option<GrantRole>) -> Role {
    if record.owner == user {
        Role::Owner
    } else {
        grant.map(Role::from).unwrap_or(Role::None)
    }
}

/// Answers "can this user perform action X on this event", always against
/// the event's current grants.
#[derive(Clone)]
pub struct PermissionEvaluator {
    store: Arc<dyn EventStore>,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        PermissionEvaluator { store }
    }

    fn role_on(&self, user: UserId, record: &EventRecord) -> CalverResult<Role> {
        if record.owner == user {
            return Ok(Role::Owner);
        }
        let grant = self.store.grant(record.id, user)?;
        Ok(effective_role(record, user, grant))
    }

    pub fn resolve_role(&self, user: UserId, event: EventId) -> CalverResult<Role> {
        let record = self
            .store
            .event(event)?
            .ok_or_else(|| CalverError::event_not_found(event))?;
        self.role_on(user, &record)
    }

    /// Fails closed: a missing event, missing grant or store error denies.
    pub fn authorize(&self, user: UserId, event: EventId, action: Action) -> bool {
        match self.resolve_role(user, event) {
            Ok(role) => role.permits(action),
            Err(e) => {
                warn!(%user, %event, %action, error = %e, "authorization lookup failed, denying");
                false
            }
        }
    }

    /// Like [`authorize`](Self::authorize) but reports why, returning the
    /// event record when the action is allowed.
    pub fn require(
        &self,
        user: UserId,
        event: EventId,
        action: Action,
    ) -> CalverResult<EventRecord> {
        let record = self
            .store
            .event(event)?
            .ok_or_else(|| CalverError::event_not_found(event))?;
        let role = self.role_on(user, &record)?;
        if role.permits(action) {
            Ok(record)
        } else {
            Err(CalverError::Forbidden { action, event })
        }
    }
}
