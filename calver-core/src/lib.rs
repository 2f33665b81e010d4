//! Core of the calver event service.
//!
//! Events are kept as an append-only ledger of whole snapshots. On top of
//! that ledger this crate provides:
//! - role-based permissions (`permission`)
//! - field-level diffs and changelogs (`diff`, `changelog`)
//! - recurrence expansion for date-range listings (`recurrence`)
//! - the mutation coordinator and the `EventService` façade

pub mod cache;
pub mod changelog;
pub mod config;
pub mod coordinator;
pub mod date_range;
pub mod diff;
pub mod error;
pub mod event;
pub mod notify;
pub mod permission;
pub mod recurrence;
pub mod service;
pub mod store;

pub use self::config::CalverConfig;
pub use error::{CalverError, CalverResult};
pub use event::*;
pub use permission::{Action, Grant, GrantRole, Role};
pub use service::EventService;
