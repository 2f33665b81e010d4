use std::sync::Arc;

use anyhow::Result;
use calver_core::{CalverConfig, EventService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EventService>,
}

impl AppState {
    pub fn new(service: EventService) -> Self {
        AppState {
            service: Arc::new(service),
        }
    }

    pub fn from_config(config: &CalverConfig) -> Result<Self> {
        Ok(Self::new(EventService::from_config(config)?))
    }
}
