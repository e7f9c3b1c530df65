//! Shared agent state handed to every axum handler.

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::monitor::MonitorHandle;

#[derive(Clone)]
pub struct AppState {
    pub monitor: MonitorHandle,
    // subscriber registry + last-known snapshot
    pub hub: Arc<Broadcaster>,
}

impl AppState {
    pub fn new(monitor: MonitorHandle) -> Self {
        let hub = Arc::clone(monitor.hub());
        Self { monitor, hub }
    }
}
