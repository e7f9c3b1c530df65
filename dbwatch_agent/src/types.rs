//! Data types sent to subscribers over SSE / WebSocket.
//! Keep this module minimal and stable; it defines the wire format.

use serde::{Deserialize, Serialize};

/// A process runs "slow" once its current statement is older than this.
pub const SLOW_QUERY_SECS: u64 = 5;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// One row of the database's process list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub id: i64,
    // whole seconds since the current statement started; 0 when idle/unknown
    pub elapsed_seconds: u64,
    pub state: Option<String>,
    pub info: Option<String>,
}

impl ProcessInfo {
    pub fn is_slow(&self) -> bool {
        self.elapsed_seconds > SLOW_QUERY_SECS
    }
}

/// Immutable health snapshot. Build it through [`Status::connected`] or
/// [`Status::disconnected`] so the counter invariants hold.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub active_connections: u64,
    pub total_processes: u64,
    pub slow_queries: u64,
    pub max_connections: u64,
    #[serde(rename = "status")]
    pub connection_state: ConnectionState,
    // unix epoch millis
    pub timestamp: i64,
}

impl Status {
    /// Connected snapshot. `slow_queries` is derived from `processes` so it can
    /// never exceed `total_processes`.
    pub fn connected(
        active_connections: u64,
        processes: &[ProcessInfo],
        max_connections: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            active_connections,
            total_processes: processes.len() as u64,
            slow_queries: processes.iter().filter(|p| p.is_slow()).count() as u64,
            max_connections,
            connection_state: ConnectionState::Connected,
            timestamp,
        }
    }

    /// Disconnected snapshot: every counter is zero.
    pub fn disconnected(timestamp: i64) -> Self {
        Self {
            active_connections: 0,
            total_processes: 0,
            slow_queries: 0,
            max_connections: 0,
            connection_state: ConnectionState::Disconnected,
            timestamp,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// Events pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Status(Status),
    Log(String),
}

impl MonitorEvent {
    pub const STATUS: &'static str = "db-status";
    pub const LOG: &'static str = "db-log";

    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Status(_) => Self::STATUS,
            MonitorEvent::Log(_) => Self::LOG,
        }
    }

    /// Single-frame envelope used on the WebSocket endpoint.
    pub fn envelope_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            event: &'static str,
            data: &'a T,
        }
        match self {
            MonitorEvent::Status(s) => serde_json::to_string(&Envelope {
                event: self.name(),
                data: s,
            }),
            MonitorEvent::Log(line) => serde_json::to_string(&Envelope {
                event: self.name(),
                data: line,
            }),
        }
    }
}
