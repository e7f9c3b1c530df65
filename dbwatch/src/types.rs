//! Types that mirror the agent's JSON schema.

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub active_connections: u64,
    pub total_processes: u64,
    pub slow_queries: u64,
    pub max_connections: u64,
    pub status: ConnectionState,
    // unix millis
    pub timestamp: i64,
}

/// One WebSocket frame from the agent.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum AgentEvent {
    #[serde(rename = "db-status")]
    Status(Status),
    #[serde(rename = "db-log")]
    Log(String),
}
