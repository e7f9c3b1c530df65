//! Stats source seam: the database the monitor polls.
//!
//! The monitor never talks SQL itself. It asks a [`StatsSource`] for a liveness
//! probe or for a [`StatsSession`], one reserved connection that answers the
//! three per-cycle queries from a single consistent view. Sessions hand their
//! connection back to the pool when dropped.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ProcessInfo;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("unexpected result for {what}: {detail}")]
    Decode { what: &'static str, detail: String },
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("connection pool exhausted: {in_use} of {size} connections in use")]
    PoolExhausted { in_use: usize, size: usize },
    #[error("{0} connection(s) still checked out while closing pool")]
    PoolBusy(usize),
}

#[async_trait]
pub trait StatsSource: Send + Sync + 'static {
    /// Cheap liveness check (e.g. `SELECT 1`).
    async fn probe(&self) -> Result<(), SourceError>;

    /// Reserve one pooled connection for a poll cycle.
    async fn acquire(&self) -> Result<Box<dyn StatsSession>, SourceError>;

    /// Drain idle connections and refuse further acquires.
    async fn close(&self) -> Result<(), SourceError>;
}

#[async_trait]
pub trait StatsSession: Send {
    async fn active_connections(&mut self) -> Result<u64, SourceError>;
    async fn process_list(&mut self) -> Result<Vec<ProcessInfo>, SourceError>;
    async fn max_connections(&mut self) -> Result<u64, SourceError>;
}
