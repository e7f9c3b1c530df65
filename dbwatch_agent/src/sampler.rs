//! Status sampler: one poll cycle against the stats source.
//!
//! All three queries run on a single reserved session so the active
//! connection count and the process list come from the same view. The session
//! goes back to the pool when it drops, on every path out of [`StatusSampler::query`].

use time::OffsetDateTime;

use crate::source::{SourceError, StatsSource};
use crate::types::{ProcessInfo, Status};

/// Result of one cycle: the snapshot, the slow processes behind
/// `slow_queries`, and the error that aborted the cycle if any.
#[derive(Debug, Clone)]
pub struct Sample {
    pub status: Status,
    pub slow: Vec<ProcessInfo>,
    pub error: Option<String>,
}

impl Sample {
    pub fn disconnected(status: Status, error: Option<String>) -> Self {
        Self {
            status,
            slow: Vec::new(),
            error,
        }
    }
}

#[derive(Debug, Default)]
pub struct StatusSampler {
    last_ts: i64,
}

impl StatusSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current unix millis, never earlier than the previous stamp.
    pub fn stamp(&mut self) -> i64 {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        self.last_ts = self.last_ts.max(now);
        self.last_ts
    }

    pub fn disconnected(&mut self) -> Status {
        Status::disconnected(self.stamp())
    }

    /// Run the three queries on one session. Any failure aborts the cycle.
    pub async fn query(
        &mut self,
        source: &dyn StatsSource,
    ) -> Result<(Status, Vec<ProcessInfo>), SourceError> {
        let mut session = source.acquire().await?;
        let active = session.active_connections().await?;
        let processes = session.process_list().await?;
        let max = session.max_connections().await?;
        drop(session);

        let status = Status::connected(active, &processes, max, self.stamp());
        let slow = processes.into_iter().filter(ProcessInfo::is_slow).collect();
        Ok((status, slow))
    }
}
