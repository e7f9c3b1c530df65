//! Change detection: only log when the interesting counters move.

use crate::types::{ProcessInfo, Status};

/// True when there is no previous snapshot or when active connections,
/// process count or slow query count differ. `max_connections` and
/// `timestamp` are ignored.
pub fn should_log(prev: Option<&Status>, curr: &Status) -> bool {
    match prev {
        None => true,
        Some(p) => {
            p.active_connections != curr.active_connections
                || p.total_processes != curr.total_processes
                || p.slow_queries != curr.slow_queries
        }
    }
}

pub fn summary_line(s: &Status) -> String {
    format!(
        "status update - active connections: {}, processes: {}, slow queries: {}",
        s.active_connections, s.total_processes, s.slow_queries
    )
}

pub fn slow_query_line(p: &ProcessInfo) -> String {
    format!(
        "slow query - ID: {}, Time: {}s, State: {}",
        p.id,
        p.elapsed_seconds,
        p.state.as_deref().unwrap_or("NULL")
    )
}

/// Lines to emit for `curr`: empty when nothing changed, otherwise the summary
/// followed by one line per slow process.
pub fn change_lines(prev: Option<&Status>, curr: &Status, slow: &[ProcessInfo]) -> Vec<String> {
    if !should_log(prev, curr) {
        return Vec::new();
    }
    let mut lines = Vec::with_capacity(1 + slow.len());
    lines.push(summary_line(curr));
    if curr.slow_queries > 0 {
        lines.extend(slow.iter().map(slow_query_line));
    }
    lines
}
