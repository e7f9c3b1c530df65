//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::broadcast::Broadcaster;
use crate::source::{SourceError, StatsSession, StatsSource};
use crate::types::ProcessInfo;

/// Scripted answers for one poll cycle.
#[derive(Debug, Clone)]
pub struct CycleScript {
    pub active: Result<u64, String>,
    pub processes: Result<Vec<ProcessInfo>, String>,
    pub max: Result<u64, String>,
}

impl CycleScript {
    /// `procs` idle processes plus `slow` processes running for a minute.
    pub fn ok(active: u64, procs: u64, slow: u64, max: u64) -> Self {
        let processes = (0..procs)
            .map(|i| ProcessInfo {
                id: i as i64 + 1,
                elapsed_seconds: if i < slow { 60 } else { 0 },
                state: Some(if i < slow { "active" } else { "idle" }.into()),
                info: None,
            })
            .collect();
        Self {
            active: Ok(active),
            processes: Ok(processes),
            max: Ok(max),
        }
    }

    pub fn failing_process_list(msg: &str) -> Self {
        Self {
            processes: Err(msg.to_string()),
            ..Self::ok(1, 0, 0, 100)
        }
    }
}

#[derive(Default)]
struct Script {
    probes: VecDeque<Result<(), String>>,
    cycles: VecDeque<CycleScript>,
    last_cycle: Option<CycleScript>,
}

/// What the rest of the monitor looked like when `close` was called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSnapshot {
    /// Subscribers still registered on the watched hub.
    pub subscribers: Option<usize>,
    /// Contents of the watched log file.
    pub log: Option<String>,
    /// Sessions acquired so far.
    pub acquired: usize,
}

#[derive(Default)]
struct CloseWatch {
    hub: Option<Weak<Broadcaster>>,
    log: Option<PathBuf>,
    seen: Option<CloseSnapshot>,
}

#[derive(Default)]
struct Counters {
    probes: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory [`StatsSource`]. Probes succeed and cycles report an empty
/// database unless scripted otherwise; the last scripted cycle repeats.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
    close_watch: Arc<Mutex<CloseWatch>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_probe(&self, result: Result<(), &str>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .probes
            .push_back(result.map_err(str::to_string));
        self
    }

    pub fn push_cycle(&self, cycle: CycleScript) -> &Self {
        self.script.lock().unwrap().cycles.push_back(cycle);
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.counters.probes.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Record the hub's subscriber count and the log file's contents at the
    /// moment `close` runs.
    pub fn watch_close(&self, hub: &Arc<Broadcaster>, log: Option<&Path>) {
        let mut w = self.close_watch.lock().unwrap();
        w.hub = Some(Arc::downgrade(hub));
        w.log = log.map(Path::to_path_buf);
    }

    pub fn close_snapshot(&self) -> Option<CloseSnapshot> {
        self.close_watch.lock().unwrap().seen.clone()
    }
}

#[async_trait]
impl StatsSource for ScriptedSource {
    async fn probe(&self) -> Result<(), SourceError> {
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().probes.pop_front();
        next.unwrap_or(Ok(())).map_err(SourceError::Connect)
    }

    async fn acquire(&self) -> Result<Box<dyn StatsSession>, SourceError> {
        let cycle = {
            let mut s = self.script.lock().unwrap();
            match s.cycles.pop_front() {
                Some(c) => {
                    s.last_cycle = Some(c.clone());
                    c
                }
                None => s
                    .last_cycle
                    .clone()
                    .unwrap_or_else(|| CycleScript::ok(0, 0, 0, 0)),
            }
        };
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            cycle,
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        let mut w = self.close_watch.lock().unwrap();
        let snapshot = CloseSnapshot {
            subscribers: w
                .hub
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|hub| hub.subscriber_count()),
            log: w
                .log
                .as_ref()
                .and_then(|path| std::fs::read_to_string(path).ok()),
            acquired: self.acquired(),
        };
        w.seen = Some(snapshot);
        Ok(())
    }
}

struct ScriptedSession {
    cycle: CycleScript,
    counters: Arc<Counters>,
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatsSession for ScriptedSession {
    async fn active_connections(&mut self) -> Result<u64, SourceError> {
        self.cycle.active.clone().map_err(SourceError::Query)
    }

    async fn process_list(&mut self) -> Result<Vec<ProcessInfo>, SourceError> {
        self.cycle.processes.clone().map_err(SourceError::Query)
    }

    async fn max_connections(&mut self) -> Result<u64, SourceError> {
        self.cycle.max.clone().map_err(SourceError::Query)
    }
}
