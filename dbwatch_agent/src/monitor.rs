//! The monitor: owns the connectivity flag, sampler, broadcaster, log sink and
//! both tickers, and runs every poll cycle from one dispatch task.
//!
//! Timers and the stats source's out-of-band error signal never touch monitor
//! state directly; they post [`Command`]s that [`Monitor::run`] consumes in
//! order. A cycle is: connectivity check, sample, change detection, log lines,
//! then the `db-status` broadcast.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, DEFAULT_SUBSCRIBER_BUFFER};
use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_INTERVAL};
use crate::detector::change_lines;
use crate::guard::{ConnectivityGuard, GuardOutcome};
use crate::logsink::{format_line, LogSink};
use crate::sampler::{Sample, StatusSampler};
use crate::scheduler::{Scheduler, SchedulerState};
use crate::source::StatsSource;
use crate::types::{MonitorEvent, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub subscriber_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

#[derive(Debug)]
pub enum Command {
    /// Poll ticker fired (generation).
    Tick(u64),
    /// Reconnect ticker fired (generation).
    Retry(u64),
    /// Out-of-band fatal error from the stats source.
    SourceError(String),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable access to a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<Command>,
    hub: Arc<Broadcaster>,
}

impl MonitorHandle {
    pub fn hub(&self) -> &Arc<Broadcaster> {
        &self.hub
    }

    pub fn report_source_error(&self, message: impl Into<String>) {
        let _ = self.tx.send(Command::SourceError(message.into()));
    }

    /// Ask the monitor to shut down and wait until it has.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

pub struct Monitor {
    source: Arc<dyn StatsSource>,
    guard: ConnectivityGuard,
    sampler: StatusSampler,
    hub: Arc<Broadcaster>,
    sink: LogSink,
    poll: Scheduler<Command>,
    retry: Scheduler<Command>,
    // last successful poll; the hub's slot holds the current state instead
    baseline: Option<Status>,
    ever_connected: bool,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Monitor {
    pub fn new(source: Arc<dyn StatsSource>, sink: LogSink, cfg: MonitorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            source,
            guard: ConnectivityGuard::new(),
            sampler: StatusSampler::new(),
            hub: Arc::new(Broadcaster::new(cfg.subscriber_buffer)),
            sink,
            poll: Scheduler::new(cfg.poll_interval, true, tx.clone(), Command::Tick),
            retry: Scheduler::new(cfg.retry_interval, false, tx.clone(), Command::Retry),
            baseline: None,
            ever_connected: false,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            tx: self.tx.clone(),
            hub: Arc::clone(&self.hub),
        }
    }

    pub fn hub(&self) -> &Arc<Broadcaster> {
        &self.hub
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.poll.state()
    }

    pub fn retry_state(&self) -> SchedulerState {
        self.retry.state()
    }

    pub fn is_connected(&self) -> bool {
        self.guard.is_connected()
    }

    /// Timestamp, append to the sink, mirror to tracing and subscribers.
    pub fn log(&mut self, message: &str) {
        let line = format_line(OffsetDateTime::now_utc(), message);
        info!("{message}");
        self.sink.append(&line);
        self.hub.broadcast(MonitorEvent::Log(line));
    }

    /// Gate for every poll. Probes only while disconnected; a successful probe
    /// logs the (re)connection and starts the poll ticker, whose first cycle
    /// runs immediately.
    pub async fn ensure_connection(&mut self) -> bool {
        match self.guard.check(self.source.as_ref()).await {
            GuardOutcome::AlreadyConnected => true,
            GuardOutcome::Recovered => {
                let msg = if self.ever_connected {
                    "database connection recovered"
                } else {
                    "database connection established"
                };
                self.ever_connected = true;
                self.log(msg);
                self.retry.stop();
                self.poll.start();
                true
            }
            GuardOutcome::Failed(err) => {
                let msg = if self.guard.probes() == 1 {
                    format!("initial connection failed: {err}")
                } else {
                    format!("database reconnect attempt failed: {err}")
                };
                self.log(&msg);
                false
            }
        }
    }

    /// One sample: connectivity gate, then the three queries on one session.
    /// A query failure flips the flag and yields a Disconnected snapshot.
    pub async fn sample(&mut self) -> Sample {
        if !self.ensure_connection().await {
            return Sample::disconnected(self.sampler.disconnected(), None);
        }
        match self.sampler.query(self.source.as_ref()).await {
            Ok((status, slow)) => Sample {
                status,
                slow,
                error: None,
            },
            Err(e) => {
                self.guard.mark_disconnected();
                Sample::disconnected(self.sampler.disconnected(), Some(e.to_string()))
            }
        }
    }

    /// Full cycle: sample, log changes, broadcast `db-status`.
    pub async fn run_cycle(&mut self) -> Status {
        let sample = self.sample().await;

        if sample.status.is_connected() {
            let prev = self.baseline.replace(sample.status.clone());
            for line in change_lines(prev.as_ref(), &sample.status, &sample.slow) {
                self.log(&line);
            }
            for p in &sample.slow {
                warn!(
                    id = p.id,
                    elapsed_secs = p.elapsed_seconds,
                    state = p.state.as_deref().unwrap_or("NULL"),
                    info = p.info.as_deref().unwrap_or(""),
                    "slow query detected"
                );
            }
            self.hub.publish_status(sample.status.clone());
        } else {
            if let Some(err) = &sample.error {
                self.log(&format!("status check failed: {err}"));
                self.poll.stop();
                self.retry.start();
            }
            self.hub.publish_status(sample.status.clone());
        }
        sample.status
    }

    /// Fatal error reported by the source outside a poll cycle.
    pub fn on_source_error(&mut self, message: &str) {
        self.log(&format!("database pool error: {message}"));
        self.guard.mark_disconnected();
        self.poll.stop();
        self.retry.start();
        let status = self.sampler.disconnected();
        self.hub.publish_status(status);
    }

    /// Handle one queued command. Returns false once shut down.
    pub async fn step(&mut self) -> bool {
        let Some(cmd) = self.rx.recv().await else {
            self.shutdown().await;
            return false;
        };
        match cmd {
            Command::Tick(gen) if self.poll.is_current(gen) => {
                self.run_cycle().await;
            }
            Command::Retry(gen) if self.retry.is_current(gen) => {
                self.ensure_connection().await;
            }
            Command::Tick(gen) | Command::Retry(gen) => {
                debug!("dropping stale tick (generation {gen})");
            }
            Command::SourceError(message) => self.on_source_error(&message),
            Command::Shutdown(ack) => {
                self.shutdown().await;
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    /// Initial connection attempt, then the dispatch loop until shutdown.
    pub async fn run(mut self) {
        if !self.ensure_connection().await {
            self.retry.start();
        }
        while self.step().await {}
    }

    /// Stop tickers, close subscribers, close the log, drain the pool.
    /// Failures are reported and never abort the sequence. The log is closed
    /// before the pool drains, so a drain error only reaches `tracing`.
    pub async fn shutdown(&mut self) {
        self.poll.stop();
        self.retry.stop();
        self.log("monitor shutting down");

        let closed = self.hub.close_all();
        debug!("closed {closed} subscriber channel(s)");

        if let Err(e) = self.sink.close() {
            warn!("failed to close status log: {e}");
        }

        match self.source.close().await {
            Ok(()) => info!("database pool closed"),
            Err(e) => warn!("error while closing database pool: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{CycleScript, ScriptedSource};
    use crate::types::ConnectionState;

    fn monitor(src: &ScriptedSource) -> Monitor {
        Monitor::new(
            Arc::new(src.clone()),
            LogSink::disabled(),
            MonitorConfig {
                poll_interval: Duration::from_secs(3),
                retry_interval: Duration::from_secs(5),
                subscriber_buffer: 256,
            },
        )
    }

    fn drain(sub: &mut crate::broadcast::Subscription) -> Vec<MonitorEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    fn logs(events: &[MonitorEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Log(l) => l.split_once(" - ").map(|(_, m)| m),
                _ => None,
            })
            .collect()
    }

    fn statuses(events: &[MonitorEvent]) -> Vec<&Status> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_cycles_log_once_but_always_broadcast() {
        let src = ScriptedSource::new();
        src.push_cycle(CycleScript::ok(5, 10, 0, 100))
            .push_cycle(CycleScript::ok(5, 10, 0, 100))
            .push_cycle(CycleScript::ok(5, 10, 0, 100))
            .push_cycle(CycleScript::ok(6, 10, 0, 100));
        let mut m = monitor(&src);
        assert!(m.ensure_connection().await);
        // baseline
        m.run_cycle().await;

        let mut sub = m.hub().register();
        drain(&mut sub);
        for _ in 0..3 {
            m.run_cycle().await;
        }
        let events = drain(&mut sub);
        assert_eq!(
            logs(&events),
            vec!["status update - active connections: 6, processes: 10, slow queries: 0"]
        );
        assert_eq!(statuses(&events).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_logs_summary_and_slow_queries() {
        let src = ScriptedSource::new();
        src.push_cycle(CycleScript::ok(3, 4, 2, 100));
        let mut m = monitor(&src);
        let mut sub = m.hub().register();
        m.ensure_connection().await;
        let status = m.run_cycle().await;
        assert_eq!(status.slow_queries, 2);

        let events = drain(&mut sub);
        assert_eq!(
            logs(&events),
            vec![
                "database connection established",
                "status update - active connections: 3, processes: 4, slow queries: 2",
                "slow query - ID: 1, Time: 60s, State: active",
                "slow query - ID: 2, Time: 60s, State: active",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_then_recovery_starts_scheduler() {
        let src = ScriptedSource::new();
        src.push_probe(Err("refused"))
            .push_probe(Err("refused"))
            .push_probe(Ok(()));
        src.push_cycle(CycleScript::ok(2, 2, 0, 100));
        let mut m = monitor(&src);

        assert!(!m.ensure_connection().await);
        assert_eq!(m.scheduler_state(), SchedulerState::Stopped);
        assert!(!m.ensure_connection().await);
        assert_eq!(m.scheduler_state(), SchedulerState::Stopped);
        assert!(m.ensure_connection().await);
        assert_eq!(m.scheduler_state(), SchedulerState::Running);

        let mut sub = m.hub().register();
        let t0 = tokio::time::Instant::now();
        assert!(m.step().await);
        assert!(t0.elapsed() < Duration::from_secs(3));
        let events = drain(&mut sub);
        assert_eq!(statuses(&events).len(), 1);
        assert!(statuses(&events)[0].is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn query_failure_disconnects_and_releases() {
        let src = ScriptedSource::new();
        src.push_cycle(CycleScript::ok(5, 10, 0, 100))
            .push_cycle(CycleScript::failing_process_list("connection reset"));
        let mut m = monitor(&src);
        m.ensure_connection().await;
        m.run_cycle().await;

        let status = m.run_cycle().await;
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert_eq!(
            (
                status.active_connections,
                status.total_processes,
                status.slow_queries,
                status.max_connections
            ),
            (0, 0, 0, 0)
        );
        assert!(!m.is_connected());
        assert_eq!(src.acquired(), 2);
        assert_eq!(src.released(), 2);
        assert_eq!(m.scheduler_state(), SchedulerState::Stopped);
        assert_eq!(m.retry_state(), SchedulerState::Running);
        assert_eq!(m.hub().last_status(), Some(status));
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_joining_during_outage_sees_disconnected() {
        let src = ScriptedSource::new();
        src.push_cycle(CycleScript::ok(5, 10, 0, 100))
            .push_cycle(CycleScript::failing_process_list("connection reset"));
        let mut m = monitor(&src);
        m.ensure_connection().await;
        m.run_cycle().await;
        m.run_cycle().await;
        assert!(!m.is_connected());

        let mut late = m.hub().register();
        match late.try_recv() {
            Some(MonitorEvent::Status(s)) => {
                assert_eq!(s.connection_state, ConnectionState::Disconnected);
                assert_eq!(
                    (s.active_connections, s.total_processes, s.slow_queries),
                    (0, 0, 0)
                );
            }
            other => panic!("expected disconnected replay, got {other:?}"),
        }
        assert!(late.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pool_error_replaces_replayed_snapshot() {
        let src = ScriptedSource::new();
        src.push_cycle(CycleScript::ok(5, 10, 0, 100));
        let mut m = monitor(&src);
        m.ensure_connection().await;
        m.run_cycle().await;
        assert!(m.hub().last_status().unwrap().is_connected());

        m.on_source_error("server closed the connection unexpectedly");
        let last = m.hub().last_status().unwrap();
        assert!(!last.is_connected());
        assert_eq!(last.active_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_compares_against_last_successful_poll() {
        let src = ScriptedSource::new();
        src.push_cycle(CycleScript::ok(5, 10, 0, 100))
            .push_cycle(CycleScript::failing_process_list("connection reset"))
            .push_cycle(CycleScript::ok(5, 10, 0, 100));
        let mut m = monitor(&src);
        m.ensure_connection().await;
        m.run_cycle().await;
        m.run_cycle().await;

        let mut sub = m.hub().register();
        drain(&mut sub);
        let status = m.run_cycle().await;
        assert!(status.is_connected());
        let events = drain(&mut sub);
        // unchanged counters after the outage: no status update line
        assert_eq!(logs(&events), vec!["database connection recovered"]);
        assert_eq!(m.hub().last_status(), Some(status));
    }

    #[tokio::test(start_paused = true)]
    async fn only_first_failed_attempt_is_initial() {
        let src = ScriptedSource::new();
        src.push_probe(Err("refused"))
            .push_probe(Err("refused"))
            .push_probe(Err("refused"));
        let mut m = monitor(&src);
        let mut sub = m.hub().register();
        for _ in 0..3 {
            assert!(!m.ensure_connection().await);
        }
        let events = drain(&mut sub);
        assert_eq!(
            logs(&events),
            vec![
                "initial connection failed: connect failed: refused",
                "database reconnect attempt failed: connect failed: refused",
                "database reconnect attempt failed: connect failed: refused",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_gate_skips_queries() {
        let src = ScriptedSource::new();
        src.push_probe(Err("down"));
        let mut m = monitor(&src);
        let sample = m.sample().await;
        assert!(!sample.status.is_connected());
        assert_eq!(src.acquired(), 0);
        assert!(sample.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn source_error_stops_polling_until_retry_succeeds() {
        let src = ScriptedSource::new();
        let mut m = monitor(&src);
        m.ensure_connection().await;
        assert_eq!(m.scheduler_state(), SchedulerState::Running);

        m.handle().report_source_error("terminating connection due to administrator command");
        // drain the immediate tick queued by start, then the error
        loop {
            m.step().await;
            if !m.is_connected() {
                break;
            }
        }
        assert_eq!(m.scheduler_state(), SchedulerState::Stopped);
        assert_eq!(m.retry_state(), SchedulerState::Running);

        // retry ticker fires after retry_interval and the probe succeeds
        let t0 = tokio::time::Instant::now();
        while !m.is_connected() {
            m.step().await;
        }
        assert_eq!(t0.elapsed(), Duration::from_secs(5));
        assert_eq!(m.scheduler_state(), SchedulerState::Running);
        assert_eq!(m.retry_state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ticks_after_stop_do_not_poll() {
        let src = ScriptedSource::new();
        let mut m = monitor(&src);
        m.ensure_connection().await;
        tokio::task::yield_now().await;
        m.poll.stop();
        let before = src.acquired();
        // the immediate tick may already be queued; it must be ignored
        let _ = tokio::time::timeout(Duration::from_secs(30), m.step()).await;
        assert_eq!(src.acquired(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_everything_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.log");
        let src = ScriptedSource::new();
        let mut m = Monitor::new(
            Arc::new(src.clone()),
            LogSink::open(&path).unwrap(),
            MonitorConfig::default(),
        );
        src.watch_close(m.hub(), Some(&path));
        let mut sub = m.hub().register();

        m.ensure_connection().await;
        // let the immediate tick reach the queue
        tokio::task::yield_now().await;
        m.shutdown().await;

        assert_eq!(m.scheduler_state(), SchedulerState::Stopped);
        assert_eq!(m.retry_state(), SchedulerState::Stopped);
        let seen = src.close_snapshot().expect("pool closed");
        assert_eq!(seen.subscribers, Some(0));
        assert!(seen.log.unwrap().ends_with(" - monitor shutting down\n"));
        assert_eq!(seen.acquired, 0);

        // a tick queued before the stop is stale and never polls
        let _ = tokio::time::timeout(Duration::from_secs(30), m.step()).await;
        assert_eq!(src.acquired(), 0);

        let events = drain(&mut sub);
        assert_eq!(
            logs(&events),
            vec!["database connection established", "monitor shutting down"]
        );
        assert_eq!(sub.recv().await, None);
        assert_eq!(src.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_via_handle_ends_run_loop() {
        let src = ScriptedSource::new();
        let m = monitor(&src);
        let handle = m.handle();
        let mut sub = handle.hub().register();
        let task = tokio::spawn(m.run());

        // first status arrives from the immediate cycle
        loop {
            match sub.recv().await {
                Some(MonitorEvent::Status(_)) => break,
                Some(_) => continue,
                None => panic!("closed early"),
            }
        }
        handle.shutdown().await;
        task.await.unwrap();

        let rest: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert!(logs(&rest).contains(&"monitor shutting down"));
        assert_eq!(sub.recv().await, None);
        assert_eq!(src.close_calls(), 1);
    }
}
