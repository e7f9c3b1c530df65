//! Interval ticker that feeds the monitor's command channel.
//!
//! Each start bumps a generation number carried by every tick. `stop` aborts
//! the ticker task and bumps the generation again, so a tick that was already
//! queued when `stop` returned is recognised as stale and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

pub struct Scheduler<C: Send + 'static> {
    period: Duration,
    // fire the first tick right away instead of after one period
    immediate: bool,
    generation: u64,
    task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<C>,
    make: fn(u64) -> C,
}

impl<C: Send + 'static> Scheduler<C> {
    pub fn new(
        period: Duration,
        immediate: bool,
        tx: mpsc::UnboundedSender<C>,
        make: fn(u64) -> C,
    ) -> Self {
        Self {
            period,
            immediate,
            generation: 0,
            task: None,
            tx,
            make,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match self.task {
            Some(_) => SchedulerState::Running,
            None => SchedulerState::Stopped,
        }
    }

    /// Start ticking. No-op (returns false) when already running.
    pub fn start(&mut self) -> bool {
        if self.task.is_some() {
            return false;
        }
        self.generation += 1;
        let gen = self.generation;
        let tx = self.tx.clone();
        let make = self.make;
        let period = self.period;
        let first = if self.immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(make(gen)).is_err() {
                    break;
                }
            }
        }));
        true
    }

    /// Stop ticking. Ticks already queued become stale. Returns false when
    /// already stopped.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                self.generation += 1;
                true
            }
            None => false,
        }
    }

    /// Whether a tick stamped with `gen` should still be acted on.
    pub fn is_current(&self, gen: u64) -> bool {
        self.task.is_some() && gen == self.generation
    }
}

impl<C: Send + 'static> Drop for Scheduler<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
