//! Connectivity guard: the single gate in front of every poll.

use tracing::debug;

use crate::source::StatsSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Flag was already set; no probe issued.
    AlreadyConnected,
    /// Probe succeeded and the flag flipped to connected.
    Recovered,
    /// Probe failed; flag stays disconnected.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct ConnectivityGuard {
    connected: bool,
    probes: u64,
}

impl ConnectivityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of liveness probes issued so far.
    pub fn probes(&self) -> u64 {
        self.probes
    }

    /// Flip to disconnected. Returns whether the flag was set before.
    pub fn mark_disconnected(&mut self) -> bool {
        std::mem::replace(&mut self.connected, false)
    }

    pub async fn check(&mut self, source: &dyn StatsSource) -> GuardOutcome {
        if self.connected {
            return GuardOutcome::AlreadyConnected;
        }
        self.probes += 1;
        match source.probe().await {
            Ok(()) => {
                self.connected = true;
                GuardOutcome::Recovered
            }
            Err(e) => {
                debug!("liveness probe failed: {e}");
                GuardOutcome::Failed(e.to_string())
            }
        }
    }
}
