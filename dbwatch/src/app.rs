//! Follow loop: connect, print events as they arrive, reconnect on loss.

use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::sleep;

use crate::types::{AgentEvent, ConnectionState, Status};
use crate::ws::{connect, next_event};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub fn format_status(s: &Status) -> String {
    let at = DateTime::from_timestamp_millis(s.timestamp)
        .map(|d| d.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".into());
    match s.status {
        ConnectionState::Disconnected => format!("[{at}] DISCONNECTED"),
        ConnectionState::Connected => {
            let pct = if s.max_connections > 0 {
                s.active_connections as f64 * 100.0 / s.max_connections as f64
            } else {
                0.0
            };
            format!(
                "[{at}] connected  active {}/{} ({pct:.0}%)  processes {}  slow {}",
                s.active_connections, s.max_connections, s.total_processes, s.slow_queries
            )
        }
    }
}

pub struct App {
    last_status: Option<Status>,
    // exit after the first status
    once: bool,
    // print only status lines that differ from the previous one
    changes_only: bool,
}

impl App {
    pub fn new(once: bool, changes_only: bool) -> Self {
        Self {
            last_status: None,
            once,
            changes_only,
        }
    }

    /// Render one event; returns the line to print, if any.
    pub fn on_event(&mut self, ev: AgentEvent) -> Option<String> {
        match ev {
            AgentEvent::Log(line) => Some(line),
            AgentEvent::Status(s) => {
                let unchanged = self.last_status.as_ref().is_some_and(|p| {
                    p.status == s.status
                        && p.active_connections == s.active_connections
                        && p.total_processes == s.total_processes
                        && p.slow_queries == s.slow_queries
                });
                let line = format_status(&s);
                self.last_status = Some(s);
                if self.changes_only && unchanged {
                    None
                } else {
                    Some(line)
                }
            }
        }
    }

    pub fn done(&self) -> bool {
        self.once && self.last_status.is_some()
    }

    pub async fn run(&mut self, url: &str) -> anyhow::Result<()> {
        let mut stdout = io::stdout();
        loop {
            let mut ws = match connect(url).await {
                Ok(ws) => ws,
                Err(e) if self.once => return Err(e),
                Err(e) => {
                    eprintln!("connect to {url} failed: {e}; retrying");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            while let Some(ev) = next_event(&mut ws).await {
                if let Some(line) = self.on_event(ev) {
                    writeln!(stdout, "{line}")?;
                    stdout.flush()?;
                }
                if self.done() {
                    return Ok(());
                }
            }
            if self.once {
                anyhow::bail!("agent closed the stream before sending a status");
            }
            eprintln!("agent stream closed; reconnecting");
            sleep(RECONNECT_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(active: u64, state: ConnectionState) -> Status {
        Status {
            active_connections: active,
            total_processes: 10,
            slow_queries: 0,
            max_connections: 200,
            status: state,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn connected_line_shows_usage() {
        let line = format_status(&status(50, ConnectionState::Connected));
        assert!(line.contains("active 50/200 (25%)"), "{line}");
        assert!(line.contains("processes 10"), "{line}");
    }

    #[test]
    fn disconnected_line() {
        assert!(format_status(&status(0, ConnectionState::Disconnected)).ends_with("DISCONNECTED"));
    }

    #[test]
    fn changes_only_suppresses_repeats() {
        let mut app = App::new(false, true);
        assert!(app.on_event(AgentEvent::Status(status(1, ConnectionState::Connected))).is_some());
        assert!(app.on_event(AgentEvent::Status(status(1, ConnectionState::Connected))).is_none());
        assert!(app.on_event(AgentEvent::Status(status(2, ConnectionState::Connected))).is_some());
        assert!(app.on_event(AgentEvent::Log("x".into())).is_some());
    }

    #[test]
    fn once_finishes_after_first_status() {
        let mut app = App::new(true, false);
        app.on_event(AgentEvent::Log("x".into()));
        assert!(!app.done());
        app.on_event(AgentEvent::Status(status(1, ConnectionState::Connected)));
        assert!(app.done());
    }
}
