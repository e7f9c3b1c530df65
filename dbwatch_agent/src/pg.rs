//! PostgreSQL stats source backed by a small fixed-size connection pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use crate::config::DbConfig;
use crate::source::{SourceError, StatsSession, StatsSource};
use crate::types::ProcessInfo;

const ACTIVE_CONNECTIONS_SQL: &str = "SELECT count(*)::int8 FROM pg_stat_activity";
const PROCESS_LIST_SQL: &str = "SELECT pid::int8, \
     GREATEST(COALESCE(floor(EXTRACT(EPOCH FROM (now() - query_start))), 0), 0)::int8, \
     state, query \
     FROM pg_stat_activity";
const MAX_CONNECTIONS_SQL: &str =
    "SELECT setting::int8 FROM pg_settings WHERE name = 'max_connections'";

struct PoolInner {
    idle: Mutex<Vec<Client>>,
    in_use: AtomicUsize,
    closed: AtomicBool,
    size: usize,
}

impl PoolInner {
    fn give_back(&self, client: Client) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if client.is_closed() || self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.size {
                idle.push(client);
            }
        }
    }

    fn take_idle(&self) -> Option<Client> {
        let mut idle = self.idle.lock().ok()?;
        while let Some(client) = idle.pop() {
            if !client.is_closed() {
                return Some(client);
            }
        }
        None
    }
}

pub struct PgStatsSource {
    pg: tokio_postgres::Config,
    pool: Arc<PoolInner>,
    // out-of-band connection failures, consumed by the monitor
    errors: mpsc::UnboundedSender<String>,
}

impl PgStatsSource {
    /// Build the source without connecting; connections are opened lazily on
    /// the first probe/acquire so an unreachable database does not block startup.
    pub fn new(cfg: &DbConfig, errors: mpsc::UnboundedSender<String>) -> Self {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&cfg.host)
            .port(cfg.port)
            .user(&cfg.user)
            .dbname(&cfg.dbname)
            .application_name("dbwatch")
            .connect_timeout(cfg.connect_timeout);
        if let Some(pw) = cfg.password.as_deref() {
            pg.password(pw);
        }
        Self {
            pg,
            pool: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(cfg.pool_size)),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                size: cfg.pool_size.max(1),
            }),
            errors,
        }
    }

    async fn connect(&self) -> Result<Client, SourceError> {
        let (client, connection) = self
            .pg
            .connect(NoTls)
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        let errors = self.errors.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {e}");
                let _ = errors.send(e.to_string());
            }
        });
        debug!("opened new postgres connection");
        Ok(client)
    }

    async fn checkout(&self) -> Result<PgSession, SourceError> {
        if self.pool.closed.load(Ordering::Acquire) {
            return Err(SourceError::PoolClosed);
        }
        let client = match self.pool.take_idle() {
            Some(c) => c,
            None => {
                let in_use = self.pool.in_use.load(Ordering::Acquire);
                if in_use >= self.pool.size {
                    return Err(SourceError::PoolExhausted {
                        in_use,
                        size: self.pool.size,
                    });
                }
                self.connect().await?
            }
        };
        self.pool.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(PgSession {
            client: Some(client),
            pool: Arc::clone(&self.pool),
        })
    }
}

#[async_trait]
impl StatsSource for PgStatsSource {
    async fn probe(&self) -> Result<(), SourceError> {
        let session = self.checkout().await?;
        session
            .client()?
            .simple_query("SELECT 1")
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn acquire(&self) -> Result<Box<dyn StatsSession>, SourceError> {
        Ok(Box::new(self.checkout().await?))
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.pool.closed.store(true, Ordering::Release);
        let drained = match self.pool.idle.lock() {
            Ok(mut idle) => idle.drain(..).count(),
            Err(_) => 0,
        };
        debug!("closed {drained} idle postgres connection(s)");
        match self.pool.in_use.load(Ordering::Acquire) {
            0 => Ok(()),
            n => Err(SourceError::PoolBusy(n)),
        }
    }
}

/// One checked-out connection. Returned to the pool on drop.
pub struct PgSession {
    client: Option<Client>,
    pool: Arc<PoolInner>,
}

impl PgSession {
    fn client(&self) -> Result<&Client, SourceError> {
        self.client.as_ref().ok_or(SourceError::PoolClosed)
    }

    async fn single_i64(&self, sql: &str, what: &'static str) -> Result<i64, SourceError> {
        let row = self
            .client()?
            .query_one(sql, &[])
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;
        row.try_get::<_, i64>(0).map_err(|e| SourceError::Decode {
            what,
            detail: e.to_string(),
        })
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.give_back(client);
        }
    }
}

fn non_negative(v: i64, what: &'static str) -> Result<u64, SourceError> {
    u64::try_from(v).map_err(|_| SourceError::Decode {
        what,
        detail: format!("negative value {v}"),
    })
}

fn process_from_row(row: &Row) -> Result<ProcessInfo, SourceError> {
    let decode = |e: tokio_postgres::Error| SourceError::Decode {
        what: "process list",
        detail: e.to_string(),
    };
    let elapsed: i64 = row.try_get(1).map_err(decode)?;
    Ok(ProcessInfo {
        id: row.try_get(0).map_err(decode)?,
        elapsed_seconds: elapsed.max(0) as u64,
        state: row.try_get(2).map_err(decode)?,
        info: row.try_get(3).map_err(decode)?,
    })
}

#[async_trait]
impl StatsSession for PgSession {
    async fn active_connections(&mut self) -> Result<u64, SourceError> {
        let n = self
            .single_i64(ACTIVE_CONNECTIONS_SQL, "active connections")
            .await?;
        non_negative(n, "active connections")
    }

    async fn process_list(&mut self) -> Result<Vec<ProcessInfo>, SourceError> {
        let rows = self
            .client()?
            .query(PROCESS_LIST_SQL, &[])
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;
        rows.iter().map(process_from_row).collect()
    }

    async fn max_connections(&mut self) -> Result<u64, SourceError> {
        let n = self.single_i64(MAX_CONNECTIONS_SQL, "max_connections").await?;
        non_negative(n, "max_connections")
    }
}
