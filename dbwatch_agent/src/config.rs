//! Startup configuration: `.env`/environment first, then CLI flags on top.
//! Loaded once; nothing here is hot-reloadable.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::monitor::MonitorConfig;

pub const DEFAULT_LISTEN_PORT: u16 = 3000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3_000);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_LOG_FILE: &str = "db_status.log";

pub const USAGE: &str = "Usage: dbwatch_agent [--port PORT|-p PORT] [--interval MS|-i MS] [--log-file PATH]\n\
\n\
Database settings come from the environment (or a .env file):\n\
  DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_NAME, DB_POOL_SIZE\n\
Other settings: PORT, DBWATCH_POLL_INTERVAL_MS, DBWATCH_RETRY_INTERVAL_MS, DBWATCH_LOG_FILE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Usage(String),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("missing value after {0}")]
    MissingValue(String),
    #[error("unexpected argument: {0}\n{USAGE}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub pool_size: usize,
    pub connect_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: None,
            dbname: "postgres".into(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub listen_port: u16,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub log_file: PathBuf,
    pub db: DbConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            db: DbConfig::default(),
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match parse_value::<u64>(key, raw)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

impl AgentConfig {
    /// Read the process environment. Call `dotenvy::dotenv()` beforehand to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`AgentConfig::from_env`] but with an injectable lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("DB_HOST") {
            cfg.db.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            cfg.db.port = parse_value("DB_PORT", &v)?;
        }
        if let Some(v) = get("DB_USER") {
            cfg.db.user = v;
        }
        cfg.db.password = get("DB_PASSWORD").filter(|v| !v.is_empty());
        if let Some(v) = get("DB_NAME") {
            cfg.db.dbname = v;
        }
        if let Some(v) = get("DB_POOL_SIZE") {
            cfg.db.pool_size = match parse_value::<usize>("DB_POOL_SIZE", &v)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: "DB_POOL_SIZE",
                        value: v,
                    })
                }
                n => n,
            };
        }
        if let Some(v) = get("PORT") {
            cfg.listen_port = parse_value("PORT", &v)?;
        }
        if let Some(v) = get("DBWATCH_POLL_INTERVAL_MS") {
            cfg.poll_interval = parse_millis("DBWATCH_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("DBWATCH_RETRY_INTERVAL_MS") {
            cfg.retry_interval = parse_millis("DBWATCH_RETRY_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("DBWATCH_LOG_FILE") {
            cfg.log_file = PathBuf::from(v);
        }
        Ok(cfg)
    }

    /// Apply CLI flags (first item is the program name). `-h`/`--help` yields
    /// [`ConfigError::Usage`].
    pub fn apply_args<I: IntoIterator<Item = String>>(mut self, args: I) -> Result<Self, ConfigError> {
        let mut it = args.into_iter();
        let _ = it.next(); // program name
        while let Some(a) = it.next() {
            let (flag, inline) = match a.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (a.clone(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| it.next())
                    .ok_or_else(|| ConfigError::MissingValue(flag.clone()))
            };
            match flag.as_str() {
                "-h" | "--help" => return Err(ConfigError::Usage(USAGE.to_string())),
                "--port" | "-p" => self.listen_port = parse_value("--port", &value()?)?,
                "--interval" | "-i" => self.poll_interval = parse_millis("--interval", &value()?)?,
                "--log-file" => self.log_file = PathBuf::from(value()?),
                _ => return Err(ConfigError::Unexpected(a)),
            }
        }
        Ok(self)
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: self.poll_interval,
            retry_interval: self.retry_interval,
            ..MonitorConfig::default()
        }
    }
}
