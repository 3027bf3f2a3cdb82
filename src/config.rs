use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `ROOMLEDGER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the background compactor rewrites the log.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// Accounts treated as hotel staff.
    pub staff: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "roomledger".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
            staff: vec!["frontdesk".into()],
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults;
    /// set but unparsable ones are an error rather than silently ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let metrics_port = match lookup("ROOMLEDGER_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError {
                var: "ROOMLEDGER_METRICS_PORT",
                value,
            })?),
        };
        let staff = match lookup("ROOMLEDGER_STAFF") {
            None => d.staff,
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        };

        Ok(Self {
            bind: lookup("ROOMLEDGER_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "ROOMLEDGER_PORT", d.port)?,
            data_dir: lookup("ROOMLEDGER_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: lookup("ROOMLEDGER_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "ROOMLEDGER_MAX_CONNECTIONS", d.max_connections)?,
            compact_threshold: parsed(&lookup, "ROOMLEDGER_COMPACT_THRESHOLD", d.compact_threshold)?,
            tls_cert: lookup("ROOMLEDGER_TLS_CERT"),
            tls_key: lookup("ROOMLEDGER_TLS_KEY"),
            metrics_port,
            staff,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port.map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    }
}
