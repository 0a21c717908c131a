use std::path::PathBuf;
use std::str::FromStr;

/// Process configuration, read from `SALON_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON file with services, weekly schedule and holidays.
    pub settings_path: PathBuf,
    pub max_connections: usize,
    /// Compact the WAL once this many appends have accumulated.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7420,
            data_dir: PathBuf::from("./data"),
            settings_path: PathBuf::from("./salon.json"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("SALON_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "SALON_PORT").unwrap_or(defaults.port),
            data_dir: lookup("SALON_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            settings_path: lookup("SALON_SETTINGS")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            max_connections: parsed(&lookup, "SALON_MAX_CONNECTIONS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SALON_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "SALON_METRICS_PORT"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointments.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
