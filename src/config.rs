use std::path::PathBuf;
use std::time::Duration;

use crate::model::Span;
use crate::time::to_minutes;

/// Daemon settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub working_day: Span,
    pub admin_email: Option<String>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
}

#[derive(Debug)]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.var, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            working_day: Span::new(8 * 60, 18 * 60),
            admin_email: None,
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let data_dir = lookup("ROOMBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = parse_opt(&lookup, "ROOMBOOK_METRICS_PORT")?;

        let day_start = parse_time(&lookup, "ROOMBOOK_DAY_START", defaults.working_day.start)?;
        let day_end = parse_time(&lookup, "ROOMBOOK_DAY_END", defaults.working_day.end)?;
        let working_day = Span::try_new(day_start, day_end).ok_or_else(|| ConfigError {
            var: "ROOMBOOK_DAY_END",
            message: "working day must end after it starts".into(),
        })?;

        let admin_email = lookup("ROOMBOOK_ADMIN_EMAIL").filter(|s| !s.trim().is_empty());

        let sweep_secs: u64 = parse_opt(&lookup, "ROOMBOOK_SWEEP_INTERVAL_SECS")?
            .unwrap_or(defaults.sweep_interval.as_secs());
        if sweep_secs == 0 {
            return Err(ConfigError {
                var: "ROOMBOOK_SWEEP_INTERVAL_SECS",
                message: "must be positive".into(),
            });
        }

        let compact_threshold = parse_opt(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")?
            .unwrap_or(defaults.compact_threshold);

        Ok(Self {
            data_dir,
            metrics_port,
            working_day,
            admin_email,
            sweep_interval: Duration::from_secs(sweep_secs),
            compact_threshold,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parse_opt<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError {
            var,
            message: format!("cannot parse {raw:?}"),
        }),
    }
}

fn parse_time(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u16,
) -> Result<u16, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => to_minutes(&raw).ok_or_else(|| ConfigError {
            var,
            message: format!("not a time of day: {raw:?}"),
        }),
    }
}
