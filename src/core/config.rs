//! # Supervisor configuration.
//!
//! [`Config`] has a [`Default`] for embedding and tests, and
//! [`Config::from_env`] for the daemon (a `.env` file is honoured through
//! `dotenvy`).
//!
//! ## Sentinel values
//! - `max_workers_per_owner = 0` → no per-owner quota
//! - `WORKERVISOR_RESTART_CEILING=0` → [`RestartPolicy::Never`]
//! - `WORKERVISOR_RESTART_WINDOW_MS=0` → crashes count for the actor's lifetime
//!
//! ## Environment
//! | Variable                               | Field                   | Default |
//! |----------------------------------------|-------------------------|---------|
//! | `WORKERVISOR_GRACE_MS`                 | `grace`                 | 60000   |
//! | `WORKERVISOR_STOP_GRACE_MS`            | `stop_grace`            | 10000   |
//! | `WORKERVISOR_BUS_CAPACITY`             | `bus_capacity`          | 1024    |
//! | `WORKERVISOR_RESTART_CEILING`          | `restart`               | 5       |
//! | `WORKERVISOR_RESTART_WINDOW_MS`        | `restart`               | 0       |
//! | `WORKERVISOR_BACKOFF_FIRST_MS`         | `backoff.first`         | 5000    |
//! | `WORKERVISOR_BACKOFF_MAX_MS`           | `backoff.max`           | 60000   |
//! | `WORKERVISOR_BACKOFF_FACTOR`           | `backoff.factor`        | 1.0     |
//! | `WORKERVISOR_BACKOFF_JITTER`           | `backoff.jitter`        | none    |
//! | `WORKERVISOR_RESTART_DELAY_MS`         | `restart_delay`         | 2000    |
//! | `WORKERVISOR_SPAWN_SETTLE_MS`          | `spawn_settle`          | 1000    |
//! | `WORKERVISOR_READY_TIMEOUT_MS`         | `ready_timeout`         | 30000   |
//! | `WORKERVISOR_COMPILE_TIMEOUT_MS`       | `compile_timeout`       | 120000  |
//! | `WORKERVISOR_CHECK_TIMEOUT_MS`         | `check_timeout`         | 10000   |
//! | `WORKERVISOR_WORK_ROOT`                | `work_root`             | `$TMPDIR/workervisor` |
//! | `WORKERVISOR_FOOTER`                   | `footer`                | see [`DEFAULT_FOOTER`] |
//! | `WORKERVISOR_FORWARD_ENV`              | `forward_env` (comma separated) | `API_ID,API_HASH,LANG,TZ` |
//! | `WORKERVISOR_PROGRAM_<KIND>`           | `programs` (e.g. `..._PROGRAM_PYTHON_CLIENT`) | - |
//! | `WORKERVISOR_MAX_WORKERS_PER_OWNER`    | `max_workers_per_owner` | 5       |
//! | `WORKERVISOR_OUTPUT_LINES`             | `output_lines`          | 200     |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::policies::{BackoffPolicy, JitterPolicy, RestartPolicy, DEFAULT_RESTART_CEILING};
use crate::runtime::{RuntimeKind, RuntimeTable, DEFAULT_OUTPUT_LINES};

/// Prefix of every configuration variable.
pub const ENV_PREFIX: &str = "WORKERVISOR_";

/// Footer appended to every message a hosted worker sends.
pub const DEFAULT_FOOTER: &str = "━━━━━━━━━━━━━━━━\n⚡ Hosted with workervisor";

#[derive(Clone, Debug)]
pub struct Config {
    /// Shutdown budget for stopping every worker.
    pub grace: Duration,

    /// Per-worker SIGTERM → SIGKILL escalation delay.
    pub stop_grace: Duration,

    /// Event bus ring size (min 1).
    pub bus_capacity: usize,

    pub restart: RestartPolicy,
    pub backoff: BackoffPolicy,

    /// Pause between stop and start in an explicit restart.
    pub restart_delay: Duration,

    /// How long a `Readiness::Settle` worker must stay up to count as started.
    pub spawn_settle: Duration,

    /// How long a `Readiness::Marker` worker has to print the ready marker.
    pub ready_timeout: Duration,

    pub compile_timeout: Duration,

    /// Budget for one toolchain syntax check.
    pub check_timeout: Duration,

    /// Parent of the per-worker temporary directories.
    pub work_root: PathBuf,

    /// Exposed to workers as `WORKER_FOOTER`.
    pub footer: String,

    /// Host variables copied into the otherwise empty worker environment.
    pub forward_env: Vec<String>,

    /// Per-runtime program overrides (interpreter or compiler path).
    pub programs: BTreeMap<RuntimeKind, PathBuf>,

    /// Workers one owner may hold (`0` = unlimited).
    pub max_workers_per_owner: usize,

    /// Output lines retained per worker for `logs`.
    pub output_lines: usize,
}

impl Config {
    /// Loads `.env` (if any) and reads `WORKERVISOR_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup (full variable names).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };
        let millis = |name: &str, default: Duration| -> Result<Duration, ConfigError> {
            match get(name) {
                Some((key, v)) => parse::<u64>(&key, &v).map(Duration::from_millis),
                None => Ok(default),
            }
        };

        let mut cfg = Config::default();
        cfg.grace = millis("GRACE_MS", cfg.grace)?;
        cfg.stop_grace = millis("STOP_GRACE_MS", cfg.stop_grace)?;
        cfg.restart_delay = millis("RESTART_DELAY_MS", cfg.restart_delay)?;
        cfg.spawn_settle = millis("SPAWN_SETTLE_MS", cfg.spawn_settle)?;
        cfg.ready_timeout = millis("READY_TIMEOUT_MS", cfg.ready_timeout)?;
        cfg.compile_timeout = millis("COMPILE_TIMEOUT_MS", cfg.compile_timeout)?;
        cfg.check_timeout = millis("CHECK_TIMEOUT_MS", cfg.check_timeout)?;

        if let Some((key, v)) = get("BUS_CAPACITY") {
            cfg.bus_capacity = parse(&key, &v)?;
        }
        if let Some((key, v)) = get("MAX_WORKERS_PER_OWNER") {
            cfg.max_workers_per_owner = parse(&key, &v)?;
        }
        if let Some((key, v)) = get("OUTPUT_LINES") {
            cfg.output_lines = parse(&key, &v)?;
        }

        let ceiling = match get("RESTART_CEILING") {
            Some((key, v)) => parse::<u32>(&key, &v)?,
            None => DEFAULT_RESTART_CEILING,
        };
        let window = millis("RESTART_WINDOW_MS", Duration::ZERO)?;
        cfg.restart = if ceiling == 0 {
            RestartPolicy::Never
        } else {
            RestartPolicy::OnCrash {
                ceiling,
                window: (!window.is_zero()).then_some(window),
            }
        };

        cfg.backoff.first = millis("BACKOFF_FIRST_MS", cfg.backoff.first)?;
        cfg.backoff.max = millis("BACKOFF_MAX_MS", cfg.backoff.max)?;
        if let Some((key, v)) = get("BACKOFF_FACTOR") {
            let factor: f64 = parse(&key, &v)?;
            if !factor.is_finite() || factor < 1.0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: v,
                    reason: "must be a finite number >= 1.0".into(),
                });
            }
            cfg.backoff.factor = factor;
        }
        if let Some((key, v)) = get("BACKOFF_JITTER") {
            cfg.backoff.jitter = match v.to_ascii_lowercase().as_str() {
                "none" => JitterPolicy::None,
                "full" => JitterPolicy::Full,
                "equal" => JitterPolicy::Equal,
                "decorrelated" => JitterPolicy::Decorrelated,
                _ => {
                    return Err(ConfigError::Invalid {
                        key,
                        value: v,
                        reason: "expected none, full, equal or decorrelated".into(),
                    })
                }
            };
        }

        if let Some((_, v)) = get("WORK_ROOT") {
            cfg.work_root = PathBuf::from(v);
        }
        // The footer keeps its inner whitespace; only an unset variable falls back.
        if let Some(footer) = lookup(&format!("{ENV_PREFIX}FOOTER")) {
            cfg.footer = footer.replace("\\n", "\n");
        }
        if let Some((_, v)) = get("FORWARD_ENV") {
            cfg.forward_env = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        for kind in RuntimeKind::ALL {
            let name = format!(
                "PROGRAM_{}",
                kind.as_str().to_ascii_uppercase().replace('-', "_")
            );
            if let Some((_, v)) = get(&name) {
                cfg.programs.insert(kind, PathBuf::from(v));
            }
        }

        Ok(cfg)
    }

    /// Per-owner quota as an `Option` (`None` = unlimited).
    #[inline]
    pub fn owner_quota(&self) -> Option<usize> {
        (self.max_workers_per_owner != 0).then_some(self.max_workers_per_owner)
    }

    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Runtime table with this config's program overrides applied.
    pub fn runtime_table(&self) -> RuntimeTable {
        RuntimeTable::new(self.programs.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),
            bus_capacity: 1024,
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::default(),
            restart_delay: Duration::from_secs(2),
            spawn_settle: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(30),
            compile_timeout: Duration::from_secs(120),
            check_timeout: Duration::from_secs(10),
            work_root: std::env::temp_dir().join("workervisor"),
            footer: DEFAULT_FOOTER.to_string(),
            forward_env: ["API_ID", "API_HASH", "LANG", "TZ"]
                .into_iter()
                .map(String::from)
                .collect(),
            programs: BTreeMap::new(),
            max_workers_per_owner: 5,
            output_lines: DEFAULT_OUTPUT_LINES,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
