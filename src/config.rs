use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration};

use crate::{ChariotError, ChariotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub bootstrap_program: Option<PathBuf>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout", with = "duration_ms")]
    pub timeout: Duration,

    #[serde(default = "default_sweep_interval", with = "duration_ms")]
    pub sweep_interval: Duration,

    /// Upper bound for the best-effort onExit program run during eviction.
    #[serde(default = "default_on_exit_timeout", with = "duration_ms")]
    pub on_exit_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: default_session_timeout(),
            sweep_interval: default_sweep_interval(),
            on_exit_timeout: default_on_exit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FunctionPolicy {
    /// Drop function-valued attributes (and list elements / map entries holding them).
    #[default]
    Omit,
    /// Abort the whole save with a serialization error.
    Fail,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    #[default]
    Binary,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub function_policy: FunctionPolicy,

    #[serde(default)]
    pub format: Format,

    /// Where the global registry is loaded from at bootstrap and flushed to at shutdown.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ChariotResult<T> {
    let file = File::open(path.as_ref()).map_err(|e| {
        ChariotError::internal(format!(
            "Failed to open config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| ChariotError::internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ChariotResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| ChariotError::internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_event_capacity() -> usize {
    100
}
fn default_session_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_on_exit_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            bootstrap_program: None,
            session: SessionConfig::default(),
            persistence: PersistenceConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ChariotResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChariotResult<()> {
        if self.event_capacity == 0 {
            return Err(ChariotError::internal("event_capacity must be positive"));
        }
        if self.session.timeout.is_zero() || self.session.sweep_interval.is_zero() {
            return Err(ChariotError::internal(
                "session timeout and sweep interval must be positive",
            ));
        }
        if self.agent.poll_interval.is_zero() {
            return Err(ChariotError::internal("agent poll interval must be positive"));
        }
        Ok(())
    }
}
