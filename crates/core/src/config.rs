use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, str::FromStr};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 44_100;
pub const DEFAULT_FRAME_SIZE: usize = 2048;
pub const DEFAULT_YIN_TOLERANCE: f64 = 0.8;
pub const DEFAULT_PITCH_MIN_CONFIDENCE: f64 = 0.9;
pub const DEFAULT_PITCH_MIN_HZ: f64 = 20.0;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_DB_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const MAX_HISTORY_LIMIT: usize = 1000;
/// Lowest fundamental the voice-quality stages search for.
pub const ANALYSIS_FLOOR_HZ: f64 = 75.0;
/// Window of the fallback pitch tracker, in samples.
pub const FALLBACK_PITCH_WINDOW: usize = 1536;
pub const ENV_BIND_ADDR: &str = "VOX_BIND_ADDR";
pub const ENV_DATABASE_PATH: &str = "VOX_DATABASE_PATH";
pub const ENV_WORKERS: &str = "VOX_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "VOX_QUEUE_CAPACITY";
pub const ENV_OVERLOAD_POLICY: &str = "VOX_OVERLOAD_POLICY";
pub const ENV_DB_MAX_CONNECTIONS: &str = "VOX_DB_MAX_CONNECTIONS";

/// Shape of the frames clients stream: a fixed sample rate and a fixed
/// number of mono samples per frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate_hz: u32,
    pub frame_size: usize,
}

impl FrameFormat {
    pub fn new(sample_rate_hz: u32, frame_size: usize) -> Result<Self, ConfigError> {
        if sample_rate_hz == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if frame_size < 2 || frame_size % 2 != 0 {
            return Err(ConfigError::InvalidFrameSize(frame_size));
        }
        let needed = min_frame_size(sample_rate_hz);
        if frame_size < needed {
            return Err(ConfigError::FrameTooShort { frame_size, needed });
        }
        Ok(Self {
            sample_rate_hz,
            frame_size,
        })
    }

    /// STFT hop used by the spectral stages.
    pub fn hop_size(&self) -> usize {
        self.frame_size / 2
    }
}

/// Smallest frame every stage can measure: two periods of the lowest pitch
/// for pulses and HNR, and one fallback pitch window.
pub fn min_frame_size(sample_rate_hz: u32) -> usize {
    let max_lag = (f64::from(sample_rate_hz) / ANALYSIS_FLOOR_HZ).ceil() as usize;
    (2 * (max_lag + 1)).max(FALLBACK_PITCH_WINDOW)
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    pub format: FrameFormat,
    pub yin_tolerance: f64,
    pub pitch_min_confidence: f64,
    pub pitch_min_hz: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            yin_tolerance: DEFAULT_YIN_TOLERANCE,
            pitch_min_confidence: DEFAULT_PITCH_MIN_CONFIDENCE,
            pitch_min_hz: DEFAULT_PITCH_MIN_HZ,
        }
    }
}

/// What the analysis queue does with a frame that arrives while it is full.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverloadPolicy {
    /// Evict the oldest queued frame; its caller observes a drop.
    #[default]
    DropOldest,
    /// Refuse the incoming frame.
    RejectNew,
}

impl FromStr for OverloadPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "drop-oldest" => Ok(Self::DropOldest),
            "reject-new" => Ok(Self::RejectNew),
            _ => Err(ConfigError::UnknownOverloadPolicy(s.to_owned())),
        }
    }
}

impl fmt::Display for OverloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropOldest => f.write_str("drop-oldest"),
            Self::RejectNew => f.write_str("reject-new"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub policy: OverloadPolicy,
}

impl WorkerPoolConfig {
    pub fn new(
        workers: usize,
        queue_capacity: usize,
        policy: OverloadPolicy,
    ) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(Self {
            workers,
            queue_capacity,
            policy,
        })
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            policy: OverloadPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// `None` keeps metrics in memory only.
    pub database_path: Option<String>,
    pub max_connections: usize,
}

impl StoreConfig {
    pub fn new(database_path: Option<String>, max_connections: usize) -> Result<Self, ConfigError> {
        if max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        if matches!(&database_path, Some(p) if p.trim().is_empty()) {
            return Err(ConfigError::EmptyDatabasePath);
        }
        Ok(Self {
            database_path,
            max_connections,
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub analysis: AnalysisConfig,
    pub pool: WorkerPoolConfig,
    pub store: StoreConfig,
    pub broadcast_capacity: usize,
    pub history_limit: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddr(String),
    #[error("sample rate must be > 0 Hz")]
    ZeroSampleRate,
    #[error("frame size must be an even number >= 2, got {0}")]
    InvalidFrameSize(usize),
    #[error("frame size {frame_size} is below the {needed} samples the analysis needs")]
    FrameTooShort { frame_size: usize, needed: usize },
    #[error("analysis pool needs at least one worker")]
    ZeroWorkers,
    #[error("analysis queue capacity must be > 0")]
    ZeroQueueCapacity,
    #[error("database connection limit must be > 0")]
    ZeroConnections,
    #[error("database path must not be empty")]
    EmptyDatabasePath,
    #[error("unknown overload policy {0:?} (expected drop-oldest or reject-new)")]
    UnknownOverloadPolicy(String),
    #[error("{key}: cannot parse {value:?}")]
    InvalidValue { key: String, value: String },
}

pub fn parse_bind_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidBindAddr(value.to_owned()))
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

/// CLI value, then the parsed environment variable, then `default`.
pub fn resolve_parsed<T: FromStr>(
    cli_value: Option<T>,
    env_key: &str,
    env: &impl Env,
    default: T,
) -> Result<T, ConfigError> {
    if let Some(v) = cli_value {
        return Ok(v);
    }
    match env.var(env_key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: env_key.to_owned(),
            value: raw,
        }),
        None => Ok(default),
    }
}
