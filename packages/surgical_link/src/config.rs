use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::endpoint::Origin;
use crate::error::ClientError;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [connection]
//                    max_reconnect_attempts = 8
//
//   env var:         SURGICAL_CONNECTION__MAX_RECONNECT_ATTEMPTS=8
//
//   (double underscore = nesting, single underscore stays within field names)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub endpoint: EndpointFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub capture: CaptureFileConfig,
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Where the web front-end lives (under `[endpoint]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointFileConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
}

impl Default for EndpointFileConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
        }
    }
}

/// Control channel tunables (under `[connection]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Frame capture tunables (under `[capture]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureFileConfig {
    #[serde(default = "default_capture_interval_secs")]
    pub interval_secs: u64,
    /// JPEG quality in percent (the browser canvas used 0.8).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_placeholder_width")]
    pub placeholder_width: u32,
    #[serde(default = "default_placeholder_height")]
    pub placeholder_height: u32,
}

impl Default for CaptureFileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_capture_interval_secs(),
            jpeg_quality: default_jpeg_quality(),
            placeholder_width: default_placeholder_width(),
            placeholder_height: default_placeholder_height(),
        }
    }
}

/// One-shot audio channel tunables (under `[audio]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioFileConfig {
    #[serde(default = "default_audio_port")]
    pub port: u16,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for AudioFileConfig {
    fn default() -> Self {
        Self {
            port: default_audio_port(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

fn default_origin() -> String {
    "http://localhost:8050".to_string()
}
fn default_control_port() -> u16 {
    49000
}
fn default_heartbeat_interval_secs() -> u64 {
    20
}
fn default_reconnect_delay_secs() -> u64 {
    3
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_capture_interval_secs() -> u64 {
    10
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_placeholder_width() -> u32 {
    640
}
fn default_placeholder_height() -> u32 {
    360
}
fn default_audio_port() -> u16 {
    49001
}
fn default_settle_delay_ms() -> u64 {
    100
}

/// Default location of `config.toml` (`<config dir>/surgical_link/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("surgical_link").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → SURGICAL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SURGICAL_ENDPOINT__ORIGIN=https://or-3.local`  →  `endpoint.origin`
///   `SURGICAL_CAPTURE__INTERVAL_SECS=5`  →  `capture.interval_secs = 5`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("SURGICAL_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Control channel settings (runtime view).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub control_port: u16,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    /// Retry budget: consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    pub fn from_file(fc: &ConnectionFileConfig) -> Self {
        Self {
            control_port: fc.control_port,
            heartbeat_interval: Duration::from_secs(fc.heartbeat_interval_secs.max(1)),
            reconnect_delay: Duration::from_secs(fc.reconnect_delay_secs.max(1)),
            max_reconnect_attempts: fc.max_reconnect_attempts,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_file(&ConnectionFileConfig::default())
    }
}

/// Frame capture settings (runtime view).
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub interval: Duration,
    pub jpeg_quality: u8,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

impl CaptureConfig {
    pub fn from_file(fc: &CaptureFileConfig) -> Self {
        Self {
            interval: Duration::from_secs(fc.interval_secs.max(1)),
            jpeg_quality: fc.jpeg_quality.clamp(1, 100),
            placeholder_width: fc.placeholder_width.max(1),
            placeholder_height: fc.placeholder_height.max(1),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_file(&CaptureFileConfig::default())
    }
}

/// Audio upload settings (runtime view).
#[derive(Clone, Debug)]
pub struct AudioConfig {
    pub port: u16,
    /// Pause after stopping a recording before the buffered chunks are sent.
    pub settle_delay: Duration,
}

impl AudioConfig {
    pub fn from_file(fc: &AudioFileConfig) -> Self {
        Self {
            port: fc.port,
            settle_delay: Duration::from_millis(fc.settle_delay_ms),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::from_file(&AudioFileConfig::default())
    }
}

/// Everything a [`crate::Session`] needs, resolved from a [`FileConfig`].
#[derive(Clone, Debug)]
pub struct Settings {
    pub origin: Origin,
    pub connection: ConnectionConfig,
    pub capture: CaptureConfig,
    pub audio: AudioConfig,
}

impl Settings {
    pub fn from_file(fc: &FileConfig) -> Result<Self, ClientError> {
        Ok(Self {
            origin: Origin::parse(&fc.endpoint.origin)?,
            connection: ConnectionConfig::from_file(&fc.connection),
            capture: CaptureConfig::from_file(&fc.capture),
            audio: AudioConfig::from_file(&fc.audio),
        })
    }

    /// Extract and resolve settings in one step.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ClientError> {
        let fc: FileConfig = load_config(config_path).extract()?;
        Self::from_file(&fc)
    }
}
