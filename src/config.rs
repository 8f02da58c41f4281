//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the capture pipeline:
//! the remote capture endpoint, pool sizing, drain timeouts and the optional
//! palette-reduction tool.

use crate::{validate_url, CaptureError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the base URL of the capture service.
pub const ENV_CAPTURE_URL: &str = "CAPTURE_URL";
/// Environment variable holding the system-under-test name.
pub const ENV_SUT_NAME: &str = "SUT_NAME";
/// Environment variable holding the system-under-test version.
pub const ENV_SUT_VERSION: &str = "SUT_VERSION";
/// Environment variable overriding the compression worker count.
pub const ENV_THREADS: &str = "THREADS";
/// Environment variable overriding the dispatch lane count.
pub const ENV_CAPTURE_THREADS: &str = "CAPTURE_THREADS";

/// Main configuration structure for the capture pipeline
///
/// Capture is only active when [`CaptureConfig::is_required`] holds, i.e. the
/// capture URL and the system-under-test name and version are all set.
///
/// # Examples
///
/// ```rust
/// use evidence_capture::CaptureConfig;
///
/// // Disabled by default: no endpoint configured
/// let config = CaptureConfig::default();
/// assert!(!config.is_required());
///
/// let config = CaptureConfig {
///     capture_url: Some("https://capture.example.com/api".to_string()),
///     sut_name: Some("shop".to_string()),
///     sut_version: Some("2.1.0".to_string()),
///     dispatch_lanes: 2,
///     ..Default::default()
/// };
/// assert!(config.is_required());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Base URL of the capture service (default: unset)
    pub capture_url: Option<String>,

    /// Name of the system under test (default: unset)
    pub sut_name: Option<String>,

    /// Version of the system under test (default: unset)
    pub sut_version: Option<String>,

    /// Number of concurrent compression jobs (default: 4)
    pub compression_workers: usize,

    /// Number of serial dispatch lanes (default: 3)
    ///
    /// Jobs of one execution always land on the same lane, so this bounds
    /// parallelism across executions only.
    pub dispatch_lanes: usize,

    /// Queue capacity of each dispatch lane (default: 1000)
    pub lane_queue_capacity: usize,

    /// Timeout applied to each HTTP request to the capture service (default: 30 seconds)
    pub http_timeout: Duration,

    /// Palette reduction settings
    pub compressor: CompressorSettings,

    /// How long shutdown waits for each lane to finish (default: 2 minutes)
    pub lane_drain_timeout: Duration,

    /// Outer deadline covering all lanes drained in parallel (default: 3 minutes)
    pub drain_deadline: Duration,

    /// Scripts that never trigger a capture, e.g. helper scripts injected by
    /// the test framework itself (default: empty)
    pub ignored_scripts: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_url: None,
            sut_name: None,
            sut_version: None,
            compression_workers: 4,
            dispatch_lanes: 3,
            lane_queue_capacity: 1000,
            http_timeout: Duration::from_secs(30),
            compressor: CompressorSettings::default(),
            lane_drain_timeout: Duration::from_secs(120),
            drain_deadline: Duration::from_secs(180),
            ignored_scripts: Vec::new(),
        }
    }
}

/// Settings for the external palette-reduction tool
///
/// The tool is invoked as `<program> <input> +dither -colors <palette_colors> <output>`
/// and probed once with `<program> -version`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressorSettings {
    /// Program name or path (default: `convert`)
    pub program: String,

    /// Number of palette colours to reduce to (default: 128)
    pub palette_colors: u32,

    /// Bounded wait for one invocation (default: 30 seconds)
    pub timeout: Duration,

    /// Directory for temporary image files (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            program: "convert".to_string(),
            palette_colors: 128,
            timeout: Duration::from_secs(30),
            temp_dir: None,
        }
    }
}

impl CaptureConfig {
    /// Builds a configuration from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, CaptureError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::Configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        let config: CaptureConfig = serde_json::from_str(&content).map_err(|e| {
            CaptureError::Configuration(format!("Cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, CaptureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.capture_url = non_empty(lookup(ENV_CAPTURE_URL));
        config.sut_name = non_empty(lookup(ENV_SUT_NAME));
        config.sut_version = non_empty(lookup(ENV_SUT_VERSION));

        if let Some(threads) = non_empty(lookup(ENV_THREADS)) {
            config.compression_workers = parse_count(ENV_THREADS, &threads)?;
        }
        if let Some(lanes) = non_empty(lookup(ENV_CAPTURE_THREADS)) {
            config.dispatch_lanes = parse_count(ENV_CAPTURE_THREADS, &lanes)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Capture runs only when URL, name and version are all specified.
    pub fn is_required(&self) -> bool {
        is_set(&self.capture_url) && is_set(&self.sut_name) && is_set(&self.sut_version)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.compression_workers == 0 {
            return Err(CaptureError::Configuration(
                "Compression workers must be greater than 0".to_string(),
            ));
        }

        if self.dispatch_lanes == 0 {
            return Err(CaptureError::Configuration(
                "Dispatch lanes must be greater than 0".to_string(),
            ));
        }

        if self.lane_queue_capacity == 0 {
            return Err(CaptureError::Configuration(
                "Lane queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.http_timeout.is_zero() || self.compressor.timeout.is_zero() {
            return Err(CaptureError::Configuration(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.lane_drain_timeout.is_zero() || self.drain_deadline.is_zero() {
            return Err(CaptureError::Configuration(
                "Drain timeouts must be greater than 0".to_string(),
            ));
        }

        if self.compressor.palette_colors < 2 {
            return Err(CaptureError::Configuration(
                "Palette must have at least 2 colours".to_string(),
            ));
        }

        if let Some(url) = self.capture_url.as_deref().filter(|u| !u.trim().is_empty()) {
            validate_url(url)?;
        }

        Ok(())
    }

    /// Full URL of the execution registration endpoint.
    pub fn executions_endpoint(&self) -> Option<String> {
        self.endpoint("executions")
    }

    /// Full URL of the screenshot endpoint.
    pub fn screenshot_endpoint(&self) -> Option<String> {
        self.endpoint("screenshot")
    }

    fn endpoint(&self, path: &str) -> Option<String> {
        self.capture_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), path))
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_count(key: &str, value: &str) -> Result<usize, CaptureError> {
    value
        .parse::<usize>()
        .map_err(|e| CaptureError::Configuration(format!("{key}={value}: {e}")))
}
