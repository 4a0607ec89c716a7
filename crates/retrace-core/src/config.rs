use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level configuration, loaded from retrace.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetraceConfig {
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Substitute swapchains with offscreen images
    #[serde(default = "default_true")]
    pub offscreen_swapchain: bool,
    /// Allow direct mapping of host-visible resources instead of staging copies
    #[serde(default = "default_true")]
    pub allow_mapped_fast_path: bool,
    /// Length of one fence wait slice. Waits never give up; an expired
    /// slice only logs a warning and waits again.
    #[serde(default = "default_fence_wait_timeout_ms")]
    pub fence_wait_timeout_ms: u64,
    /// Translate captured memory type indices to the replay device
    #[serde(default = "default_true")]
    pub remap_memory_types: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Size of the upload staging buffer created up front (0 = on first use)
    #[serde(default)]
    pub initial_upload_size: u64,
    /// Size of the readback staging buffer created up front (0 = on first use)
    #[serde(default)]
    pub initial_readback_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RETRACE_LOG is unset
    pub filter: Option<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            offscreen_swapchain: true,
            allow_mapped_fast_path: true,
            fence_wait_timeout_ms: default_fence_wait_timeout_ms(),
            remap_memory_types: true,
        }
    }
}

impl RetraceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring {}: {}", path, e);
                Self::default()
            }
        }
    }
}

/// Returns the default config file path.
/// Search order:
/// 1. System-wide config: `%PROGRAMDATA%\Retrace\retrace.toml` (Windows) or `/etc/retrace/retrace.toml`
/// 2. Local fallback: `./retrace.toml`
pub fn default_config_path() -> String {
    let system_path = std::path::Path::new(&retrace_common::platform::system_config_dir())
        .join("retrace.toml");
    if system_path.exists() {
        return system_path.to_string_lossy().into_owned();
    }
    "retrace.toml".to_string()
}

fn default_fence_wait_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}
