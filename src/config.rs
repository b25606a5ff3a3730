//! Configuration for the mock server.
//!
//! Defines the listening port, the worker pool and where templates live.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration for the mock server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker pool settings
    #[serde(default)]
    pub threads: ThreadSettings,

    /// Template discovery settings
    #[serde(default)]
    pub templates: TemplateSettings,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            threads: ThreadSettings::default(),
            templates: TemplateSettings::default(),
        }
    }
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is
    /// missing, unreadable or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Using default configuration"
                );
                Self::default()
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.threads.validate()?;
        self.templates.validate()?;
        Ok(())
    }
}

fn default_port() -> u16 {
    4567
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadSettings {
    /// Upper bound for blocking threads
    #[serde(default = "default_max_threads")]
    pub max: usize,

    /// Async worker threads
    #[serde(default = "default_min_threads")]
    pub min: usize,

    /// Idle thread keep-alive in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            max: default_max_threads(),
            min: default_min_threads(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl ThreadSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.min == 0 {
            anyhow::bail!("threads.min must be at least 1");
        }
        if self.max < self.min {
            anyhow::bail!(
                "threads.max ({}) must not be lower than threads.min ({})",
                self.max,
                self.min
            );
        }
        Ok(())
    }
}

fn default_max_threads() -> usize {
    50
}

fn default_min_threads() -> usize {
    10
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

/// Where templates are loaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateSettings {
    /// Directory walked recursively for template files
    #[serde(default = "default_templates_path")]
    pub path: PathBuf,

    /// Glob, relative to `path`, selecting template files
    #[serde(default = "default_include")]
    pub include: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            path: default_templates_path(),
            include: default_include(),
        }
    }
}

impl TemplateSettings {
    fn validate(&self) -> anyhow::Result<()> {
        globset::Glob::new(&self.include)
            .map_err(|e| anyhow::anyhow!("Invalid templates.include glob: {}", e))?;
        Ok(())
    }
}

fn default_templates_path() -> PathBuf {
    PathBuf::from("templates/")
}

fn default_include() -> String {
    "**/*".to_string()
}
