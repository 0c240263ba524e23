// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Provider configuration via `surfacelink.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::surface::PixelFormat;
use crate::core::{LinkError, Result};

/// How the UI process is launched and stopped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    /// UI executable. May be left unset when the embedder passes it to
    /// the provider directly.
    pub executable: Option<PathBuf>,
    /// Extra arguments appended after `--rendezvous=` and `--scale=`.
    pub args: Vec<String>,
    /// Environment variables injected into the child.
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Time the child gets to exit after its stream is closed.
    pub grace_period_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            grace_period_ms: 200,
            poll_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// First component of the rendezvous name `{prefix}.{pid}.{seq}`.
    pub rendezvous_prefix: String,
    pub handshake_timeout_ms: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            rendezvous_prefix: "surfacelink".to_string(),
            handshake_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest TREE payload accepted from the peer. Anything bigger closes
    /// the channel.
    pub max_tree_payload: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_tree_payload: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub max_depth: usize,
    /// Collapse repeated tree messages within one dispatch batch.
    pub coalesce: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: crate::core::tree::DEFAULT_MAX_DEPTH,
            coalesce: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub pixel_format: PixelFormat,
    /// Largest width or height the allocator accepts, in device pixels.
    pub max_dimension: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Bgra8,
            max_dimension: 16384,
        }
    }
}

/// Provider configuration from `surfacelink.toml`. Every field has a default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub child: ChildConfig,
    pub capability: CapabilityConfig,
    pub channel: ChannelConfig,
    pub tree: TreeConfig,
    pub surface: SurfaceConfig,
}

impl ProviderConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "surfacelink.toml";

    /// Load configuration from a file, or from [`FILE_NAME`](Self::FILE_NAME)
    /// inside a directory. Errors if the file is missing or cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let config_path = Self::resolve(path);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            LinkError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config = Self::parse(&content).map_err(|e| match e {
            LinkError::Configuration(msg) => {
                LinkError::Configuration(format!("{}: {}", config_path.display(), msg))
            }
            other => other,
        })?;

        tracing::info!("Loaded provider config from {}", config_path.display());
        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to defaults when the file
    /// is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        let config_path = Self::resolve(path);

        if !config_path.exists() {
            tracing::debug!("No {} found, using defaults", config_path.display());
            return Self::default();
        }

        match Self::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LinkError::Configuration(format!("Failed to parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.child.poll_interval_ms == 0 {
            return Err(LinkError::Configuration(
                "child.poll_interval_ms must be positive".into(),
            ));
        }
        if self.channel.max_tree_payload == 0 {
            return Err(LinkError::Configuration(
                "channel.max_tree_payload must be positive".into(),
            ));
        }
        if self.tree.max_depth == 0 {
            return Err(LinkError::Configuration(
                "tree.max_depth must be positive".into(),
            ));
        }
        if self.surface.max_dimension == 0 {
            return Err(LinkError::Configuration(
                "surface.max_dimension must be positive".into(),
            ));
        }
        // Resize notifications carry dimensions as i16.
        if self.surface.max_dimension > i16::MAX as u32 {
            return Err(LinkError::Configuration(format!(
                "surface.max_dimension {} exceeds {}",
                self.surface.max_dimension,
                i16::MAX
            )));
        }
        if self.capability.rendezvous_prefix.is_empty()
            || self.capability.rendezvous_prefix.contains('\0')
        {
            return Err(LinkError::Configuration(format!(
                "invalid capability.rendezvous_prefix {:?}",
                self.capability.rendezvous_prefix
            )));
        }
        Ok(())
    }

    fn resolve(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(Self::FILE_NAME)
        } else {
            path.to_path_buf()
        }
    }

    /// UI executable to launch.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.child.executable = Some(executable.into());
        self
    }

    /// Replace the extra child arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.child.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment variable for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.child.env.insert(key.into(), value.into());
        self
    }

    /// Time between closing the child's stream and killing it.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.child.grace_period_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.capability.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Prefix of the abstract socket name; must be non-empty.
    pub fn with_rendezvous_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.capability.rendezvous_prefix = prefix.into();
        self
    }

    /// Largest TREE payload either side may send, in bytes.
    pub fn with_max_tree_payload(mut self, max: u32) -> Self {
        self.channel.max_tree_payload = max;
        self
    }

    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.tree.coalesce = enabled;
        self
    }

    /// Pixel layout for newly allocated surfaces.
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.surface.pixel_format = format;
        self
    }

    /// [`ChildConfig::grace_period_ms`] as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.child.grace_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.child.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.capability.handshake_timeout_ms)
    }
}
