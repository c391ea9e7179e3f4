use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::CallConfig;
use crate::error::{CallError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads, so the call controller can read
/// settings on every transition without contention.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    /// Lock-free cache using ArcSwap for zero-cost reads
    cache: Arc<ArcSwap<CallConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Load configuration from `path`, writing defaults if the file is missing
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => parse(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = CallConfig::default();
                Self::save_to_file(path, &config).await?;
                info!("Wrote default configuration to {}", path.display());
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::build(Some(path.to_path_buf()), config))
    }

    /// Store that is never persisted
    pub fn in_memory(config: CallConfig) -> Self {
        Self::build(None, config)
    }

    fn build(path: Option<PathBuf>, config: CallConfig) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        }
    }

    async fn save_to_file(path: &Path, config: &CallConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, to_toml(config)?).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<CallConfig> {
        self.cache.load_full()
    }

    /// Set entire configuration
    pub async fn set(&self, config: CallConfig) -> Result<()> {
        if let Some(ref path) = self.path {
            Self::save_to_file(path, &config).await?;
        }
        self.cache.store(Arc::new(config));

        let _ = self.change_tx.send(ConfigChange {
            key: "call_config".to_string(),
        });

        Ok(())
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut CallConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);
        self.set(config).await
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Parse TOML configuration text
pub fn parse(text: &str) -> Result<CallConfig> {
    toml::from_str(text).map_err(|e| CallError::Config(e.to_string()))
}

/// Render configuration as TOML
pub fn to_toml(config: &CallConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| CallError::Config(e.to_string()))
}
