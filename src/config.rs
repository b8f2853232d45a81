use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{klog_debug, Error, Result};

/// Local mirror registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub name: String,
    pub port: u16,
    /// Skip TLS verification when copying into the mirror.
    pub insecure: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "kindlab-registry".to_string(),
            port: 5001,
            insecure: true,
        }
    }
}

impl RegistryConfig {
    /// Address used from the host when copying into the mirror.
    pub fn host(&self) -> String {
        format!("localhost:{}", self.port)
    }

    /// Address cluster nodes use to pull from the mirror.
    pub fn in_cluster_host(&self) -> String {
        format!("{}:5000", self.name)
    }
}

/// Bounds for the image copy retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_unit_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit_secs: 30,
        }
    }
}

/// A helm release installed as part of a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRelease {
    pub release: String,
    pub chart: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub values: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Charts per tier. Tier 0 is the cluster itself and carries none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCharts {
    pub infrastructure: Vec<ChartRelease>,
    pub platform: Vec<ChartRelease>,
    pub applications: Vec<ChartRelease>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub cluster_name: String,
    pub gpu: bool,
    pub model: Option<String>,
    pub model_cache_dir: Option<String>,
    pub warmup_image: Option<String>,
    pub image_warmup_gpu_only: bool,
    pub registry: RegistryConfig,
    pub retry: RetryConfig,
    pub tiers: TierCharts,
    pub status_timeout_secs: u64,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            cluster_name: "kindlab".to_string(),
            gpu: false,
            model: None,
            model_cache_dir: None,
            warmup_image: None,
            image_warmup_gpu_only: true,
            registry: RegistryConfig::default(),
            retry: RetryConfig::default(),
            tiers: TierCharts::default(),
            status_timeout_secs: 10,
        }
    }
}

impl LabConfig {
    pub fn lab_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".kindlab"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::lab_dir()?.join("kindlab.toml"))
    }

    /// Root of the model cache; each model gets a sub-directory.
    pub fn model_cache_dir(&self) -> Result<PathBuf> {
        match &self.model_cache_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::lab_dir()?.join("models")),
        }
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        klog_debug!("LabConfig::load path={}", path.display());
        if !path.exists() {
            klog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        klog_debug!(
            "Config loaded: cluster={} gpu={} model={:?} image={:?}",
            config.cluster_name,
            config.gpu,
            config.model,
            config.warmup_image
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::lab_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        klog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(Error::Validation("model slug cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
