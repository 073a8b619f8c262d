//! Application configuration
//!
//! A YAML key-value file holding the settings the editor shell persists
//! between sessions. The core never requires environment variables.

use crate::f0::F0Detector;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Execution device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Cpu,
    Cuda,
    Directml,
}

impl Default for DeviceChoice {
    fn default() -> Self {
        DeviceChoice::Cpu
    }
}

/// Saved window placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            x: 100,
            y: 100,
            width: 1280,
            height: 800,
        }
    }
}

/// Persistent application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Execution device for neural models
    pub device: DeviceChoice,
    /// GPU device id when device is not cpu
    pub gpu_device_id: i32,
    /// Worker thread count; 0 means use the core count
    pub thread_count: usize,
    /// F0 detector selection
    pub detector: F0Detector,
    /// Model directory
    pub model_dir: PathBuf,
    /// UI language tag
    pub language: String,
    /// Saved window placement
    pub window: WindowGeometry,
    /// Most recently opened project or audio file
    pub last_opened: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceChoice::default(),
            gpu_device_id: 0,
            thread_count: 0,
            detector: F0Detector::default(),
            model_dir: PathBuf::from("models"),
            language: "en".into(),
            window: WindowGeometry::default(),
            last_opened: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` or fall back to defaults when absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::info!("No usable config ({}); using defaults", e);
                Self::default()
            }
        }
    }

    /// Worker threads to use, resolving 0 to the core count
    pub fn effective_thread_count(&self) -> usize {
        if self.thread_count == 0 {
            num_cpus::get()
        } else {
            self.thread_count
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.gpu_device_id < 0 {
            return Err(Error::Config("gpu_device_id must be >= 0".into()));
        }
        if self.language.is_empty() {
            return Err(Error::Config("language must not be empty".into()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config("window size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("retune_config.yaml");

        let mut config = AppConfig::default();
        config.detector = F0Detector::Yin;
        config.device = DeviceChoice::Cuda;
        config.gpu_device_id = 1;
        config.last_opened = Some(PathBuf::from("takes/one.htpx"));
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.detector, F0Detector::Yin);
        assert_eq!(loaded.device, DeviceChoice::Cuda);
        assert_eq!(loaded.gpu_device_id, 1);
        assert_eq!(loaded.last_opened, config.last_opened);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_rejected() {
        let mut config = AppConfig::default();
        config.gpu_device_id = -1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.language.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::load("/nonexistent/retune.yaml"),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_effective_threads() {
        let config = AppConfig::default();
        assert!(config.effective_thread_count() >= 1);

        let mut config = AppConfig::default();
        config.thread_count = 3;
        assert_eq!(config.effective_thread_count(), 3);
    }
}
