//! Server configuration management

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub driver: DriverSettings,
    /// Devices offered for export, one `[[export]]` table each
    #[serde(rename = "export", default)]
    pub exports: Vec<ExportEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the USB/IP listener binds; 3240 is the registered port
    pub bind_addr: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Blocking ioctl worker threads per opened device node
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Bus id clients claim the device by, e.g. "1-2"
    pub busid: String,
    /// Monitor driver node for this device
    pub node: PathBuf,
    pub busnum: u32,
    pub devnum: u32,
    /// USB speed code (1=low, 2=full, 3=high, 5=super)
    pub speed: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_addr: "0.0.0.0:3240".to_string(),
                log_level: "info".to_string(),
            },
            driver: DriverSettings { worker_threads: 4 },
            exports: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Read and validate a configuration file
    ///
    /// With no explicit path, the per-user config directory is searched
    /// first, then /etc/usbipd.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(explicit) => explicit,
            None => Self::search_paths()
                .into_iter()
                .find(|candidate| candidate.exists())
                .ok_or_else(|| anyhow!("no configuration file present"))?,
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: ServerConfig = toml::from_str(&raw)
            .with_context(|| format!("{} is not valid TOML", path.display()))?;
        config.validate()?;

        tracing::info!("configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Like [`ServerConfig::load`], falling back to defaults when no file
    /// is found or usable
    pub fn load_or_default() -> Self {
        Self::load(None).unwrap_or_else(|err| {
            tracing::warn!("using default configuration: {err:#}");
            Self::default()
        })
    }

    /// Render the configuration as TOML and write it out, creating parent
    /// directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
        }
        fs::write(path, rendered).with_context(|| format!("cannot write {}", path.display()))?;

        tracing::info!("configuration written to {}", path.display());
        Ok(())
    }

    /// Per-user configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("usbipd/server.toml")
    }

    fn search_paths() -> [PathBuf; 2] {
        [
            Self::default_path(),
            PathBuf::from("/etc/usbipd/server.toml"),
        ]
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.driver.worker_threads == 0 || self.driver.worker_threads > 64 {
            return Err(anyhow!(
                "worker_threads must be between 1 and 64, got {}",
                self.driver.worker_threads
            ));
        }

        let mut seen = HashSet::new();
        for export in &self.exports {
            if export.busid.is_empty() || export.busid.len() > 31 {
                return Err(anyhow!(
                    "Invalid busid '{}': must be 1-31 characters",
                    export.busid
                ));
            }
            if !seen.insert(export.busid.as_str()) {
                return Err(anyhow!("Duplicate busid '{}'", export.busid));
            }
            if export.node.as_os_str().is_empty() {
                return Err(anyhow!("Export '{}' has an empty node path", export.busid));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3240");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.driver.worker_threads, 4);
        assert!(config.exports.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");

        let mut config = ServerConfig::default();
        config.exports.push(ExportEntry {
            busid: "1-2".into(),
            node: PathBuf::from("/dev/usbmon-1-2"),
            busnum: 1,
            devnum: 2,
            speed: 3,
        });
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.exports.len(), 1);
        assert_eq!(loaded.exports[0].busid, "1-2");
        assert_eq!(loaded.exports[0].devnum, 2);
    }

    #[test]
    fn test_export_tables_parse() {
        let toml_str = r#"
            [server]
            bind_addr = "127.0.0.1:3240"
            log_level = "debug"

            [driver]
            worker_threads = 2

            [[export]]
            busid = "1-2"
            node = "/dev/usbmon-1-2"
            busnum = 1
            devnum = 2
            speed = 3

            [[export]]
            busid = "2-1"
            node = "/dev/usbmon-2-1"
            busnum = 2
            devnum = 1
            speed = 2
        "#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.exports.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = ServerConfig::default();
        config.server.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_busid_rejected() {
        let mut config = ServerConfig::default();
        for _ in 0..2 {
            config.exports.push(ExportEntry {
                busid: "1-1".into(),
                node: PathBuf::from("/dev/usbmon-1-1"),
                busnum: 1,
                devnum: 1,
                speed: 3,
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = ServerConfig::default();
        config.driver.worker_threads = 0;
        assert!(config.validate().is_err());
    }
}
