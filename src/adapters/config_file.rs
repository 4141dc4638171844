//! JSON config file adapter.
//!
//! Implements [`ConfigPort`] over a single JSON file.
//!
//! - A missing file yields [`SystemConfig::default()`].
//! - Every field is optional; absent ones keep their defaults.
//! - Both load and save validate.  Saves go through a temporary file and
//!   a rename so a crash never leaves a truncated config behind.

use std::fs;
use std::io;
use std::path::PathBuf;

use log::info;

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::SystemConfig;

pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigPort for JsonConfigFile {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let config = match fs::read_to_string(&self.path) {
            Ok(text) => {
                let config: SystemConfig =
                    serde_json::from_str(&text).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
                info!("Config loaded from {}", self.path.display());
                config
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", self.path.display());
                SystemConfig::default()
            }
            Err(e) => return Err(ConfigError::IoError(format!("{}: {}", self.path.display(), e))),
        };
        config.validate().map_err(ConfigError::ValidationFailed)?;
        Ok(config)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationFailed)?;
        let text = serde_json::to_string_pretty(config).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| ConfigError::IoError(format!("{}: {}", self.path.display(), e)))?;
        info!("Config saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!("hottub-config-{}-{}.json", name, std::process::id()));
        let _ = fs::remove_file(&p);
        p
    }

    #[test]
    fn missing_file_gives_defaults() {
        let store = JsonConfigFile::new(path("missing"));
        let config = store.load().unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn save_then_load() {
        let p = path("roundtrip");
        let store = JsonConfigFile::new(&p);
        let mut config = SystemConfig::default();
        config.timing.mix_secs = 900.0;
        config.hooks.notify = vec!["mail-operator".into()];
        store.save(&config).unwrap();
        let loaded = store.load().unwrap();
        assert!((loaded.timing.mix_secs - 900.0).abs() < f64::EPSILON);
        assert_eq!(loaded.hooks.notify, vec!["mail-operator".to_string()]);
        let _ = fs::remove_file(p);
    }

    #[test]
    fn garbage_is_corrupted() {
        let p = path("garbage");
        fs::write(&p, "{ not json").unwrap();
        assert!(matches!(JsonConfigFile::new(&p).load(), Err(ConfigError::Corrupted(_))));
        let _ = fs::remove_file(p);
    }

    #[test]
    fn invalid_values_rejected_on_load_and_save() {
        let p = path("invalid");
        fs::write(&p, r#"{ "timing": { "mix_secs": -1 } }"#).unwrap();
        let store = JsonConfigFile::new(&p);
        assert!(matches!(store.load(), Err(ConfigError::ValidationFailed(_))));

        let mut config = SystemConfig::default();
        config.bounds.orp_min = 2000.0;
        assert!(matches!(store.save(&config), Err(ConfigError::ValidationFailed(_))));
        let _ = fs::remove_file(p);
    }
}
