//! Kernel configuration, loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::CollisionPolicy;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "AXS_CONFIG";
/// Configuration file picked up from the working directory.
pub const CONFIG_FILE: &str = "axs.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Collection that kernel `byname` and `byquery` search.
    #[serde(default = "default_root_collection")]
    pub root_collection: PathBuf,

    /// Collection for new entries; the root collection when unset.
    #[serde(default)]
    pub work_collection: Option<PathBuf>,

    /// Create a call record for every call that is not served from cache.
    #[serde(default)]
    pub record_calls: bool,

    #[serde(default)]
    pub on_collision: CollisionPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root_collection: default_root_collection(),
            work_collection: None,
            record_calls: false,
            on_collision: CollisionPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set (e.g. "info", "axs=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty", "compact" or "json"; `AXS_LOG_FORMAT` takes precedence.
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

fn default_root_collection() -> PathBuf {
    PathBuf::from("./core_collection")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl KernelConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let mut config = Self::from_toml(&content, path)?;
        // Relative collection paths are relative to the file that names them.
        if let Some(base) = path.parent() {
            config.root_collection = base.join(&config.root_collection);
            config.work_collection = config.work_collection.map(|work| base.join(work));
        }
        Ok(config)
    }

    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Explicit path, else `AXS_CONFIG`, else `axs.toml` in the working
    /// directory, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        let local = Path::new(CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_apply_to_empty_file() {
        let config = KernelConfig::from_toml("", Path::new("axs.toml")).unwrap();
        assert_eq!(config.root_collection, PathBuf::from("./core_collection"));
        assert!(!config.record_calls);
        assert_eq!(config.on_collision, CollisionPolicy::Force);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_every_field() {
        let text = r#"
            root_collection = "/srv/axs/core"
            work_collection = "/srv/axs/work"
            record_calls = true
            on_collision = "timestamp"

            [logging]
            level = "debug"
            format = "json"
        "#;
        let config = KernelConfig::from_toml(text, Path::new("axs.toml")).unwrap();
        assert_eq!(config.work_collection, Some(PathBuf::from("/srv/axs/work")));
        assert!(config.record_calls);
        assert_eq!(config.on_collision, CollisionPolicy::Timestamp);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn bad_policy_is_a_config_error() {
        let err = KernelConfig::from_toml("on_collision = \"ignore\"", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn relative_paths_follow_the_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "root_collection = \"collections/core\"").unwrap();
        let config = KernelConfig::from_file(file.path()).unwrap();
        let base = file.path().parent().unwrap();
        assert_eq!(config.root_collection, base.join("collections/core"));
    }
}
