use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Engine configuration
///
/// Every field has a serde default so a partial `[views]` table (or an empty
/// file) deserializes into a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base directory for relative template paths
    #[serde(default = "default_views_dir")]
    pub directory: String,

    /// Extension appended to template paths that have none
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Memoise raw template text per absolute path
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// How many placeholders of one block may resolve at the same time
    #[serde(default = "default_max_concurrent_resolutions")]
    pub max_concurrent_resolutions: usize,
}

fn default_views_dir() -> String {
    "views".to_string()
}
fn default_extension() -> String {
    "html".to_string()
}
fn default_cache_enabled() -> bool {
    true
}
fn default_max_concurrent_resolutions() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            directory: default_views_dir(),
            extension: default_extension(),
            cache_enabled: default_cache_enabled(),
            max_concurrent_resolutions: default_max_concurrent_resolutions(),
        }
    }
}

/// On-disk layout: either a `[views]` table or the fields at top level
#[cfg(feature = "config")]
#[derive(Deserialize)]
struct ConfigFile {
    views: Option<EngineConfig>,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// A relative `directory` is resolved against the config file's directory.
    #[cfg(feature = "config")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&content).map_err(|e| {
            e.with_context(format!("Invalid config file '{}'", path_ref.display()))
        })?;

        let base_dir = path_ref.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_directory(base_dir);

        log::debug!(
            "Successfully loaded engine configuration from: {}",
            path_ref.display()
        );
        Ok(config)
    }

    /// Parse configuration from TOML text
    #[cfg(feature = "config")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse TOML: {}", e)))?;

        let config = match file.views {
            Some(views) => views,
            None => toml::from_str(content)
                .map_err(|e| Error::config(format!("Failed to parse TOML: {}", e)))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply `BLOCKSTREAM_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("BLOCKSTREAM_VIEWS_DIR") {
            self.directory = dir;
        }
        if let Some(cache) = lookup("BLOCKSTREAM_CACHE") {
            self.cache_enabled = cache
                .parse()
                .map_err(|_| Error::config("Invalid BLOCKSTREAM_CACHE value"))?;
        }
        if let Some(limit) = lookup("BLOCKSTREAM_MAX_CONCURRENT") {
            self.max_concurrent_resolutions = limit
                .parse()
                .map_err(|_| Error::config("Invalid BLOCKSTREAM_MAX_CONCURRENT value"))?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_resolutions == 0 {
            return Err(Error::config(
                "max_concurrent_resolutions must be at least 1",
            ));
        }
        if self.extension.starts_with('.') {
            return Err(Error::config(
                "extension must be given without a leading dot",
            ));
        }
        Ok(())
    }

    /// Make a relative `directory` relative to `base_dir`
    #[cfg(feature = "config")]
    fn resolve_directory<P: AsRef<Path>>(&mut self, base_dir: P) {
        let views_path = Path::new(&self.directory);
        if views_path.is_relative() {
            self.directory = base_dir
                .as_ref()
                .join(views_path)
                .to_string_lossy()
                .to_string();
        }
    }

    /// Resolve a template name to the path the loader should read
    pub fn resolve_path<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        let name = name.as_ref();
        let mut path = if name.is_absolute() {
            name.to_path_buf()
        } else {
            Path::new(&self.directory).join(name)
        };

        if path.extension().is_none() && !self.extension.is_empty() {
            path.set_extension(&self.extension);
        }

        path
    }
}
