use super::loader::{FileLoader, TemplateLoader};
use super::parser::Parser;
use super::renderer::RenderContext;
use super::view::View;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::escape::Escaper;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Process-wide default engine used by [`crate::create`] and
/// [`crate::create_from_string`]
pub static ENGINE: Lazy<Engine> = Lazy::new(Engine::from_env);

struct EngineInner {
    config: EngineConfig,
    loader: Arc<dyn TemplateLoader>,
    escaper: Escaper,
}

/// Creates views from template files or strings
///
/// Cheap to clone; clones share configuration, loader and escaper.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with the given configuration and the matching file loader
    pub fn with_config(config: EngineConfig) -> Self {
        let loader: Arc<dyn TemplateLoader> = if config.cache_enabled {
            Arc::new(FileLoader::shared())
        } else {
            Arc::new(FileLoader::uncached())
        };

        Self {
            inner: Arc::new(EngineInner {
                config,
                loader,
                escaper: Escaper::default(),
            }),
        }
    }

    /// Default configuration plus `BLOCKSTREAM_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Err(e) = config.apply_env_overrides() {
            log::warn!("Ignoring invalid environment configuration: {}", e);
            config = EngineConfig::default();
        }
        Self::with_config(config)
    }

    /// Create a builder for configuring an Engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn loader(&self) -> &Arc<dyn TemplateLoader> {
        &self.inner.loader
    }

    pub(crate) fn resolve_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.inner.config.resolve_path(name)
    }

    pub(crate) fn render_context(&self, registry: super::ast::BlockRegistry) -> RenderContext {
        RenderContext {
            escaper: self.inner.escaper.clone(),
            concurrency: self.inner.config.max_concurrent_resolutions,
            registry,
        }
    }

    /// Read and parse a template file
    ///
    /// Relative names resolve against the configured directory; a name with
    /// no extension gets the configured one.
    pub async fn create(&self, filename: impl AsRef<Path>) -> Result<View> {
        let path = self.resolve_path(filename);
        let text = self.inner.loader.read(&path).await?;
        log::debug!("Creating view from '{}'", path.display());

        self.create_from_string(&text)
            .map_err(|e| e.with_context(format!("Failed to parse template '{}'", path.display())))
    }

    /// Parse a template from text
    pub fn create_from_string(&self, text: &str) -> Result<View> {
        let (root, registry) = Parser::new().parse(text)?;
        Ok(View::new(self.clone(), root, registry))
    }
}

/// Builder for Engine configuration
pub struct EngineBuilder {
    config: EngineConfig,
    loader: Option<Arc<dyn TemplateLoader>>,
    escaper: Escaper,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            loader: None,
            escaper: Escaper::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn directory(mut self, directory: &str) -> Self {
        self.config.directory = directory.to_string();
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.config.extension = extension.to_string();
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    pub fn max_concurrent_resolutions(mut self, limit: usize) -> Self {
        self.config.max_concurrent_resolutions = limit;
        self
    }

    pub fn escaper(mut self, escaper: Escaper) -> Self {
        self.escaper = escaper;
        self
    }

    /// Replace the file loader, e.g. with a [`super::loader::MemoryLoader`]
    pub fn loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let loader = match self.loader {
            Some(loader) => loader,
            None if self.config.cache_enabled => Arc::new(FileLoader::shared()),
            None => Arc::new(FileLoader::uncached()),
        };

        Ok(Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                loader,
                escaper: self.escaper,
            }),
        })
    }
}
