use super::ast::{Block, BlockRegistry, WaitHandle};
use super::engine::Engine;
use super::parser::Parser;
use super::renderer::{render_block, RenderStream};
use super::value::{row, row_from_json, start_shared, DataSource, Mask, Row, Value};
use crate::error::{Error, Result};
use futures::future::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

struct ViewInner {
    root: Arc<Block>,
    registry: BlockRegistry,
    engine: Engine,
}

/// A parsed template, ready to be filled in and rendered
///
/// Blocks are addressed by qualified name (`outer:inner`); methods without a
/// block argument target the root. Addressing a block that does not exist is
/// a silent no-op, so calls can always be chained.
#[derive(Clone)]
pub struct View {
    inner: Arc<ViewInner>,
}

impl View {
    pub(crate) fn new(engine: Engine, root: Arc<Block>, registry: BlockRegistry) -> Self {
        Self {
            inner: Arc::new(ViewInner {
                root,
                registry,
                engine,
            }),
        }
    }

    pub fn root(&self) -> &Arc<Block> {
        &self.inner.root
    }

    /// Look up a block by qualified name; `""` is the root
    pub fn block(&self, name: &str) -> Option<Arc<Block>> {
        let block = self.inner.registry.get(name);
        if block.is_none() {
            log::debug!("No block named '{}', ignoring", name);
        }
        block
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    /// Qualified names of every block in the tree, root excluded
    pub fn block_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    // Variables

    pub fn set<I, K, V>(&self, vars: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.set_in("", vars)
    }

    /// Merge variables into a block's table
    pub fn set_in<I, K, V>(&self, block: &str, vars: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if let Some(target) = self.block(block) {
            target.merge_vars(row(vars));
        }
        self
    }

    pub fn set_json<T: Serialize>(&self, data: &T) -> Result<&Self> {
        self.set_json_in("", data)
    }

    /// Merge the members of anything serializing to a JSON object
    pub fn set_json_in<T: Serialize>(&self, block: &str, data: &T) -> Result<&Self> {
        if let Some(target) = self.block(block) {
            let json = serde_json::to_value(data)?;
            let vars = row_from_json(json)
                .map_err(|e| e.with_context("set_json expects data that serializes to an object"))?;
            target.merge_vars(vars);
        }
        Ok(self)
    }

    pub fn set_deferred<F, E>(&self, future: F) -> &Self
    where
        F: Future<Output = std::result::Result<Row, E>> + Send + 'static,
        E: Into<Error> + 'static,
    {
        self.set_deferred_in("", future)
    }

    /// Assign variables once `future` settles
    ///
    /// The future joins the block's wait set, so the block does not start
    /// rendering until its variables are in place. A failure keeps the
    /// block from rendering and is reported in its place.
    pub fn set_deferred_in<F, E>(&self, block: &str, future: F) -> &Self
    where
        F: Future<Output = std::result::Result<Row, E>> + Send + 'static,
        E: Into<Error> + 'static,
    {
        if let Some(target) = self.block(block) {
            let weak = Arc::downgrade(&target);
            let handle: WaitHandle = start_shared(
                async move {
                    let vars = future.await.map_err(|e: E| -> Error { e.into() })?;
                    if let Some(block) = weak.upgrade() {
                        block.merge_vars(vars);
                    }
                    Ok::<(), Error>(())
                }
                .boxed(),
            );
            target.add_wait(handle);
        }
        self
    }

    /// Attach a data source so the block renders once per row
    pub fn set_iterator(&self, block: &str, source: impl Into<DataSource>) -> &Self {
        if let Some(target) = self.block(block) {
            target.set_data_source(source.into());
        }
        self
    }

    // Visibility

    /// Hide a block; nothing inside it is resolved or emitted
    pub fn remove(&self, block: &str) -> &Self {
        if let Some(target) = self.block(block) {
            target.set_visible(false);
        }
        self
    }

    pub fn restore(&self, block: &str) -> &Self {
        if let Some(target) = self.block(block) {
            target.set_visible(true);
        }
        self
    }

    // Masks

    pub fn add_mask<F>(&self, name: &str, mask: F) -> &Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.add_mask_in("", name, mask)
    }

    /// Register a mask visible to the block and its descendants
    pub fn add_mask_in<F>(&self, block: &str, name: &str, mask: F) -> &Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        if let Some(target) = self.block(block) {
            let mask: Mask = Arc::new(mask);
            target.add_mask(name, mask);
        }
        self
    }

    pub fn remove_mask(&self, name: &str) -> &Self {
        self.remove_mask_in("", name)
    }

    pub fn remove_mask_in(&self, block: &str, name: &str) -> &Self {
        if let Some(target) = self.block(block) {
            target.remove_mask(name);
        }
        self
    }

    // Wait set

    pub fn wait_until<F, T, E>(&self, future: F) -> &Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: 'static,
        E: Into<Error> + 'static,
    {
        self.wait_until_in("", future)
    }

    /// Hold back a block (and everything inside it) until `future` settles
    pub fn wait_until_in<F, T, E>(&self, block: &str, future: F) -> &Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: 'static,
        E: Into<Error> + 'static,
    {
        if let Some(target) = self.block(block) {
            let handle: WaitHandle = start_shared(
                future
                    .map(|result| result.map(|_| ()).map_err(|e: E| -> Error { e.into() }))
                    .boxed(),
            );
            target.add_wait(handle);
        }
        self
    }

    // Includes

    /// Read a template file and bind it in place of `placeholder`
    ///
    /// The file is parsed into a child of the target block (the root when
    /// `block` is `None`), so its blocks are addressable as
    /// `target:placeholder:...` afterwards. A read or parse failure leaves
    /// the view untouched.
    pub async fn load(
        &self,
        filename: impl AsRef<Path>,
        placeholder: &str,
        block: Option<&str>,
    ) -> Result<&Self> {
        let Some(target) = self.block(block.unwrap_or("")) else {
            return Ok(self);
        };

        let engine = &self.inner.engine;
        let path = engine.resolve_path(filename);
        let text = engine.loader().read(&path).await?;

        let (child, registry) = Parser::new()
            .parse_child(&text, target.qualified_name(), placeholder)
            .map_err(|e| e.with_context(format!("Failed to parse template '{}'", path.display())))?;

        log::debug!(
            "Loaded '{}' into '{}' as block '{}'",
            path.display(),
            target.display_name(),
            child.display_name()
        );

        self.inner.registry.remove_subtree(child.qualified_name());
        self.inner.registry.absorb(registry);
        target.set_var(placeholder, Value::Block(child));
        Ok(self)
    }

    // Output

    /// Start rendering
    ///
    /// The stream is returned before anything resolves; chunks arrive as
    /// the scheduler commits them, always in template order.
    pub fn to_stream(&self) -> RenderStream {
        let ctx = Arc::new(
            self.inner
                .engine
                .render_context(self.inner.registry.clone()),
        );
        RenderStream::new(render_block(ctx, Arc::clone(&self.inner.root), None))
    }

    /// Render the whole view into one string, failing on the first error
    pub async fn render_to_string(&self) -> Result<String> {
        self.to_stream().into_string().await
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("blocks", &self.inner.registry.names())
            .finish()
    }
}
