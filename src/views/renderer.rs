use super::ast::{Block, BlockRegistry, Placeholder, Segment, WaitHandle};
use super::resolver;
use super::scope::Scope;
use super::value::{row_from_json, ByteStream, DataSource, Row, RowStream, Value};
use crate::error::{Error, Result};
use crate::escape::Escaper;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Settings shared by every block of one render
pub(crate) struct RenderContext {
    pub escaper: Escaper,
    pub concurrency: usize,
    pub registry: BlockRegistry,
}

/// Rendered output of a view
///
/// Chunks arrive in template order. A failed placeholder shows up as an
/// `Err` item where its output would have been; the chunks after it keep
/// coming.
pub struct RenderStream {
    inner: ByteStream,
}

impl RenderStream {
    pub(crate) fn new(inner: ByteStream) -> Self {
        Self { inner }
    }

    /// Drain the stream into one string, failing on the first error
    pub async fn into_string(mut self) -> Result<String> {
        let mut output = Vec::new();
        while let Some(chunk) = self.inner.next().await {
            output.extend_from_slice(&chunk?);
        }

        String::from_utf8(output)
            .map_err(|e| Error::template(format!("Rendered output is not valid UTF-8: {}", e)))
    }
}

impl Stream for RenderStream {
    type Item = Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

fn chunk(bytes: Vec<u8>) -> ByteStream {
    stream::once(future::ready(Ok(bytes))).boxed()
}

fn failure(err: Error) -> ByteStream {
    stream::once(future::ready(Err(err))).boxed()
}

fn nothing() -> ByteStream {
    stream::empty().boxed()
}

/// End a stream right after its first error
fn stop_after_error<T: Send + 'static>(
    stream: BoxStream<'static, Result<T>>,
) -> BoxStream<'static, Result<T>> {
    stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// Wait for the block's wait set and those of all its ancestors
async fn wait_for(registry: &BlockRegistry, block: &Arc<Block>) -> Result<()> {
    let pending: Vec<WaitHandle> = registry
        .lineage(block)
        .iter()
        .flat_map(|b| b.wait_set())
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    log::debug!(
        "Block '{}' waiting for {} pending operation(s)",
        block.display_name(),
        pending.len()
    );
    future::try_join_all(pending).await.map(|_| ())
}

/// Render a block into a byte stream
///
/// An invisible block renders nothing, and nothing inside it is resolved.
/// Otherwise the block waits for its wait set, then renders its content
/// once, or once per row when a data source is attached. `parent` is the
/// scope the block falls back to for variables and masks.
pub(crate) fn render_block(
    ctx: Arc<RenderContext>,
    block: Arc<Block>,
    parent: Option<Arc<Scope>>,
) -> ByteStream {
    stream::once(async move {
        if !block.is_visible() {
            log::trace!("Skipping hidden block '{}'", block.display_name());
            return nothing();
        }

        if let Err(err) = wait_for(&ctx.registry, &block).await {
            log::warn!(
                "Block '{}' will not render, a pending operation failed: {}",
                block.display_name(),
                err
            );
            return failure(err.for_placeholder(block.display_name()));
        }

        let snapshot = block.snapshot();
        if !snapshot.visible {
            return nothing();
        }

        let scope = Arc::new(Scope::new(snapshot.vars, snapshot.masks, parent));
        match snapshot.data_source {
            None => render_content(ctx, block, scope),
            Some(source) => render_rows(ctx, block, scope, source),
        }
    })
    .flatten()
    .boxed()
}

/// Drain a block's content in order
///
/// Up to `ctx.concurrency` segments resolve at the same time, but their
/// output is committed strictly in content order. A nested block's whole
/// output is emitted before the next segment's; its deferred values and
/// wait sets were already started when they were assigned.
fn render_content(ctx: Arc<RenderContext>, block: Arc<Block>, scope: Arc<Scope>) -> ByteStream {
    let limit = ctx.concurrency.max(1);

    stream::iter(0..block.content().len())
        .map(move |index| {
            render_segment(
                Arc::clone(&ctx),
                Arc::clone(&block),
                Arc::clone(&scope),
                index,
            )
        })
        .buffered(limit)
        .flatten()
        .boxed()
}

fn render_segment(
    ctx: Arc<RenderContext>,
    block: Arc<Block>,
    scope: Arc<Scope>,
    index: usize,
) -> BoxFuture<'static, ByteStream> {
    async move {
        match block.content().get(index) {
            Some(Segment::Text(text)) => chunk(text.clone().into_bytes()),
            Some(Segment::Placeholder(placeholder)) => {
                render_placeholder(ctx, scope, placeholder).await
            }
            None => nothing(),
        }
    }
    .boxed()
}

async fn render_placeholder(
    ctx: Arc<RenderContext>,
    scope: Arc<Scope>,
    placeholder: &Placeholder,
) -> ByteStream {
    match resolver::resolve(&scope, placeholder).await {
        Ok(value) => emit(ctx, scope, placeholder, value),
        Err(err) => {
            log::warn!("Placeholder '{}' failed: {}", placeholder.name, err);
            failure(err.for_placeholder(&placeholder.name))
        }
    }
}

/// Turn a resolved value into output
fn emit(
    ctx: Arc<RenderContext>,
    scope: Arc<Scope>,
    placeholder: &Placeholder,
    value: Value,
) -> ByteStream {
    match value {
        Value::Null => nothing(),
        Value::Stream(source) => match source.take() {
            Some(bytes) => {
                let name = placeholder.name.clone();
                stop_after_error(
                    bytes
                        .map(move |item| item.map_err(|e| e.for_placeholder(&name)))
                        .boxed(),
                )
            }
            None => {
                log::debug!(
                    "Stream bound to '{}' was already consumed",
                    placeholder.name
                );
                nothing()
            }
        },
        Value::Block(block) => render_block(ctx, block, Some(scope)),
        other => match resolver::encode(&other, placeholder.escape, &ctx.escaper) {
            Some(bytes) if !bytes.is_empty() => chunk(bytes),
            _ => nothing(),
        },
    }
}

/// Render one instance of the block per row, one row fully after another
fn render_rows(
    ctx: Arc<RenderContext>,
    block: Arc<Block>,
    scope: Arc<Scope>,
    source: DataSource,
) -> ByteStream {
    let name = block.display_name().to_string();

    let rows: RowStream = match source {
        DataSource::Rows(rows) => stream::iter(rows.as_ref().clone().into_iter().map(Ok)).boxed(),
        DataSource::Stream(source) => match source.take() {
            Some(rows) => rows,
            None => {
                log::warn!("Row stream for block '{}' was already consumed", name);
                stream::empty().boxed()
            }
        },
        DataSource::Value(value) => stream::once(rows_from_value(value))
            .flat_map(|result| match result {
                Ok(rows) => stream::iter(rows.into_iter().map(Ok)).boxed(),
                Err(err) => stream::once(future::ready(Err(err))).boxed(),
            })
            .boxed(),
    };

    stop_after_error(rows)
        .enumerate()
        .map(move |(index, row)| match row {
            Ok(row) => {
                let row_scope = Arc::new(Scope::for_row(index, row, Arc::clone(&scope)));
                render_content(Arc::clone(&ctx), Arc::clone(&block), row_scope)
            }
            Err(err) => {
                log::warn!("Data source for block '{}' failed: {}", name, err);
                failure(err.for_placeholder(&name))
            }
        })
        .flatten()
        .boxed()
}

async fn rows_from_value(value: Value) -> Result<Vec<Row>> {
    match resolver::settle(value).await? {
        Value::Json(serde_json::Value::Array(items)) => {
            items.into_iter().map(row_from_json).collect()
        }
        other => Err(Error::unsupported_data_source(format!(
            "expected an array of rows, got {}",
            other.kind()
        ))),
    }
}
