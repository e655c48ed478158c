use super::ast::Block;
use crate::error::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Output chunks of a render
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Incrementally arriving rows of a data source
pub type RowStream = BoxStream<'static, Result<Row>>;

/// One row of a data source: variable name to value
pub type Row = IndexMap<String, Value>;

/// Synchronous transform applied to a resolved value before emission
pub type Mask = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A value that can be awaited by any number of placeholders
pub type SharedValue = Shared<BoxFuture<'static, Result<Value>>>;

/// Start `future` on the current tokio runtime and share its result
///
/// The work runs from the moment the value is created, not from the moment
/// a placeholder first awaits it. Outside a runtime the future stays lazy
/// and runs when first polled.
pub(crate) fn start_shared<T>(
    future: BoxFuture<'static, Result<T>>,
) -> Shared<BoxFuture<'static, Result<T>>>
where
    T: Clone + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            let task = runtime.spawn(future);
            async move {
                task.await.unwrap_or_else(|e| {
                    Err(Error::internal(format!("Pending value task failed: {}", e)))
                })
            }
            .boxed()
            .shared()
        }
        Err(_) => future.shared(),
    }
}

/// A stream that can be taken exactly once.
///
/// Cloning shares the same underlying stream; whoever takes it first
/// gets the bytes, later takers get nothing.
pub struct TakeOnce<S>(Arc<Mutex<Option<S>>>);

impl<S> TakeOnce<S> {
    pub fn new(inner: S) -> Self {
        Self(Arc::new(Mutex::new(Some(inner))))
    }

    pub fn take(&self) -> Option<S> {
        match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl<S> Clone for TakeOnce<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// A variable value
///
/// Terminal values (`Null`, `Text`, `Bytes`, `Json`, `Map`) render
/// directly; `Lazy` and `Deferred` settle into another value at render time;
/// `Stream` and `Block` are spliced into the output as they are.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent, renders nothing
    #[default]
    Null,
    Text(String),
    /// Raw buffer
    Bytes(Vec<u8>),
    /// Numbers, booleans and structured data
    Json(serde_json::Value),
    /// Object whose members may themselves be lazy or deferred
    Map(Arc<Row>),
    /// Zero-argument function invoked at render time
    Lazy(Arc<dyn Fn() -> Value + Send + Sync>),
    /// Asynchronous value
    Deferred(SharedValue),
    /// Byte stream spliced raw into the output
    Stream(TakeOnce<ByteStream>),
    /// A parsed block rendered in place
    Block(Arc<Block>),
}

impl Value {
    /// Wrap a function that produces the value when the placeholder renders
    pub fn lazy<F, V>(f: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Value::Lazy(Arc::new(move || f().into()))
    }

    /// Wrap a fallible future; a failure is reported against the placeholder
    ///
    /// Inside a tokio runtime the future starts running right away.
    pub fn deferred<F, V, E>(future: F) -> Self
    where
        F: Future<Output = std::result::Result<V, E>> + Send + 'static,
        V: Into<Value> + 'static,
        E: Into<Error> + 'static,
    {
        Value::Deferred(start_shared(
            future
                .map(|result| result.map(|v: V| v.into()).map_err(|e: E| e.into()))
                .boxed(),
        ))
    }

    /// Wrap an infallible future
    pub fn from_future<F, V>(future: F) -> Self
    where
        F: Future<Output = V> + Send + 'static,
        V: Into<Value> + 'static,
    {
        Value::Deferred(start_shared(future.map(|value| Ok(value.into())).boxed()))
    }

    /// Wrap a byte stream; its chunks bypass masks and escaping
    pub fn stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: Into<Vec<u8>> + 'static,
        E: Into<Error> + 'static,
    {
        let stream: ByteStream = stream
            .map_ok(|chunk: B| -> Vec<u8> { chunk.into() })
            .map_err(|err: E| -> Error { err.into() })
            .boxed();
        Value::Stream(TakeOnce::new(stream))
    }

    /// Build a `Map` from key/value pairs
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Json(serde_json::Value::Null))
    }

    /// Text form of a terminal scalar; `None` for values that have no
    /// text form (absent, maps, and anything still unresolved)
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Json(json) => json_to_text(json),
            _ => None,
        }
    }

    /// Short type name for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Map(_) => "map",
            Value::Lazy(_) => "function",
            Value::Deferred(_) => "deferred",
            Value::Stream(_) => "stream",
            Value::Block(_) => "block",
        }
    }
}

fn json_to_text(json: &serde_json::Value) -> Option<String> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Value::Json(j) => f.debug_tuple("Json").field(j).finish(),
            Value::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Value::Block(b) => f.debug_tuple("Block").field(&b.qualified_name()).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::Json(json)
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        Value::Map(Arc::new(row))
    }
}

impl From<Arc<Block>> for Value {
    fn from(block: Arc<Block>) -> Self {
        Value::Block(block)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

macro_rules! impl_from_json_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Json(serde_json::Value::from(v))
                }
            }
        )*
    };
}

impl_from_json_scalar!(bool, i32, i64, u32, u64, usize, f64);

/// Rows driving per-row repetition of a block
#[derive(Clone)]
pub enum DataSource {
    /// Rows available up front, rendered in index order
    Rows(Arc<Vec<Row>>),
    /// Rows rendered in arrival order; can be consumed once
    Stream(TakeOnce<RowStream>),
    /// A value that must settle to an array of objects
    Value(Value),
}

impl DataSource {
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Row, E>> + Send + 'static,
        E: Into<Error> + 'static,
    {
        let stream: RowStream = stream.map_err(|err: E| -> Error { err.into() }).boxed();
        DataSource::Stream(TakeOnce::new(stream))
    }

    /// Rows produced by a future; the result must be a JSON array of objects
    pub fn deferred<F, E>(future: F) -> Self
    where
        F: Future<Output = std::result::Result<serde_json::Value, E>> + Send + 'static,
        E: Into<Error> + 'static,
    {
        DataSource::Value(Value::deferred(future))
    }
}

impl From<Vec<Row>> for DataSource {
    fn from(rows: Vec<Row>) -> Self {
        DataSource::Rows(Arc::new(rows))
    }
}

impl From<serde_json::Value> for DataSource {
    fn from(json: serde_json::Value) -> Self {
        DataSource::Value(Value::Json(json))
    }
}

impl From<Value> for DataSource {
    fn from(value: Value) -> Self {
        DataSource::Value(value)
    }
}

/// Convert one JSON object into a row
pub fn row_from_json(json: serde_json::Value) -> Result<Row> {
    match json {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, Value::Json(v)))
            .collect()),
        other => Err(Error::unsupported_data_source(format!(
            "rows must be objects, got {}",
            other
        ))),
    }
}

/// Build a row from key/value pairs
pub fn row<I, K, V>(entries: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_scalar_text() {
        assert_eq!(Value::from("a").to_text().as_deref(), Some("a"));
        assert_eq!(Value::from(42).to_text().as_deref(), Some("42"));
        assert_eq!(Value::from(true).to_text().as_deref(), Some("true"));
        assert_eq!(Value::from(1.5).to_text().as_deref(), Some("1.5"));
        assert_eq!(Value::from(json!([1, 2])).to_text().as_deref(), Some("[1,2]"));
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::from(json!(null)).to_text(), None);
        assert!(Value::from(None::<String>).is_null());
    }

    #[test]
    fn test_once_stream_taken_once() {
        let value = Value::stream(futures::stream::iter(vec![Ok::<_, Error>("x")]));
        let Value::Stream(once) = value.clone() else {
            panic!("Expected stream value");
        };
        assert!(once.take().is_some());
        let Value::Stream(again) = value else {
            panic!("Expected stream value");
        };
        assert!(again.take().is_none());
    }

    #[tokio::test]
    async fn test_deferred_runs_before_it_is_awaited() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let value = Value::from_future(async move {
            flag.store(true, Ordering::SeqCst);
            "done"
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.load(Ordering::SeqCst));

        let Value::Deferred(shared) = value else {
            panic!("Expected deferred value");
        };
        assert_eq!(shared.await.unwrap().to_text().as_deref(), Some("done"));
    }

    #[test]
    fn test_deferred_outside_runtime_stays_lazy() {
        let value = Value::deferred(async { Ok::<_, Error>("later") });
        let Value::Deferred(shared) = value else {
            panic!("Expected deferred value");
        };
        let settled = futures::executor::block_on(shared).unwrap();
        assert_eq!(settled.to_text().as_deref(), Some("later"));
    }

    #[test]
    fn test_row_from_json() {
        let row = row_from_json(json!({"a": 1, "b": "two"})).unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row["b"].to_text().as_deref(), Some("two"));

        let err = row_from_json(json!("nope")).unwrap_err();
        assert_eq!(err.error_code(), "E_UNSUPPORTED_DATA_SOURCE");
    }
}
