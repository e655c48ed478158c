//! Blockstream - a logicless streaming template engine
//!
//! Templates are plain text with a handful of markers:
//! - `{name}` / `{{name}}` escaped and raw placeholders
//! - `{name.path|mask}` deep lookups piped through masks
//! - `{#name}...{/name}` named blocks that can be hidden, repeated per row
//!   or filled from a separate file
//!
//! Values may be plain data, functions, futures or byte streams. Rendering
//! produces a byte stream whose chunks always arrive in template order, even
//! when later placeholders resolve first.
//!
//! ```no_run
//! # async fn demo() -> blockstream::Result<()> {
//! let view = blockstream::create_from_string("<ul>{#item}<li>{name}</li>{/item}</ul>")?;
//! view.set_iterator("item", serde_json::json!([{"name": "a"}, {"name": "b"}]));
//! assert_eq!(view.render_to_string().await?, "<ul><li>a</li><li>b</li></ul>");
//! # Ok(())
//! # }
//! ```

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod error;
pub mod escape;
pub mod views;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use escape::{Escaper, HtmlEscaper};
pub use views::{DataSource, Engine, RenderStream, Row, Value, View};

use std::path::Path;

/// Read and parse a template file with the default engine
pub async fn create(filename: impl AsRef<Path>) -> Result<View> {
    views::ENGINE.create(filename).await
}

/// Parse a template from text with the default engine
pub fn create_from_string(text: &str) -> Result<View> {
    views::ENGINE.create_from_string(text)
}

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::views::{row, DataSource, Engine, RenderStream, Row, Value, View};
    pub use futures::StreamExt;
}
