//! Streaming block templates
//!
//! Template text is tokenized ([`lexer`]), built into a tree of named blocks
//! ([`parser`]), filled in through a [`View`], and rendered by the scheduler
//! in [`renderer`] as an ordered byte stream.

pub mod ast;
pub mod engine;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod renderer;
pub mod resolver;
pub mod scope;
pub mod value;
pub mod view;

pub use ast::{Block, BlockRegistry, Placeholder, Segment, QUALIFIED_NAME_SEPARATOR};
pub use engine::{Engine, EngineBuilder, ENGINE};
pub use loader::{FileLoader, MemoryLoader, TemplateLoader};
pub use renderer::RenderStream;
pub use value::{row, ByteStream, DataSource, Mask, Row, RowStream, Value};
pub use view::View;
