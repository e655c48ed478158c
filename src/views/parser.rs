use super::ast::{qualify, Block, BlockRegistry, Placeholder, Segment};
use super::lexer::{Lexer, Token, TokenKind};
use super::value::Value;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::sync::Arc;

/// Synthetic variables holding CDATA text. Placeholder names must start with
/// a letter, so a template can never reference these directly.
const CDATA_PREFIX: &str = "#cdata";

/// Builds a tree of blocks from template text
///
/// Blocks are registered into a private registry while parsing and only
/// handed to the caller once the whole tree parsed cleanly, so a failed
/// parse never leaves half a tree behind.
pub struct Parser {
    registry: BlockRegistry,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            registry: BlockRegistry::new(),
        }
    }

    /// Parse a whole template into a root block
    pub fn parse(self, input: &str) -> Result<(Arc<Block>, BlockRegistry)> {
        let tokens = Lexer::new(input).tokenize();
        let root = self.build(&tokens, "", String::new(), None)?;
        log::debug!(
            "Parsed template into {} block(s)",
            self.registry.len().saturating_sub(1)
        );
        Ok((root, self.registry))
    }

    /// Parse text into a block named `name` nested under `parent`
    pub fn parse_child(
        self,
        input: &str,
        parent: &str,
        name: &str,
    ) -> Result<(Arc<Block>, BlockRegistry)> {
        let tokens = Lexer::new(input).tokenize();
        let block = self.build(
            &tokens,
            name,
            qualify(parent, name),
            Some(parent.to_string()),
        )?;
        Ok((block, self.registry))
    }

    fn build(
        &self,
        tokens: &[Token],
        name: &str,
        qualified_name: String,
        parent: Option<String>,
    ) -> Result<Arc<Block>> {
        let mut content: Vec<Segment> = Vec::new();
        let mut vars: IndexMap<String, Value> = IndexMap::new();
        let mut cdata_count = 0;
        let mut position = 0;

        while position < tokens.len() {
            let token = &tokens[position];
            match &token.kind {
                TokenKind::Text(text) => push_text(&mut content, text),

                TokenKind::Placeholder(placeholder) => {
                    content.push(Segment::Placeholder(placeholder.clone()))
                }

                TokenKind::Cdata(raw) => {
                    let var = format!("{}{}", CDATA_PREFIX, cdata_count);
                    cdata_count += 1;
                    vars.insert(var.clone(), Value::Text(raw.clone()));
                    content.push(Segment::Placeholder(Placeholder::raw(var)));
                }

                TokenKind::BlockOpen(child) => {
                    let close = find_close(tokens, position, child).ok_or_else(|| {
                        Error::parse(
                            format!("Block '{}' is never closed", child),
                            token.line,
                            token.column,
                        )
                    })?;

                    if vars.contains_key(child) {
                        return Err(Error::parse(
                            format!(
                                "Block '{}' is defined twice in '{}'",
                                child,
                                display(&qualified_name)
                            ),
                            token.line,
                            token.column,
                        ));
                    }

                    let block = self.build(
                        &tokens[position + 1..close],
                        child,
                        qualify(&qualified_name, child),
                        Some(qualified_name.clone()),
                    )?;
                    vars.insert(child.clone(), Value::Block(block));
                    content.push(Segment::Placeholder(Placeholder::raw(child.clone())));

                    position = close + 1;
                    continue;
                }

                TokenKind::BlockClose(child) => {
                    return Err(Error::parse(
                        format!("Closing tag for '{}' has no matching opening tag", child),
                        token.line,
                        token.column,
                    ));
                }
            }
            position += 1;
        }

        let block = Arc::new(Block::new(name, qualified_name, parent, content, vars));
        self.registry.register(Arc::clone(&block));
        Ok(block)
    }
}

/// Index of the `{/name}` pairing with the `{#name}` at `open`, skipping
/// over nested blocks of the same name
fn find_close(tokens: &[Token], open: usize, name: &str) -> Option<usize> {
    let mut depth = 0usize;

    for (offset, token) in tokens[open + 1..].iter().enumerate() {
        match &token.kind {
            TokenKind::BlockOpen(n) if n == name => depth += 1,
            TokenKind::BlockClose(n) if n == name => {
                if depth == 0 {
                    return Some(open + 1 + offset);
                }
                depth -= 1;
            }
            _ => {}
        }
    }

    None
}

/// Append text, merging with a preceding text run
fn push_text(content: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(last)) = content.last_mut() {
        last.push_str(text);
    } else {
        content.push(Segment::Text(text.to_string()));
    }
}

fn display(qualified_name: &str) -> &str {
    if qualified_name.is_empty() {
        "<root>"
    } else {
        qualified_name
    }
}
