use super::ast::Placeholder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// `{name}`, `{{name}}` and the unbalanced variants. The name starts with a
/// letter and ends with a letter or digit; a single letter is a valid name.
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\{\{?)([A-Za-z](?:[A-Za-z0-9_.|\-]*[A-Za-z0-9])?)(\}\}?)")
        .expect("Lexer: Invalid tag pattern regex")
});

/// `{#name}` and `{/name}`
static BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{([#/])([A-Za-z][A-Za-z0-9_\-]*)\}").expect("Lexer: Invalid block pattern regex")
});

const COMMENT_OPEN: &str = "{/*";
const COMMENT_CLOSE: &str = "*/}";
const CDATA_OPEN: &str = "{{CDATA[";
const CDATA_CLOSE: &str = "]}}";

/// Token types for block templates
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal text run
    Text(String),

    /// `{name}` / `{{name}}` with optional deep path and mask chain
    Placeholder(Placeholder),

    /// `{#name}`
    BlockOpen(String),

    /// `{/name}`
    BlockClose(String),

    /// `{{CDATA[ ... ]}}` inner text, verbatim
    Cdata(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at {}:{}", self.kind, self.line, self.column)
    }
}

/// A marker found while scanning: `start..end` is the span it consumes.
/// `kind` is `None` for comments, which produce no token.
struct Marker {
    start: usize,
    end: usize,
    kind: Option<TokenKind>,
}

/// Lexer for block templates
///
/// Yields tokens lazily, left to right. Comments are dropped, everything
/// that is not a recognised marker comes out as text.
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Move past `input[position..to]`, keeping line/column in step
    fn advance_to(&mut self, to: usize) {
        for ch in self.input[self.position..to].chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.position = to;
    }

    /// Find the next marker at or after `from`
    fn find_marker(&self, from: usize) -> Option<Marker> {
        let mut search = from;

        while let Some(offset) = self.input[search..].find('{') {
            let at = search + offset;
            if let Some(marker) = self.marker_at(at) {
                return Some(marker);
            }
            search = at + 1;
        }

        None
    }

    /// Try every marker grammar anchored at `at`, which holds a `{`
    fn marker_at(&self, at: usize) -> Option<Marker> {
        let rest = &self.input[at..];

        if rest.starts_with(COMMENT_OPEN) {
            if let Some(close) = rest[COMMENT_OPEN.len()..].find(COMMENT_CLOSE) {
                let mut end = at + COMMENT_OPEN.len() + close + COMMENT_CLOSE.len();
                // A comment swallows one trailing newline
                if self.input[end..].starts_with("\r\n") {
                    end += 2;
                } else if self.input[end..].starts_with('\n') {
                    end += 1;
                }
                return Some(Marker {
                    start: at,
                    end,
                    kind: None,
                });
            }
        }

        if let Some(body) = rest.strip_prefix(CDATA_OPEN) {
            if let Some(close) = body.find(CDATA_CLOSE) {
                return Some(Marker {
                    start: at,
                    end: at + CDATA_OPEN.len() + close + CDATA_CLOSE.len(),
                    kind: Some(TokenKind::Cdata(body[..close].to_string())),
                });
            }
        }

        if let Some(caps) = BLOCK_PATTERN.captures(rest) {
            let name = caps[2].to_string();
            let kind = if &caps[1] == "#" {
                TokenKind::BlockOpen(name)
            } else {
                TokenKind::BlockClose(name)
            };
            return Some(Marker {
                start: at,
                end: at + caps[0].len(),
                kind: Some(kind),
            });
        }

        let caps = TAG_PATTERN.captures(rest)?;
        let open = caps[1].len();
        let close = caps[3].len();
        let name = &caps[2];
        let full = caps[0].len();

        let (start, end, escape) = match (open, close) {
            (2, 2) => (at, at + full, false),
            // `{{name}`: the first brace is literal text before the tag
            (2, _) => (at + 1, at + full, true),
            // `{name}}`: the last brace is literal text after the tag
            (_, 2) => (at, at + full - 1, true),
            _ => (at, at + full, true),
        };

        Some(Marker {
            start,
            end,
            kind: Some(TokenKind::Placeholder(Placeholder::parse(name, escape))),
        })
    }

    /// Tokenize the entire input
    pub fn tokenize(self) -> Vec<Token> {
        self.collect()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if self.position >= self.input.len() {
                return None;
            }

            let line = self.line;
            let column = self.column;

            match self.find_marker(self.position) {
                Some(marker) if marker.start > self.position => {
                    let text = self.input[self.position..marker.start].to_string();
                    self.advance_to(marker.start);
                    return Some(Token::new(TokenKind::Text(text), line, column));
                }
                Some(marker) => {
                    self.advance_to(marker.end);
                    match marker.kind {
                        Some(kind) => return Some(Token::new(kind, line, column)),
                        None => continue,
                    }
                }
                None => {
                    let text = self.input[self.position..].to_string();
                    self.advance_to(self.input.len());
                    return Some(Token::new(TokenKind::Text(text), line, column));
                }
            }
        }
    }
}
