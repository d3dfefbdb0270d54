//! KeyValueText: the quoted key/value tree format steamcmd prints.
//!
//! ```text
//! "740"
//! {
//!     "common"
//!     {
//!         "name"      "Counter-Strike Global Offensive - Dedicated Server"
//!         "type"      "Tool"
//!     }
//! }
//! ```
//!
//! Keys are unique per level in the parsed tree: when the input repeats a
//! key, the last occurrence wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Deepest block nesting accepted by [`parse`].
pub const MAX_DEPTH: usize = 256;

/// A malformed document. Parsing never yields a partial tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line where the problem was detected.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure reading a KeyValueText file from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

/// A value in the tree: either a leaf string or a nested block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Tree(KeyValueTree),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Tree(_) => None,
        }
    }

    #[must_use]
    pub const fn as_tree(&self) -> Option<&KeyValueTree> {
        match self {
            Self::Tree(t) => Some(t),
            Self::String(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<KeyValueTree> for Value {
    fn from(t: KeyValueTree) -> Self {
        Self::Tree(t)
    }
}

/// One nesting level of a KeyValueText document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyValueTree {
    entries: BTreeMap<String, Value>,
}

impl KeyValueTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_tree(&self, key: &str) -> Option<&KeyValueTree> {
        self.get(key).and_then(Value::as_tree)
    }

    /// Walk nested blocks, e.g. `lookup(&["common", "name"])`.
    #[must_use]
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut node = self;
        for key in parents {
            node = node.get_tree(key)?;
        }
        node.get(last)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for KeyValueTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize(self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Open,
    Close,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    /// Next token with the line it started on, or `None` at end of input.
    fn next_token(&mut self) -> Result<Option<(Token, usize)>, ParseError> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };
            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '/' => {
                    self.chars.next();
                    if self.chars.peek() != Some(&'/') {
                        return Err(ParseError::new(self.line, "stray '/' outside of a string"));
                    }
                    // Line comment: skip up to (not including) the newline.
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some((Token::Open, self.line)));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some((Token::Close, self.line)));
                }
                '"' => {
                    self.chars.next();
                    let start = self.line;
                    return self.string(start).map(|s| Some((Token::Str(s), start)));
                }
                other => {
                    return Err(ParseError::new(
                        self.line,
                        format!("unexpected character '{other}', expected a quoted string or brace"),
                    ));
                }
            }
        }
    }

    fn string(&mut self, start: usize) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => {
                    return Err(ParseError::new(start, "unterminated string"));
                }
                Some('"') => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        if other == '\n' {
                            self.line += 1;
                        }
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(ParseError::new(start, "unterminated string")),
                },
                Some(c) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    out.push(c);
                }
            }
        }
    }
}

/// Parse a KeyValueText document into a tree.
pub fn parse(text: &str) -> Result<KeyValueTree, ParseError> {
    let mut lexer = Lexer::new(text);
    parse_block(&mut lexer, None, 0)
}

/// Read and parse a KeyValueText file such as `libraryfolders.vdf`.
pub fn load(path: &Path) -> Result<KeyValueTree, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse pairs until the closing brace (nested) or end of input (top level).
fn parse_block(
    lexer: &mut Lexer<'_>,
    opened_at: Option<usize>,
    depth: usize,
) -> Result<KeyValueTree, ParseError> {
    let mut tree = KeyValueTree::new();
    loop {
        let key = match lexer.next_token()? {
            None => {
                return match opened_at {
                    None => Ok(tree),
                    Some(line) => Err(ParseError::new(
                        lexer.line,
                        format!("unexpected end of input, block opened on line {line} is not closed"),
                    )),
                };
            }
            Some((Token::Close, line)) => {
                return match opened_at {
                    Some(_) => Ok(tree),
                    None => Err(ParseError::new(line, "unbalanced '}'")),
                };
            }
            Some((Token::Open, line)) => {
                return Err(ParseError::new(line, "expected a key, found '{'"));
            }
            Some((Token::Str(key), _)) => key,
        };

        let value = match lexer.next_token()? {
            None => {
                return Err(ParseError::new(
                    lexer.line,
                    format!("unexpected end of input, missing value for key \"{key}\""),
                ));
            }
            Some((Token::Str(s), _)) => Value::String(s),
            Some((Token::Open, line)) => {
                if depth >= MAX_DEPTH {
                    return Err(ParseError::new(line, "nesting too deep"));
                }
                Value::Tree(parse_block(lexer, Some(line), depth + 1)?)
            }
            Some((Token::Close, line)) => {
                return Err(ParseError::new(line, format!("missing value for key \"{key}\"")));
            }
        };
        tree.insert(key, value);
    }
}

/// Render a tree back to KeyValueText, tab-indented.
#[must_use]
pub fn serialize(tree: &KeyValueTree) -> String {
    let mut out = String::new();
    write_block(&mut out, tree, 0);
    out
}

fn write_block(out: &mut String, tree: &KeyValueTree, depth: usize) {
    let indent = "\t".repeat(depth);
    for (key, value) in tree.iter() {
        out.push_str(&indent);
        push_quoted(out, key);
        match value {
            Value::String(s) => {
                out.push_str("\t\t");
                push_quoted(out, s);
                out.push('\n');
            }
            Value::Tree(child) => {
                out.push('\n');
                out.push_str(&indent);
                out.push_str("{\n");
                write_block(out, child, depth + 1);
                out.push_str(&indent);
                out.push_str("}\n");
            }
        }
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}
