//! Minimal CSS selector support for querying an [`ObservedTree`](super::ObservedTree).
//!
//! Only the subset the host page queries need is supported: type selectors,
//! `.class`, `[attr]` and `[attr=value]` compounds, the descendant combinator
//! (whitespace), and comma-separated selector lists.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a selector string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,
    #[error("unexpected character '{found}' at offset {offset} in '{selector}'")]
    Unexpected {
        selector: String,
        found: char,
        offset: usize,
    },
    #[error("unterminated attribute selector in '{0}'")]
    UnterminatedAttribute(String),
}

/// A single attribute condition inside a compound selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMatch {
    pub name: String,
    pub value: Option<String>,
}

/// One compound selector such as `svg`, `rect.stoppable-stop` or `[lang]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeMatch>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.classes.is_empty() && self.attributes.is_empty()
    }
}

/// A chain of compounds joined by descendant combinators, e.g. `pre code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Complex {
    pub compounds: Vec<Compound>,
}

/// Parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut alternatives = Vec::new();
        let mut offset = input.len() - input.trim_start().len();
        for part in trimmed.split(',') {
            alternatives.push(parse_complex(input, part, offset)?);
            offset += part.len() + 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn alternatives(&self) -> &[Complex] {
        &self.alternatives
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_complex(full: &str, part: &str, base: usize) -> Result<Complex, SelectorError> {
    let mut compounds = Vec::new();
    let mut current = Compound::default();
    let mut chars = part.char_indices().peekable();

    let unexpected = |found: char, offset: usize| SelectorError::Unexpected {
        selector: full.to_string(),
        found,
        offset: base + offset,
    };

    while let Some((idx, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    compounds.push(std::mem::take(&mut current));
                }
            }
            '.' => {
                let mut class = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    class.push(next);
                    chars.next();
                }
                if class.is_empty() {
                    return Err(unexpected(c, idx));
                }
                current.classes.push(class);
            }
            '[' => {
                let mut body = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    body.push(next);
                }
                if !closed {
                    return Err(SelectorError::UnterminatedAttribute(full.to_string()));
                }
                let (name, value) = match body.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim().trim_matches(|q| q == '"' || q == '\'');
                        (name.trim().to_string(), Some(value.to_string()))
                    }
                    None => (body.trim().to_string(), None),
                };
                if name.is_empty() {
                    return Err(unexpected(c, idx));
                }
                current.attributes.push(AttributeMatch {
                    name: name.to_ascii_lowercase(),
                    value,
                });
            }
            c if is_ident_char(c) => {
                if current.tag.is_some() || !current.classes.is_empty() {
                    return Err(unexpected(c, idx));
                }
                let mut tag = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    tag.push(next);
                    chars.next();
                }
                current.tag = Some(tag.to_ascii_lowercase());
            }
            other => return Err(unexpected(other, idx)),
        }
    }

    if !current.is_empty() {
        compounds.push(current);
    }
    if compounds.is_empty() {
        return Err(SelectorError::Empty);
    }
    Ok(Complex { compounds })
}
