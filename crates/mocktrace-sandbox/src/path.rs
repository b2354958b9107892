//! Structural validation of accessor paths.
//!
//! A path is an identifier followed by any number of `.ident`, `["str"]`,
//! `['str']` or `[123]` segments. Validation is purely structural: no
//! whitespace, no leading dots, no empty brackets. The same segmentation is
//! reused when hooks are materialised inside the guest.

use crate::error::SandboxError;

/// One parsed accessor segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `.name` (or the leading bare identifier).
    Ident(String),
    /// `["key"]` / `['key']`.
    Key(String),
    /// `[7]`.
    Index(u64),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn invalid(path: &str, reason: &'static str) -> SandboxError {
    SandboxError::InvalidPath { path: path.to_string(), reason }
}

/// Parse `path` into segments, or fail with `InvalidPath`.
pub fn parse(path: &str) -> Result<Vec<Segment>, SandboxError> {
    let mut chars = path.chars().peekable();
    let mut segments = Vec::new();

    let mut ident = String::new();
    match chars.next() {
        Some(c) if is_ident_start(c) => ident.push(c),
        Some(_) => return Err(invalid(path, "must start with an identifier")),
        None => return Err(invalid(path, "empty path")),
    }
    while let Some(&c) = chars.peek() {
        if is_ident_continue(c) {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    segments.push(Segment::Ident(ident));

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut ident = String::new();
                match chars.next() {
                    Some(c) if is_ident_start(c) => ident.push(c),
                    _ => return Err(invalid(path, "expected identifier after '.'")),
                }
                while let Some(&c) = chars.peek() {
                    if is_ident_continue(c) {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                segments.push(Segment::Ident(ident));
            }
            '[' => match chars.next() {
                Some(quote @ ('"' | '\'')) => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == quote => break,
                            Some(c) => key.push(c),
                            None => return Err(invalid(path, "unterminated string segment")),
                        }
                    }
                    if chars.next() != Some(']') {
                        return Err(invalid(path, "expected ']' after string segment"));
                    }
                    segments.push(Segment::Key(key));
                }
                Some(c) if c.is_ascii_digit() => {
                    let mut digits = String::new();
                    digits.push(c);
                    loop {
                        match chars.next() {
                            Some(c) if c.is_ascii_digit() => digits.push(c),
                            Some(']') => break,
                            _ => return Err(invalid(path, "expected digits then ']'")),
                        }
                    }
                    let index = digits
                        .parse::<u64>()
                        .map_err(|_| invalid(path, "index segment out of range"))?;
                    segments.push(Segment::Index(index));
                }
                _ => return Err(invalid(path, "empty or malformed bracket segment")),
            },
            _ => return Err(invalid(path, "unexpected character")),
        }
    }

    Ok(segments)
}

/// Validate without keeping the segments.
pub fn validate(path: &str) -> Result<(), SandboxError> {
    parse(path).map(|_| ())
}
