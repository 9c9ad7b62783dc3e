//! Typed parser for an install's `.env` file.
//!
//! Accepted syntax, one entry per line:
//!
//! ```text
//! # comment
//! CONNECTION_DRIVER="mysql"
//! export CONNECTION_HOST=db.example.com
//! CONNECTION_PASSWORD='s3cret # not a comment'
//! AUTH_SECRET="say \"hi\"\\n"
//! ```
//!
//! Single-quoted values are literal. Inside double quotes `\"`, `\\`, `\n`, `\r` and
//! `\t` are unescaped; any other backslash is kept as written.
//!
//! Anything else (a line without `=`, an empty or invalid key, an unterminated quote,
//! trailing text after a closing quote) is reported as
//! [`UpgradeError::MalformedConfig`] instead of being guessed at.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::UpgradeError;

/// Parsed `KEY=VALUE` pairs, quotes removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    values: BTreeMap<String, String>,
}

impl EnvFile {
    /// Read and parse an env file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&content, &path.display().to_string())?)
    }

    /// Parse env file content; `origin` names the file in error messages.
    pub fn parse(content: &str, origin: &str) -> std::result::Result<Self, UpgradeError> {
        let mut values = BTreeMap::new();

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = |reason: &str| UpgradeError::MalformedConfig {
                file: origin.to_string(),
                line: index + 1,
                reason: reason.to_string(),
            };

            let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
            let (key, value) = line.split_once('=').ok_or_else(|| malformed("expected KEY=VALUE"))?;

            let key = key.trim();
            if !is_valid_key(key) {
                return Err(malformed(&format!("invalid key '{key}'")));
            }

            let value = parse_value(value.trim()).map_err(|reason| malformed(reason))?;
            values.insert(key.to_string(), value);
        }

        Ok(Self {
            values,
        })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get) but treats an empty value as absent.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn parse_value(value: &str) -> std::result::Result<String, &'static str> {
    let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        // Unquoted: an inline comment starts at " #".
        let unquoted = match value.find(" #") {
            Some(pos) => value[..pos].trim_end(),
            None => value,
        };
        if unquoted.contains('"') || unquoted.contains('\'') {
            return Err("unexpected quote inside unquoted value");
        }
        return Ok(unquoted.to_string());
    };

    let body = &value[1..];
    let (parsed, end) = if quote == '"' {
        unescape_double_quoted(body)?
    } else {
        let end = body.find(quote).ok_or("unterminated quoted value")?;
        (body[..end].to_string(), end)
    };

    let rest = body[end + 1..].trim_start();
    if !rest.is_empty() && !rest.starts_with('#') {
        return Err("unexpected text after closing quote");
    }
    Ok(parsed)
}

/// Unescape up to the closing `"`; returns the value and the byte offset of the quote.
fn unescape_double_quoted(body: &str) -> std::result::Result<(String, usize), &'static str> {
    let mut parsed = String::with_capacity(body.len());
    let mut chars = body.char_indices();

    while let Some((pos, c)) = chars.next() {
        match c {
            '"' => return Ok((parsed, pos)),
            '\\' => match chars.next() {
                Some((_, '"')) => parsed.push('"'),
                Some((_, '\\')) => parsed.push('\\'),
                Some((_, 'n')) => parsed.push('\n'),
                Some((_, 'r')) => parsed.push('\r'),
                Some((_, 't')) => parsed.push('\t'),
                Some((_, other)) => {
                    parsed.push('\\');
                    parsed.push(other);
                }
                None => return Err("unterminated quoted value"),
            },
            c => parsed.push(c),
        }
    }

    Err("unterminated quoted value")
}
