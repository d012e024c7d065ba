//! Comment preserving `key=value` documents.
//!
//! A document is an ordered list of physical line groups. Comments and
//! cosmetic blank lines are kept verbatim, and so is every entry whose value
//! was never changed, so a read-modify-write cycle only touches the keys that
//! were actually set.
//!
//! Format rules:
//! - keys and `#` comments start at column 0;
//! - a value continues on following lines indented deeper than its key;
//! - blank lines belong to a value only when more indented lines follow.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use super::ConfigError;

/// Mode for config files, which may embed hook commands and secrets.
pub const CONFIG_FILE_MODE: u32 = 0o600;

const CONTINUATION_INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// A `#` comment, including any indented lines that followed it.
    Comment(String),
    /// A whitespace-only line between entries.
    Blank(String),
    Entry(Entry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
    /// Original text; `None` once the value has been set.
    raw: Option<String>,
}

impl Entry {
    fn continue_with(&mut self, blanks: &[&str], line: &str) {
        let raw = self.raw.get_or_insert_with(String::new);
        let mut value = std::mem::take(&mut self.value);
        for blank in blanks {
            raw.push('\n');
            raw.push_str(blank);
            value.push('\n');
        }
        raw.push('\n');
        raw.push_str(line);
        value.push('\n');
        value.push_str(line.trim());
        self.value = value.trim().to_string();
    }

    fn render_into(&self, out: &mut String) {
        out.push_str(&self.key);
        out.push('=');
        for (i, line) in self.value.split('\n').enumerate() {
            if i > 0 {
                out.push('\n');
                if !line.is_empty() {
                    out.push_str(CONTINUATION_INDENT);
                }
            }
            out.push_str(line);
        }
    }
}

/// A value accepted by [`Document::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Stored as `1` or `0`.
    Bool(bool),
    /// Stored one item per line, continuation lines indented.
    List(Vec<String>),
    Text(String),
}

impl Value {
    fn encode(self) -> String {
        match self {
            Value::Bool(b) => if b { "1" } else { "0" }.to_string(),
            Value::List(items) => items.join("\n"),
            Value::Text(text) => text,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Text(n.to_string())
    }
}

/// A parsed config file plus the fallback values it resolves missing keys from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    lines: Vec<Line>,
    fallback: Vec<(String, String)>,
}

impl Document {
    /// Parse document text. `source_name` only labels parse errors.
    pub fn parse(text: &str, source_name: &str) -> Result<Self, ConfigError> {
        let parse_error = |line: usize, message: String| ConfigError::Parse {
            source_name: source_name.to_string(),
            line,
            message,
        };

        let mut lines: Vec<Line> = Vec::new();
        // Blank lines whose owner depends on the next non-blank line.
        let mut pending: Vec<&str> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (idx, line) in text.lines().enumerate() {
            let number = idx + 1;

            if line.trim().is_empty() {
                pending.push(line);
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                match lines.last_mut() {
                    Some(Line::Entry(entry)) => entry.continue_with(&pending, line),
                    Some(Line::Comment(comment)) => {
                        for blank in &pending {
                            comment.push('\n');
                            comment.push_str(blank);
                        }
                        comment.push('\n');
                        comment.push_str(line);
                    }
                    _ => {
                        return Err(parse_error(
                            number,
                            "indented line does not continue a key".into(),
                        ));
                    }
                }
                pending.clear();
                continue;
            }

            lines.extend(pending.drain(..).map(|b| Line::Blank(b.to_string())));

            if line.starts_with('#') {
                lines.push(Line::Comment(line.to_string()));
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(parse_error(
                    number,
                    format!("expected key=value, found '{line}'"),
                ));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error(number, "missing key before '='".into()));
            }
            if !seen.insert(key.to_string()) {
                return Err(parse_error(number, format!("duplicate key '{key}'")));
            }
            lines.push(Line::Entry(Entry {
                key: key.to_string(),
                value: value.trim().to_string(),
                raw: Some(line.to_string()),
            }));
        }

        lines.extend(pending.into_iter().map(|b| Line::Blank(b.to_string())));

        Ok(Self {
            lines,
            fallback: Vec::new(),
        })
    }

    /// Parse the baked-in defaults: comments and blank lines are dropped,
    /// only the key/value pairs matter.
    pub fn parse_defaults(text: &str) -> Result<Self, ConfigError> {
        let stripped: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        let mut doc = Self::parse(&stripped.join("\n"), "<defaults>")?;
        doc.lines.retain(|l| matches!(l, Line::Entry(_)));
        Ok(doc)
    }

    /// Read a jail config file, resolving missing keys from `defaults`.
    pub fn load(path: &Path, defaults: &Document) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        Ok(Self::parse(&text, &path.display().to_string())?.with_fallback(defaults))
    }

    /// Use the entries of `defaults` for keys this document lacks.
    pub fn with_fallback(mut self, defaults: &Document) -> Self {
        self.fallback = defaults
            .entries()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// Explicit entries in document order (fallback values excluded).
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|l| match l {
            Line::Entry(e) => Some((e.key.as_str(), e.value.as_str())),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().any(|(k, _)| k == key)
    }

    /// Value from the document, else from the fallback.
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.entries()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .or_else(|| {
                self.fallback
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.as_str())
            })
    }

    /// Value for `key`; an error if neither the document nor its fallback has it.
    pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
        self.get_opt(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get_opt(key).unwrap_or(fallback)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        parse_bool(key, self.get(key)?)
    }

    pub fn get_bool_or(&self, key: &str, fallback: bool) -> Result<bool, ConfigError> {
        match self.get_opt(key) {
            Some(value) => parse_bool(key, value),
            None => Ok(fallback),
        }
    }

    /// Value split into shell words, e.g. for argument lists.
    pub fn get_tokens(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        shell_words::split(self.get(key)?).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Set a value; an existing key keeps its position, a new key is appended.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into().encode();
        for line in &mut self.lines {
            if let Line::Entry(entry) = line
                && entry.key == key
            {
                entry.value = value;
                entry.raw = None;
                return;
            }
        }
        self.lines.push(Line::Entry(Entry {
            key: key.to_string(),
            value,
            raw: None,
        }));
    }

    /// Serialize: untouched lines verbatim, changed entries re-rendered,
    /// trailing whitespace removed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match line {
                Line::Comment(text) | Line::Blank(text) => out.push_str(text),
                Line::Entry(Entry { raw: Some(raw), .. }) => out.push_str(raw),
                Line::Entry(entry) => entry.render_into(&mut out),
            }
        }
        out.truncate(out.trim_end().len());
        out
    }

    /// Overwrite `path` with the rendered document, owner read/write only.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(CONFIG_FILE_MODE)
            .open(path)
            .map_err(io_error)?;
        file.write_all(self.render().as_bytes()).map_err(io_error)?;
        fs::set_permissions(path, fs::Permissions::from_mode(CONFIG_FILE_MODE)).map_err(io_error)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
