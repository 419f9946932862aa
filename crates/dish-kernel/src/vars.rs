//! Shell variable snapshots.
//!
//! Before each compile request the interpreter dumps its variables with
//! `declare -p` (or `export -p`, `typeset -p`) into a file. Each line looks
//! like one of:
//!
//! ```text
//! declare -x HOME="/home/me"
//! declare -- IFS=" "
//! declare -a PIPESTATUS
//! export PATH=/usr/bin
//! ```
//!
//! Values that span several lines (and `declare -f` function bodies) are not
//! supported; continuation lines parse as junk assignments and are harmless.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// One variable from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellVar {
    /// The attribute token (`-x`, `-a`, `-ir`, ...). A set variable declared
    /// with `--` has `None`; an unset one keeps `--`.
    pub var_type: Option<String>,
    /// The value with one pair of surrounding double quotes removed.
    pub value: String,
}

/// A parsed snapshot, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellVars {
    vars: BTreeMap<String, ShellVar>,
}

#[derive(Debug, Error)]
pub enum VarsError {
    #[error("failed to read variables from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ShellVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a snapshot file.
    pub fn read(path: &Path) -> Result<Self, VarsError> {
        let content = std::fs::read_to_string(path).map_err(|source| VarsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let vars = Self::parse(&content);
        tracing::debug!(path = %path.display(), count = vars.len(), "read shell variables");
        Ok(vars)
    }

    /// Parse snapshot text. Lines that don't name a variable are skipped.
    pub fn parse(content: &str) -> Self {
        let vars = content
            .lines()
            .filter_map(parse_line)
            .collect::<BTreeMap<_, _>>();
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&ShellVar> {
        self.vars.get(name)
    }

    /// Just the value, for callers that don't care about attributes.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.value.as_str())
    }

    /// Substitute `$NAME` and `${NAME}` for variables in the snapshot.
    /// References to anything else stay as written.
    pub fn expand(&self, word: &str) -> String {
        let mut out = String::with_capacity(word.len());
        let mut rest = word;
        while let Some(dollar) = rest.find('$') {
            out.push_str(&rest[..dollar]);
            let after = &rest[dollar + 1..];
            let (name, tail) = match after.strip_prefix('{') {
                Some(braced) => match braced.find('}') {
                    Some(close) => (&braced[..close], &braced[close + 1..]),
                    None => ("", after),
                },
                None => {
                    let end = name_len(after);
                    (&after[..end], &after[end..])
                }
            };
            match self.value(name).filter(|_| is_name(name)) {
                Some(value) => {
                    out.push_str(value);
                    rest = tail;
                }
                None => {
                    out.push('$');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ShellVar)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn name_len(text: &str) -> usize {
    if !text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return 0;
    }
    text.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len())
}

fn is_name(text: &str) -> bool {
    !text.is_empty() && name_len(text) == text.len()
}

fn parse_line(line: &str) -> Option<(String, ShellVar)> {
    let line = line.trim_end();
    // Drop the leading `declare`/`export`/`typeset` word.
    let (_, rest) = line.split_once(' ')?;

    let space = rest.find(' ');
    let eq = rest.find('=');

    let (name, var_type, value) = match (space, eq) {
        // Declared but unset; `--` stays as the type.
        (Some(s), None) => (&rest[s + 1..], Some(&rest[..s]), ""),
        (None, None) => (rest, None, ""),
        // Set, with attributes.
        (Some(s), Some(e)) if s < e => {
            let attrs = Some(&rest[..s]).filter(|t| *t != "--");
            (&rest[s + 1..e], attrs, &rest[e + 1..])
        }
        // Set, no attributes.
        (_, Some(e)) => (&rest[..e], None, &rest[e + 1..]),
    };

    if name.is_empty() {
        return None;
    }

    let var_type = var_type.map(str::to_string);
    let value = strip_quotes(value).to_string();
    Some((name.to_string(), ShellVar { var_type, value }))
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
