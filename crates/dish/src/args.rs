//! Command-line option parsing.
//!
//! Options take `--name=value` or `--name value`. Switches are bare. Anything
//! not starting with `-` is positional, in order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

#[derive(Debug, Default)]
pub struct Options {
    values: BTreeMap<String, String>,
    switches: BTreeSet<String>,
    positional: Vec<String>,
}

impl Options {
    /// Parse `args` against the options and switches a command accepts.
    /// `--help` and `-h` are always accepted as switches.
    pub fn parse(args: &[String], valued: &[&str], switches: &[&str]) -> Result<Self> {
        let mut opts = Options::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-h" || arg == "--help" {
                opts.switches.insert("--help".to_string());
                continue;
            }
            if !arg.starts_with('-') || arg == "-" {
                opts.positional.push(arg.clone());
                continue;
            }

            let (name, inline) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (arg.as_str(), None),
            };
            if valued.contains(&name) {
                let value = match inline {
                    Some(value) => value,
                    None => iter.next().cloned().with_context(|| format!("{name} requires a value"))?,
                };
                opts.values.insert(name.to_string(), value);
            } else if switches.contains(&name) && inline.is_none() {
                opts.switches.insert(name.to_string());
            } else {
                bail!("unknown option: {arg}");
            }
        }
        Ok(opts)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn path(&self, name: &str) -> Option<PathBuf> {
        self.value(name).map(PathBuf::from)
    }

    /// A value parsed as `T`, if given.
    pub fn parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.value(name)
            .map(|v| v.parse::<T>().with_context(|| format!("invalid {name}: {v}")))
            .transpose()
    }

    pub fn has(&self, switch: &str) -> bool {
        self.switches.contains(switch)
    }

    pub fn wants_help(&self) -> bool {
        self.has("--help")
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }
}
