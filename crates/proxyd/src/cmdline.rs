//! A configuration source made of `key=value` command-line overrides.

use config::{ConfigError, Source, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Overrides given with `-c` (or built from convenience flags).
///
/// Each entry is one line of TOML.  Since nobody wants to type quotes on a
/// shell command line, `key=bareword` is read as `key="bareword"`.
#[derive(Debug, Clone, Default)]
pub(crate) struct CmdLine {
    /// The lines, in the order given.
    lines: Vec<String>,
}

impl CmdLine {
    /// Construct an empty set of overrides.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add one override.
    pub(crate) fn push<S: Into<String>>(&mut self, line: S) {
        self.lines.push(line.into());
    }

    /// Parse the overrides into one TOML table.  Where two overrides set
    /// the same key, the later one wins.
    fn to_table(&self) -> Result<toml::value::Table, String> {
        let mut table = toml::value::Table::new();
        for line in &self.lines {
            let text = quote_bareword(line).unwrap_or_else(|| line.clone());
            let parsed: toml::value::Table =
                toml::from_str(&text).map_err(|e| describe_error(line, &e))?;
            merge_into(&mut table, parsed);
        }
        Ok(table)
    }
}

/// Copy every key of `from` into `into`, descending into tables that
/// both have.
fn merge_into(into: &mut toml::value::Table, from: toml::value::Table) {
    for (key, val) in from {
        let replace = match (into.get_mut(&key), val) {
            (Some(toml::Value::Table(old)), toml::Value::Table(new)) => {
                merge_into(old, new);
                None
            }
            (_, val) => Some(val),
        };
        if let Some(val) = replace {
            into.insert(key, val);
        }
    }
}

/// Describe a TOML error in the override `line`.
fn describe_error(line: &str, e: &toml::de::Error) -> String {
    /// Matches the position suffix the toml crate puts on its errors.
    static POSITION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(.*?) at line [0-9]+ column [0-9]+$").expect("bad built-in regex")
    });
    let text = e.to_string();
    let what = POSITION
        .captures(&text)
        .and_then(|c| c.get(1))
        .map_or(text.as_str(), |m| m.as_str());
    format!("{} in {:?}", what, line)
}

impl Source for CmdLine {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let table = self.to_table().map_err(ConfigError::Message)?;
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::Foreign(Box::new(e)))
    }
}

/// If `line` is `dotted.key=bareword`, return it with the bareword quoted.
fn quote_bareword(line: &str) -> Option<String> {
    /// A dotted key, `=`, and one word of letters, digits and underscores.
    static BAREWORD: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?x:
               ^ [\ \t]*
               ( (?:[a-zA-Z0-9_\-]+\.)* [a-zA-Z0-9_\-]+ )
               [\ \t]* = [\ \t]*
               ( [a-zA-Z0-9_]+ )
               [\ \t]* $)"#,
        )
        .expect("bad built-in regex")
    });
    BAREWORD
        .captures(line)
        .map(|c| format!("{}=\"{}\"", &c[1], &c[2]))
}
