//! A configuration source built from `-o KEY=VALUE` command-line options.

use config::{ConfigError, Map, Source, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Command-line `-o` options, layered over the configuration files.
///
/// Each option is one line of TOML, such as `proxy.socks_port=9150`.  When
/// the value is a single bare word it is quoted first, so that
/// `-o logging.console=debug` works without shell-escaped quotes.
#[derive(Debug, Clone, Default)]
pub(crate) struct CmdLine {
    /// The options, in the order they were given.
    options: Vec<String>,
}

impl CmdLine {
    /// Make a new empty set of options.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add one option, as a line of TOML.
    pub(crate) fn push_toml_line(&mut self, line: String) {
        self.options.push(line);
    }

    /// Parse every option on its own, and merge the results into a single
    /// table.  Later options win.
    fn to_table(&self) -> Result<toml::Table, ConfigError> {
        let mut merged = toml::Table::new();
        for option in &self.options {
            let table: toml::Table = toml::from_str(&quote_bareword(option)).map_err(|e| {
                ConfigError::Message(format!(
                    "Couldn't parse command-line option {:?}: {}",
                    option,
                    e.message()
                ))
            })?;
            merge_tables(&mut merged, table);
        }
        Ok(merged)
    }
}

impl Source for CmdLine {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        toml::Value::Table(self.to_table()?)
            .try_into()
            .map_err(|e| ConfigError::Foreign(Box::new(e)))
    }
}

/// Move every entry of `from` into `into`, merging tables that both have.
fn merge_tables(into: &mut toml::Table, from: toml::Table) {
    for (key, value) in from {
        let toml::Value::Table(new) = value else {
            into.insert(key, value);
            continue;
        };
        if let Some(toml::Value::Table(old)) = into.get_mut(&key) {
            merge_tables(old, new);
            continue;
        }
        into.insert(key, toml::Value::Table(new));
    }
}

/// Quote the value of `line` if it is a `dotted.key = word` assignment whose
/// value is a single bare word.  Anything else is returned as it is.
///
/// A number comes back as a string, but `config` converts it again when the
/// field wants a number.
fn quote_bareword(line: &str) -> Cow<'_, str> {
    /// `key = word`, with optional blanks around each part.
    static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^[ \t]*(?P<key>[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)[ \t]*=[ \t]*(?P<value>[A-Za-z0-9_]+)[ \t]*$",
        )
        .expect("Built-in regex compilation failed")
    });

    match ASSIGNMENT.captures(line) {
        Some(c) => Cow::Owned(format!("{}=\"{}\"", &c["key"], &c["value"])),
        None => Cow::Borrowed(line),
    }
}
