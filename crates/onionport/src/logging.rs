//! Configure tracing subscribers for onionport

use crate::cfg::ConfigBuildError;

use anyhow::{Context, Result, anyhow};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{Subscriber, error, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, filter::Targets, fmt, registry};

/// Structure to hold our logging configuration options
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct LoggingConfig {
    /// Filtering directives that determine tracing levels as described at
    /// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#impl-FromStr>
    ///
    /// You can override this setting with the -l, --log-level command line parameter.
    ///
    /// Example: "info,onionport::socks=debug"
    #[builder(default = "default_console_filter()", setter(into, strip_option))]
    console: Option<String>,

    /// Configuration for one or more logfiles.
    ///
    /// The default is not to log to any files.
    #[builder_field_attr(serde(default))]
    #[builder(
        field(type = "Vec<LogfileConfigBuilder>", build = "self.build_files()?"),
        setter(custom)
    )]
    files: Vec<LogfileConfig>,

    /// If set to true, we disable safe logging on _all logs_, and record
    /// destination hostnames and addresses as they are.
    ///
    /// This can be useful for debugging, but it increases the value of your
    /// logs to an attacker.
    #[builder_field_attr(serde(default))]
    #[builder(default)]
    log_sensitive_information: bool,
}

impl LoggingConfig {
    /// Return a new [`LoggingConfigBuilder`].
    pub fn builder() -> LoggingConfigBuilder {
        LoggingConfigBuilder::default()
    }

    /// Return the filter for console messages, if there is one.
    pub fn console(&self) -> Option<&str> {
        self.console.as_deref()
    }

    /// Return the configured log files.
    pub fn files(&self) -> &[LogfileConfig] {
        &self.files
    }

    /// Return true if safe logging is turned off.
    pub fn log_sensitive_information(&self) -> bool {
        self.log_sensitive_information
    }
}

impl LoggingConfigBuilder {
    /// Return a mutable reference to the list of logfiles we're building.
    pub fn files(&mut self) -> &mut Vec<LogfileConfigBuilder> {
        &mut self.files
    }

    /// Build every logfile in our list.
    fn build_files(&self) -> Result<Vec<LogfileConfig>, ConfigBuildError> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| f.build().map_err(|e| e.within(&format!("files.{}", i))))
            .collect()
    }
}

/// Return a default tracing filter value for `logging.console`.
#[allow(clippy::unnecessary_wraps)]
fn default_console_filter() -> Option<String> {
    Some("info".to_owned())
}

/// Configuration information for an (optionally rotating) logfile.
#[derive(Debug, Builder, Clone, Eq, PartialEq)]
#[builder(derive(Debug, Serialize, Deserialize))]
#[builder(build_fn(error = "ConfigBuildError"))]
pub struct LogfileConfig {
    /// How often to rotate the file?
    #[builder(default)]
    rotate: LogRotation,
    /// Where to write the files?
    #[builder(setter(into))]
    path: PathBuf,
    /// Filter to apply before writing
    #[builder(setter(into))]
    filter: String,
}

impl LogfileConfig {
    /// Return a new [`LogfileConfigBuilder`].
    pub fn builder() -> LogfileConfigBuilder {
        LogfileConfigBuilder::default()
    }

    /// How often this file is rotated.
    pub fn rotate(&self) -> LogRotation {
        self.rotate
    }

    /// Where this file is written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The filter directives for this file.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// How often to rotate a log file
#[derive(Debug, Default, Clone, Serialize, Deserialize, Copy, Eq, PartialEq)]
#[non_exhaustive]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate logs daily
    Daily,
    /// Rotate logs hourly
    Hourly,
    /// Never rotate the log
    #[default]
    Never,
}

/// As [`Targets::from_str`], but wrapped in an [`anyhow::Result`].
//
// (We use `Targets`, not `EnvFilter`, so that each layer gets its own filter.)
fn filt_from_str_verbose(s: &str, source: &str) -> Result<Targets> {
    Targets::from_str(s).with_context(|| format!("in {}", source))
}

/// As filt_from_str_verbose, but treat an absent filter (or an empty string) as
/// None.
fn filt_from_opt_str(s: Option<&str>, source: &str) -> Result<Option<Targets>> {
    Ok(match s {
        Some(s) if !s.is_empty() => Some(filt_from_str_verbose(s, source)?),
        _ => None,
    })
}

/// Try to construct a tracing [`Layer`] for logging to stderr.
fn console_layer<S>(config: &LoggingConfig, cli: Option<&str>) -> Result<impl Layer<S> + use<S>>
where
    S: Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let filter = match cli {
        Some(s) => filt_from_str_verbose(s, "--log-level command line parameter")?,
        None => filt_from_opt_str(config.console(), "logging.console")?
            .unwrap_or_else(|| Targets::new().with_default(tracing::Level::DEBUG)),
    };
    let use_color = std::io::stderr().is_terminal();
    Ok(fmt::Layer::default()
        .with_ansi(use_color)
        .with_writer(std::io::stderr)
        .with_filter(filter))
}

/// Try to construct a non-blocking tracing [`Layer`] for writing data to an
/// optionally rotating logfile.
///
/// On success, return that layer, along with a WorkerGuard that needs to be
/// dropped when the program exits, to flush buffered messages.
fn logfile_layer<S>(
    config: &LogfileConfig,
) -> Result<(impl Layer<S> + Send + Sync + Sized + use<S>, WorkerGuard)>
where
    S: Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span> + Send + Sync,
{
    use tracing_appender::{
        non_blocking,
        rolling::{RollingFileAppender, Rotation},
    };

    let filter = filt_from_str_verbose(&config.filter, "logging.files.filter")?;
    let rotation = match config.rotate {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Never => Rotation::NEVER,
    };
    let path = config.path();

    let directory = match path.parent() {
        None => {
            return Err(anyhow!(
                "Logfile path \"{}\" did not have a parent directory",
                path.display()
            ));
        }
        Some(p) if p == Path::new("") => Path::new("."),
        Some(d) => d,
    };
    std::fs::create_dir_all(directory).with_context(|| {
        format!(
            "Unable to create parent directory for logfile \"{}\"",
            path.display()
        )
    })?;
    let fname = path
        .file_name()
        .ok_or_else(|| anyhow!("No path for log file"))
        .map(Path::new)?;

    let appender = RollingFileAppender::new(rotation, directory, fname);
    let (nonblocking, guard) = non_blocking(appender);
    let layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nonblocking)
        .with_filter(filter);
    Ok((layer, guard))
}

/// Try to construct a tracing [`Layer`] for all of the configured logfiles.
///
/// On success, return that layer along with a list of [`WorkerGuard`]s that
/// need to be dropped when the program exits.
fn logfile_layers<S>(config: &LoggingConfig) -> Result<(impl Layer<S> + use<S>, Vec<WorkerGuard>)>
where
    S: Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span> + Send + Sync,
{
    let mut guards = Vec::new();
    let Some((first, rest)) = config.files.split_first() else {
        // Option<Layer> implements Layer.
        return Ok((None, guards));
    };

    let (layer, guard) = logfile_layer(first)?;
    guards.push(guard);

    // Boxed, so that we can chain any number of them.
    let mut layer: Box<dyn Layer<S> + Send + Sync + 'static> = Box::new(layer);

    for logfile in rest {
        let (new_layer, guard) = logfile_layer(logfile)?;
        layer = Box::new(layer.and_then(new_layer));
        guards.push(guard);
    }

    Ok((Some(layer), guards))
}

/// Configure a panic handler to send everything to tracing, in addition to our
/// default panic behavior.
fn install_panic_handler() {
    let default_handler = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_handler(panic_info);

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };

        let backtrace = std::backtrace::Backtrace::force_capture();
        match panic_info.location() {
            Some(location) => error!("Panic at {}: {}\n{}", location, msg, backtrace),
            None => error!("Panic at ???: {}\n{}", msg, backtrace),
        };
    }));
}

/// Opaque structure that gets dropped when the program is shutting down,
/// after logs are no longer needed.  The `Drop` impl flushes buffered messages.
pub struct LogGuards {
    /// The actual list of guards we're returning.
    #[allow(unused)]
    guards: Vec<WorkerGuard>,

    /// A safelog guard, for use if we have decided to disable safe logging.
    #[allow(unused)]
    safelog_guard: Option<safelog::Guard>,
}

/// Set up logging.
///
/// `cli`, if present, replaces `logging.console` as the console filter.
///
/// Note that the returned LogGuard must be dropped precisely when the program
/// quits; they're used to ensure that all the log messages are flushed.
pub fn setup_logging(config: &LoggingConfig, cli: Option<&str>) -> Result<LogGuards> {
    // Every layer carries its own filter: an `EnvFilter` layer here would
    // apply globally to _all_ layers.
    let registry = registry().with(console_layer(config, cli)?);

    let (layer, guards) = logfile_layers(config)?;
    let registry = registry.with(layer);

    registry.init();

    let safelog_guard = if config.log_sensitive_information {
        match safelog::disable_safe_logging() {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("Unable to disable safe logging: {}", e);
                None
            }
        }
    } else {
        None
    };

    install_panic_handler();

    Ok(LogGuards {
        guards,
        safelog_guard,
    })
}
