//! Configuration for the onionport command line application
//
// (This module is called `cfg` to avoid name clash with the `config` crate, which we use.)

use crate::cmdline::CmdLine;
use crate::logging::{LoggingConfig, LoggingConfigBuilder};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default options to use for our configuration.
pub(crate) const ONIONPORT_DEFAULTS: &str = include_str!("./onionport_defaults.toml");

/// Name of the configuration file we read, if it exists, when none is given
/// on the command line.
pub(crate) const DEFAULT_CONFIG_FILE: &str = "onionport.toml";

/// An error related to an option passed to onionport via a configuration
/// builder.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A mandatory field was not present.
    #[error("Field was not provided: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },
    /// A single field had a value that proved to be unusable.
    #[error("Value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the invalid field
        field: String,
        /// A description of the problem.
        problem: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(val: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::MissingField {
            field: val.field_name().to_string(),
        }
    }
}

impl From<derive_builder::SubfieldBuildError<ConfigBuildError>> for ConfigBuildError {
    fn from(e: derive_builder::SubfieldBuildError<ConfigBuildError>) -> Self {
        let (field, problem) = e.into_parts();
        problem.within(field)
    }
}

impl ConfigBuildError {
    /// Return a new ConfigBuildError that prefixes its field name with
    /// `prefix` and a dot.
    #[must_use]
    pub fn within(&self, prefix: &str) -> Self {
        use ConfigBuildError::*;
        let addprefix = |field: &str| format!("{}.{}", prefix, field);
        match self {
            MissingField { field } => MissingField {
                field: addprefix(field),
            },
            Invalid { field, problem } => Invalid {
                field: addprefix(field),
                problem: problem.clone(),
            },
        }
    }
}

/// Configuration for the SOCKS listener.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct ProxyConfig {
    /// Port to listen on (at localhost) for incoming SOCKS connections.
    ///
    /// Zero means "don't listen".
    //
    // Held wider than a port in the builder, so that an out-of-range value
    // is an error rather than being truncated.
    #[builder_field_attr(serde(default))]
    #[builder(
        field(type = "Option<i64>", build = "self.build_socks_port()?"),
        setter(custom)
    )]
    pub socks_port: u16,
}

impl ProxyConfigBuilder {
    /// Set the port to listen on.
    pub fn socks_port(&mut self, port: u16) -> &mut Self {
        self.socks_port = Some(port.into());
        self
    }

    /// Check and convert the configured port.
    fn build_socks_port(&self) -> Result<u16, ConfigBuildError> {
        let Some(port) = self.socks_port else {
            return Ok(9150);
        };
        u16::try_from(port).map_err(|_| ConfigBuildError::Invalid {
            field: "socks_port".into(),
            problem: format!("{} is not a TCP port number", port),
        })
    }
}

impl ProxyConfig {
    /// Return a new [`ProxyConfigBuilder`].
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }
}

/// Configuration for the upstream SOCKS5 port that opens our exit streams.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct UpstreamConfig {
    /// Address of the upstream SOCKS5 port.
    #[builder(default = "default_upstream_addr()")]
    pub socks_addr: SocketAddr,

    /// How long to allow the upstream to open a stream, including our
    /// connection to it.
    #[builder(default = "Duration::from_secs(30)")]
    #[builder_field_attr(serde(default, with = "humantime_serde::option"))]
    pub connect_timeout: Duration,
}

/// Return the default value for `upstream.socks_addr`.
fn default_upstream_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9050))
}

impl UpstreamConfigBuilder {
    /// Check the fields that have been set so far.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(ConfigBuildError::Invalid {
                field: "connect_timeout".into(),
                problem: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

impl UpstreamConfig {
    /// Return a new [`UpstreamConfigBuilder`].
    pub fn builder() -> UpstreamConfigBuilder {
        UpstreamConfigBuilder::default()
    }
}

/// Configuration for system resources used by onionport.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct SystemConfig {
    /// Maximum number of file descriptors we should launch with
    #[builder(setter(into), default = "16384")]
    pub max_files: u64,
}

impl SystemConfig {
    /// Return a new [`SystemConfigBuilder`].
    pub fn builder() -> SystemConfigBuilder {
        SystemConfigBuilder::default()
    }
}

/// Structure to hold onionport's configuration options, whether from a
/// configuration file or the command line.
#[derive(Debug, Builder, Clone, Eq, PartialEq)]
#[builder(derive(Serialize, Deserialize, Debug))]
#[builder(build_fn(error = "ConfigBuildError"))]
#[non_exhaustive]
pub struct OnionportConfig {
    /// Configuration for the SOCKS listener.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub proxy: ProxyConfig,

    /// Where our exit streams come from.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub upstream: UpstreamConfig,

    /// Logging configuration
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub logging: LoggingConfig,

    /// Information on system resources used by onionport.
    #[builder(sub_builder)]
    #[builder_field_attr(serde(default))]
    pub system: SystemConfig,
}

impl OnionportConfig {
    /// Return a new [`OnionportConfigBuilder`].
    pub fn builder() -> OnionportConfigBuilder {
        OnionportConfigBuilder::default()
    }
}

impl TryFrom<config::Config> for OnionportConfig {
    type Error = anyhow::Error;
    fn try_from(cfg: config::Config) -> anyhow::Result<OnionportConfig> {
        let builder: OnionportConfigBuilder = cfg.try_deserialize()?;
        Ok(builder.build()?)
    }
}

/// A description of where to find our configuration options.
#[derive(Clone, Debug, Default)]
pub struct ConfigurationSources {
    /// List of files to read (in order).
    files: Vec<(PathBuf, MustRead)>,
    /// A list of command-line options to apply after parsing the files.
    options: Vec<String>,
}

/// Rules for whether we should proceed if a configuration file is unreadable.
///
/// The default configuration file is okay to skip if it isn't present.
/// Files named on the command line really need to be there.
#[derive(Clone, Debug, Copy, Eq, PartialEq)]
enum MustRead {
    /// This file is okay to skip if it isn't present,
    TolerateAbsence,

    /// This file must be present and readable.
    MustRead,
}

impl ConfigurationSources {
    /// Create a new empty [`ConfigurationSources`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish a [`ConfigurationSources`] from the files and options given
    /// on a command line.
    ///
    /// If no files are given, `default_file` is read if it exists.
    pub fn from_cmdline<F, O>(default_file: impl Into<PathBuf>, files: F, options: O) -> Self
    where
        F: IntoIterator,
        F::Item: Into<PathBuf>,
        O: IntoIterator<Item = String>,
    {
        let mut sources = ConfigurationSources::new();
        let mut any_files = false;
        for f in files {
            sources.push_file(f);
            any_files = true;
        }
        if !any_files {
            sources.push_optional_file(default_file);
        }
        for opt in options {
            sources.push_option(opt);
        }
        sources
    }

    /// Add `p` to the list of files that we want to read configuration from.
    ///
    /// Configuration files are loaded and applied in the order that they are
    /// added to this object.
    ///
    /// If the listed file is absent, loading the configuration won't succeed.
    pub fn push_file(&mut self, p: impl Into<PathBuf>) {
        self.files.push((p.into(), MustRead::MustRead));
    }

    /// As `push_file`, but if the listed file can't be loaded, loading the
    /// configuration can still succeed.
    pub fn push_optional_file(&mut self, p: impl Into<PathBuf>) {
        self.files.push((p.into(), MustRead::TolerateAbsence));
    }

    /// Add `option` to the list of overridden options to apply to our
    /// configuration.
    ///
    /// Options are applied after all configuration files are loaded, in the
    /// order that they are added to this object.  Each one is a line of TOML,
    /// like `proxy.socks_port=9050`.
    pub fn push_option(&mut self, option: impl Into<String>) {
        self.options.push(option.into());
    }

    /// Return an iterator over the files that we care about.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(f, _)| f.as_path())
    }

    /// Load the configuration into a new [`config::Config`].
    ///
    /// The built-in defaults come first, then the files, then the options.
    pub fn load(&self) -> Result<config::Config, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            ONIONPORT_DEFAULTS,
            config::FileFormat::Toml,
        ));
        for (path, must_read) in &self.files {
            // Not going to use File::with_name here, since it guesses at
            // the format from the extension.
            let f: config::File<_, _> = path.as_path().into();
            let required = must_read == &MustRead::MustRead;
            builder = builder.add_source(f.format(config::FileFormat::Toml).required(required));
        }

        let mut cmdline = CmdLine::new();
        for opt in &self.options {
            cmdline.push_toml_line(opt.clone());
        }
        builder.add_source(cmdline).build()
    }
}
