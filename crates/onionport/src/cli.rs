//! Command-line arguments.

use crate::cfg::DEFAULT_CONFIG_FILE;

use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;

/// A SOCKS front end for an onion-routing client.
#[derive(Clone, Debug, Parser)]
#[command(author = "The onionport developers")]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// Config file(s) to read.
    //
    // Not global: clap keeps only the values given after the subcommand.
    #[arg(long = "config", short = 'c')]
    #[arg(value_name = "FILE")]
    #[arg(help = format!("Config file(s) to read. Defaults to {:?}, if it exists.", DEFAULT_CONFIG_FILE))]
    pub(crate) config_files: Vec<OsString>,

    /// Override config file parameters, using TOML-like syntax.
    #[arg(long = "option", short = 'o')]
    #[arg(value_name = "KEY=VALUE")]
    pub(crate) options: Vec<String>,

    /// Override the console log filter (usually one of 'trace', 'debug',
    /// 'info', 'warn', 'error').
    #[arg(long, short = 'l', global = true)]
    #[arg(value_name = "LEVEL")]
    pub(crate) log_level: Option<String>,
}

/// Main subcommands.
#[derive(Clone, Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run in SOCKS proxy mode, handing connections to the upstream client.
    Proxy(ProxyArgs),
}

/// Arguments for the `proxy` subcommand.
#[derive(Clone, Debug, Args)]
pub(crate) struct ProxyArgs {
    /// Port to listen on for SOCKS connections (overrides the port in the
    /// config if specified).
    #[arg(short = 'p', long)]
    #[arg(value_name = "PORT")]
    pub(crate) socks_port: Option<u16>,
}
