#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
//! A SOCKS front end for an onion-routing client
//!
//! `onionport` accepts SOCKS4, SOCKS4a and SOCKS5 connections from local
//! applications, asks a stream opener for a stream to each requested
//! destination, and relays bytes in both directions until either side is
//! done.
//!
//! # Library
//!
//! The pieces are usable on their own:
//!
//! * [`ConnectionBridge`] serves a single accepted connection.
//! * [`StreamOpener`] is the seam to whatever opens exit streams.
//!   [`UpstreamSocksConnector`] is one that asks another SOCKS5 port
//!   (e.g. a Tor daemon) to open them; [`OnionServiceGate`] refuses
//!   `.onion` destinations that have no known descriptor.
//! * [`relay_streams()`] is the bidirectional copy.
//! * [`run_socks_proxy()`] is the accept loop.
//!
//! # Command-line interface
//!
//! `onionport` uses the [`clap`](https://docs.rs/clap/) crate for command-line
//! argument parsing; run `onionport help` to get it to print its documentation.
//!
//! The only subcommand is `onionport proxy`, which listens on localhost port
//! 9150 by default.
//!
//! # Configuration
//!
//! By default, `onionport` reads `onionport.toml` from the current directory,
//! if it exists.  Other files can be given with `-c`, and single options
//! overridden with `-o`.  See `onionport_defaults.toml` for every option and
//! its default value.

// @@ begin lint list maintained by maint/add_warning @@
#![allow(renamed_and_removed_lints)]
#![allow(unknown_lints)]
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unchecked_duration_subtraction)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::result_large_err)]
#![allow(clippy::needless_raw_string_hashes)] // complained-about code is fine, often best
#![allow(clippy::needless_lifetimes)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

// Overrides specific to this crate:
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

mod cfg;
mod cli;
mod cmdline;
mod connect;
mod err;
mod logging;
mod onion;
mod process;
mod proxy;
mod relay;
mod socks;
#[cfg(test)]
mod testing;
mod upstream;

pub use cfg::{
    ConfigBuildError, ConfigurationSources, OnionportConfig, OnionportConfigBuilder, ProxyConfig,
    ProxyConfigBuilder, SystemConfig, SystemConfigBuilder, UpstreamConfig, UpstreamConfigBuilder,
};
pub use connect::{Credentials, OpenError, StreamOpener, StreamTarget, TargetHost};
pub use err::{Cancelled, ConnError};
pub use logging::{
    LogGuards, LogRotation, LogfileConfig, LogfileConfigBuilder, LoggingConfig,
    LoggingConfigBuilder, setup_logging,
};
pub use onion::OnionServiceGate;
pub use proxy::run_socks_proxy;
pub use relay::{RELAY_BUF_LEN, RelayStats, relay_streams};
pub use socks::ConnectionBridge;
pub use upstream::UpstreamSocksConnector;

use cli::{Cli, Commands};

use anyhow::{Context, Result};
use clap::Parser;
use futures::FutureExt as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the SOCKS proxy on `socks_port` until ctrl-c, opening streams through
/// the upstream configured in `config`.
async fn run(config: OnionportConfig, socks_port: u16) -> Result<()> {
    if socks_port == 0 {
        warn!(
            "No SOCKS port set; specify -p PORT, or use the `proxy.socks_port` configuration option."
        );
        return Ok(());
    }

    let opener = Arc::new(UpstreamSocksConnector::from_config(&config.upstream));
    let shutdown = CancellationToken::new();

    futures::select!(
        r = tokio::signal::ctrl_c().fuse() => {
            info!("Received a ctrl-c; shutting down.");
            shutdown.cancel();
            r.context("waiting for termination signal")
        },
        r = run_socks_proxy(opener, socks_port, shutdown.clone()).fuse()
            => r.context("SOCKS proxy failure"),
    )
}

/// Inner function, to handle a set of CLI arguments and return a single
/// `Result<()>` for convenient handling.
fn main_main<I, T>(cli_args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    // Tracing doesn't log anything when there is no subscriber set, but we
    // want to see messages from config parsing.  The real subscriber can only
    // be installed once, after we have read the config, so until then we use
    // a temporary one.
    let pre_config_logging_writer = || {
        // Weirdly, with .without_time(), tracing produces messages with a leading space.
        eprint!("onionport:");
        std::io::stderr()
    };
    let pre_config_logging = tracing_subscriber::fmt()
        .without_time()
        .with_writer(pre_config_logging_writer)
        .finish();
    let pre_config_logging = tracing::Dispatch::new(pre_config_logging);
    let (cli, config) = tracing::dispatcher::with_default(&pre_config_logging, || {
        let cli = Cli::try_parse_from(cli_args)?;

        let sources = ConfigurationSources::from_cmdline(
            cfg::DEFAULT_CONFIG_FILE,
            cli.config_files.iter(),
            cli.options.iter().cloned(),
        );
        let config = sources.load().context("read configuration")?;
        let config = OnionportConfig::try_from(config).context("read configuration")?;

        Ok::<_, anyhow::Error>((cli, config))
    })?;

    let _log_guards = setup_logging(&config.logging, cli.log_level.as_deref())?;

    match &cli.command {
        Commands::Proxy(args) => {
            let socks_port = args.socks_port.unwrap_or(config.proxy.socks_port);

            info!(
                "Starting onionport {} in SOCKS proxy mode on port {}...",
                env!("CARGO_PKG_VERSION"),
                socks_port
            );

            process::use_max_file_limit(&config);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("create runtime")?;
            runtime.block_on(run(config, socks_port))
        }
    }
}

/// Main program, callable directly from a binary crate's `main`
///
/// This function behaves the same as `main_main()`, except:
///   * It takes command-line arguments from `std::env::args_os` rather than
///     from an argument.
///   * It exits the process with an appropriate error code on error.
pub fn main() {
    match main_main(std::env::args_os()) {
        Ok(()) => {}
        Err(e) => match e.downcast_ref::<clap::Error>() {
            Some(clap_err) => clap_err.exit(),
            None => safelog::with_safe_logging_suppressed(|| {
                eprintln!("onionport: error: {:?}", e);
                std::process::exit(127)
            }),
        },
    }
}
