//! Accept SOCKS connections on localhost.
//!
//! A proxy is launched with [`run_socks_proxy()`], which listens for new
//! connections and hands each one to a [`ConnectionBridge`] in a new task.

use crate::connect::StreamOpener;
use crate::err::Cancelled;
use crate::socks::ConnectionBridge;

use anyhow::{Context, Result, anyhow};
use futures::stream::StreamExt;
use futures::{FutureExt as _, select};
use std::io::Error as IoError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::compat::TokioAsyncReadCompatExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Launch a SOCKS proxy to listen on a given localhost port, and run until
/// `shutdown` is cancelled.
///
/// Every connection is served with a [`ConnectionBridge`] built from
/// `opener` and `shutdown`.
pub async fn run_socks_proxy<O>(
    opener: Arc<O>,
    socks_port: u16,
    shutdown: CancellationToken,
) -> Result<()>
where
    O: StreamOpener + 'static,
{
    let listeners = bind_localhost(socks_port).await?;
    serve(listeners, opener, shutdown).await
}

/// Try to listen on `port` at both IPv4 and IPv6 localhost.
///
/// Succeeds if at least one of them works.
async fn bind_localhost(port: u16) -> Result<Vec<TcpListener>> {
    let mut listeners = Vec::new();

    let localhosts: [IpAddr; 2] = [Ipv4Addr::LOCALHOST.into(), Ipv6Addr::LOCALHOST.into()];

    for localhost in localhosts {
        let addr = SocketAddr::new(localhost, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("Listening on {:?}.", addr);
                listeners.push(listener);
            }
            Err(e) => warn!("Can't listen on {:?}: {}", addr, e),
        }
    }
    // We weren't able to bind any ports: There's nothing to do.
    if listeners.is_empty() {
        error!("Couldn't open any SOCKS listeners.");
        return Err(anyhow!("Couldn't open SOCKS listeners on port {}", port));
    }
    Ok(listeners)
}

/// Accept connections on every listener in `listeners` until `shutdown` is
/// cancelled, or until we hit a fatal accept error.
async fn serve<O>(
    listeners: Vec<TcpListener>,
    opener: Arc<O>,
    shutdown: CancellationToken,
) -> Result<()>
where
    O: StreamOpener + 'static,
{
    // One stream of incoming sockets, selected across all the listeners.
    let mut incoming = futures::stream::select_all(listeners.into_iter().map(|listener| {
        futures::stream::poll_fn(move |cx| listener.poll_accept(cx).map(Some)).boxed()
    }));

    let bridge = ConnectionBridge::new(opener, shutdown.clone());

    loop {
        let accepted = select! {
            accepted = incoming.next().fuse() => accepted,
            () = shutdown.cancelled().fuse() => {
                info!("Shutting down SOCKS listeners.");
                return Ok(());
            }
        };
        let (stream, addr) = match accepted {
            Some(Ok(pair)) => pair,
            Some(Err(err)) => {
                if accept_err_is_fatal(&err) {
                    return Err(err).context("Failed to receive incoming stream on SOCKS port");
                }
                warn!("Incoming stream failed: {}", err);
                continue;
            }
            None => return Ok(()),
        };
        debug!("Accepted SOCKS connection from {}", safelog::sensitive(addr));

        let bridge = bridge.clone();
        tokio::spawn(async move {
            // Other errors were already logged by the bridge.
            if let Err(Cancelled) = bridge.run(stream.compat()).await {
                trace!("SOCKS connection from {} cancelled", safelog::sensitive(addr));
            }
        });
    }
}

/// Return true if a given IoError, when received from accept, is a fatal
/// error.
fn accept_err_is_fatal(err: &IoError) -> bool {
    #![allow(clippy::match_like_matches_macro)]

    /// Re-declaration of WSAEMFILE with the right type to match
    /// `raw_os_error()`.
    #[cfg(windows)]
    const WSAEMFILE: i32 = winapi::shared::winerror::WSAEMFILE as i32;

    // EMFILE and ENFILE have no ErrorKind of their own.  Running out of
    // descriptors is probably temporary, so we keep going.
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(libc::EMFILE) | Some(libc::ENFILE) => false,
        #[cfg(windows)]
        Some(WSAEMFILE) => false,
        _ => true,
    }
}
