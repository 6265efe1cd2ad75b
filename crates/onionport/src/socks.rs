//! Serve one SOCKS connection: negotiate, open a stream, relay.
//!
//! A [`ConnectionBridge`] is handed each accepted socket by
//! [`run_socks_proxy()`](crate::run_socks_proxy), but it works on any
//! `AsyncRead + AsyncWrite`, which is how the tests drive it.

use crate::connect::{OpenError, StreamOpener, StreamTarget};
use crate::err::{Cancelled, ConnError};
use crate::relay::relay_streams;

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::{FutureExt as _, pin_mut, select};
use onionport_socksproto::{SOCKS_BUF_LEN, SocksProxyHandshake, SocksRequest, SocksStatus};
use safelog::sensitive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// First bytes of the HTTP methods that browsers send to a misconfigured
/// proxy port: `GET`, `HEAD`, `POST`, `PUT`.
const HTTP_FIRST_BYTES: [u8; 3] = [b'G', b'H', b'P'];

/// The glue between one client connection and the stream opener.
///
/// Cheap to clone: every clone shares the same opener and shutdown token.
pub struct ConnectionBridge<O> {
    /// Used to open a stream for each CONNECT request.
    opener: Arc<O>,
    /// Fires when we should abandon pending work.
    shutdown: CancellationToken,
}

impl<O> Clone for ConnectionBridge<O> {
    fn clone(&self) -> Self {
        ConnectionBridge {
            opener: Arc::clone(&self.opener),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<O: StreamOpener> ConnectionBridge<O> {
    /// Construct a new bridge that opens streams with `opener`, and gives up
    /// on pending stream opens once `shutdown` is cancelled.
    pub fn new(opener: Arc<O>, shutdown: CancellationToken) -> Self {
        ConnectionBridge { opener, shutdown }
    }

    /// Handle a newly accepted connection, until it is finished.
    ///
    /// Failures are logged and otherwise ignored.  The socket is always
    /// closed before this returns.
    ///
    /// Returns `Err(Cancelled)` if the connection was dropped because the
    /// shutdown token fired, or the opener reported cancellation.
    pub async fn run<S>(&self, mut socket: S) -> Result<(), Cancelled>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let outcome = self.handle(&mut socket).await;

        if let Err(e) = socket.close().await {
            debug!("Error while closing SOCKS connection: {}", e);
        }
        drop(socket);

        match outcome {
            Ok(()) => Ok(()),
            Err(ConnError::Cancelled) => {
                info!("Dropping SOCKS connection: shutting down.");
                Err(Cancelled)
            }
            Err(e) if e.is_routine() => {
                debug!("SOCKS connection ended: {}", report(&e));
                Ok(())
            }
            Err(e) => {
                warn!("SOCKS connection failed: {}", report(&e));
                Ok(())
            }
        }
    }

    /// Do the actual work of [`run`](Self::run), without closing the socket.
    async fn handle<S>(&self, socket: &mut S) -> Result<(), ConnError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut first = [0_u8; 1];
        let n = socket
            .read(&mut first)
            .await
            .map_err(|e| ConnError::io("reading SOCKS version", e))?;
        if n == 0 {
            return Err(ConnError::UnexpectedEof);
        }
        let handshake = match first[0] {
            v @ (4 | 5) => SocksProxyHandshake::for_version(v).map_err(ConnError::Handshake)?,
            b if HTTP_FIRST_BYTES.contains(&b) => return Err(ConnError::HttpNotSupported),
            b => return Err(ConnError::UnrecognizedProtocol(b)),
        };

        let mut inbuf = [0_u8; SOCKS_BUF_LEN];
        let (request, n_extra) = negotiate(socket, handshake, &mut inbuf).await?;
        let target = StreamTarget::from(&request);
        debug!(
            "Got a SOCKS{} request: {} {}",
            u8::from(request.version()),
            request.command(),
            sensitive(&target)
        );

        if !request.is_connect() {
            write_all_and_flush(socket, &request.error_reply(SocksStatus::COMMAND_NOT_SUPPORTED))
                .await?;
            return Err(ConnError::CommandNotSupported(request.command()));
        }

        let mut stream = match self.open(&target).await {
            Ok(s) => s,
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => return reply_error(socket, &request, e).await,
        };
        debug!("Got a stream for {}", sensitive(&target));

        write_all_and_flush(socket, &request.success_reply()).await?;

        // Anything the client sent along with its request belongs to the stream.
        if n_extra > 0 {
            stream
                .write_all(&inbuf[..n_extra])
                .await
                .map_err(|e| ConnError::io("writing early data to stream", e))?;
        }

        let stats = relay_streams(&mut *socket, stream)
            .await
            .map_err(|e| ConnError::io("relaying data", e))?;
        debug!(
            "Closed stream for {}: {} bytes sent, {} bytes received",
            sensitive(&target),
            stats.client_to_stream,
            stats.stream_to_client
        );
        Ok(())
    }

    /// Ask our opener for a stream to `target`, unless we are told to shut
    /// down first.
    async fn open(&self, target: &StreamTarget) -> Result<O::Stream, OpenError> {
        if self.shutdown.is_cancelled() {
            return Err(OpenError::Cancelled);
        }
        let opening = self.opener.open_exit_stream(target).fuse();
        let cancelled = self.shutdown.cancelled().fuse();
        pin_mut!(opening, cancelled);
        select! {
            r = opening => r,
            () = cancelled => Err(OpenError::Cancelled),
        }
    }
}

/// Run `handshake` against the client, until it yields a request.
///
/// The version byte has already been consumed.  On success, return the
/// request, along with the number of bytes at the start of `inbuf` that the
/// client sent after its request.
pub(crate) async fn negotiate<S>(
    socket: &mut S,
    mut handshake: SocksProxyHandshake,
    inbuf: &mut [u8; SOCKS_BUF_LEN],
) -> Result<(SocksRequest, usize), ConnError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut n_read = 0;
    'read: loop {
        if n_read == inbuf.len() {
            // No legal request is this long; don't keep reading nothing.
            return Err(ConnError::Handshake(
                onionport_socksproto::Error::NotImplemented(
                    "SOCKS handshake longer than buffer".into(),
                ),
            ));
        }
        let n = socket
            .read(&mut inbuf[n_read..])
            .await
            .map_err(|e| ConnError::io("reading SOCKS handshake", e))?;
        if n == 0 {
            return Err(ConnError::UnexpectedEof);
        }
        n_read += n;

        // The client may have sent several messages at once.
        loop {
            let action = match handshake.handshake(&inbuf[..n_read]) {
                Err(_truncated) => continue 'read,
                Ok(Err(e)) => return Err(ConnError::Handshake(e)),
                Ok(Ok(action)) => action,
            };
            inbuf.copy_within(action.drain..n_read, 0);
            n_read -= action.drain;
            if !action.reply.is_empty() {
                write_all_and_flush(socket, &action.reply).await?;
            }
            if action.finished {
                let request = handshake.into_request().map_err(ConnError::Handshake)?;
                return Ok((request, n_read));
            }
        }
    }
}

/// Tell the client that we could not open its stream, and why.
///
/// Returns the original error, even if the reply can't be sent.
async fn reply_error<W>(writer: &mut W, request: &SocksRequest, error: OpenError) -> Result<(), ConnError>
where
    W: AsyncWrite + Unpin,
{
    let reply = request.error_reply(error.socks_status());
    if let Err(e) = write_all_and_flush(writer, &reply).await {
        debug!("Unable to send SOCKS error reply: {}", report(&e));
    }
    Err(error.into())
}

/// Write all of `buf` to `writer`, then flush it.
async fn write_all_and_flush<W>(writer: &mut W, buf: &[u8]) -> Result<(), ConnError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(buf)
        .await
        .map_err(|e| ConnError::io("writing SOCKS reply", e))?;
    writer
        .flush()
        .await
        .map_err(|e| ConnError::io("flushing SOCKS stream", e))
}

/// Format `e` along with its chain of sources.
fn report(e: &(dyn std::error::Error + 'static)) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
