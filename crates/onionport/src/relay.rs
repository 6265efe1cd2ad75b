//! Relay bytes between a SOCKS client and its exit stream.

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::{FutureExt as _, pin_mut, select};
use std::io::Result as IoResult;
use tracing::debug;

/// Size of the buffer used for each direction of a relay.
pub const RELAY_BUF_LEN: usize = 1024;

/// How much data a finished relay moved.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct RelayStats {
    /// Bytes read from the client and written to the exit stream.
    pub client_to_stream: u64,
    /// Bytes read from the exit stream and written to the client.
    pub stream_to_client: u64,
}

/// Copy data between `client` and `stream`, in both directions at once,
/// until either side reaches EOF or fails.
///
/// Whichever direction stops first stops the other one too.  Both writers
/// are then closed, whether the relay ended cleanly or not.
pub async fn relay_streams<A, B>(client: A, stream: B) -> IoResult<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_r, mut client_w) = client.split();
    let (stream_r, mut stream_w) = stream.split();
    let mut stats = RelayStats::default();

    let result = {
        let upward = copy_interactive(client_r, &mut stream_w, &mut stats.client_to_stream).fuse();
        let downward =
            copy_interactive(stream_r, &mut client_w, &mut stats.stream_to_client).fuse();
        pin_mut!(upward, downward);
        select! {
            r = upward => r,
            r = downward => r,
        }
    };

    if let Err(e) = stream_w.close().await {
        debug!("Error while closing exit stream: {}", e);
    }
    if let Err(e) = client_w.close().await {
        debug!("Error while closing client stream: {}", e);
    }

    result.map(|()| stats)
}

/// Copy all the data from `reader` into `writer` until we encounter an EOF or
/// an error, adding the number of bytes copied to `count`.
///
/// Unlike `futures::io::copy()`, this is meant for interactive readers and
/// writers, where the reader might pause for a while, but where we want to
/// send data on the writer as soon as it is available.  To keep the number of
/// flushes low, the writer is flushed only when the reader has no data.
///
/// The writer is flushed, but not closed, on the way out.
async fn copy_interactive<R, W>(mut reader: R, mut writer: W, count: &mut u64) -> IoResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use futures::{poll, task::Poll};

    let mut buf = [0_u8; RELAY_BUF_LEN];

    let loop_result: IoResult<()> = loop {
        let mut read_future = reader.read(&mut buf[..]);
        let n = match poll!(&mut read_future) {
            Poll::Ready(Err(e)) => break Err(e),
            Poll::Ready(Ok(0)) => break Ok(()), // EOF
            Poll::Ready(Ok(n)) => n,
            Poll::Pending => {
                writer.flush().await?;
                // The read future is pending, so we should wait on it.
                match read_future.await {
                    Err(e) => break Err(e),
                    Ok(0) => break Ok(()),
                    Ok(n) => n,
                }
            }
        };
        writer.write_all(&buf[..n]).await?;
        *count += n as u64;
    };

    let flush_result = writer.flush().await;
    loop_result.and(flush_result)
}
