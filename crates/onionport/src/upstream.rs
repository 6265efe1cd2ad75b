//! Open exit streams through another SOCKS proxy.
//!
//! This is what the `onionport` binary uses: the onion-routing client
//! itself (for example, a Tor daemon) runs elsewhere and exposes a SOCKS5
//! port; we hand each request on to it.

use crate::cfg::UpstreamConfig;
use crate::connect::{OpenError, StreamOpener, StreamTarget, TargetHost};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use onionport_socksproto::{
    SOCKS_BUF_LEN, SocksAddr, SocksAuth, SocksClientHandshake, SocksCmd, SocksReply,
    SocksRequest, SocksStatus, SocksVersion,
};
use safelog::sensitive;
use sha1::{Digest, Sha1};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt as _};
use tracing::debug;

/// Longest username, or password, that a SOCKS5 request can carry.
const MAX_CREDENTIAL_LEN: usize = u8::MAX as usize;

/// A [`StreamOpener`] that asks an upstream SOCKS5 proxy for each stream.
#[derive(Clone, Debug)]
pub struct UpstreamSocksConnector {
    /// Address of the upstream proxy.
    addr: SocketAddr,
    /// How long to allow for connecting and negotiating, together.
    connect_timeout: Duration,
}

impl UpstreamSocksConnector {
    /// Construct a connector that uses the proxy at `addr`.
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        UpstreamSocksConnector {
            addr,
            connect_timeout,
        }
    }

    /// Construct a connector from its configuration.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(config.socks_addr, config.connect_timeout)
    }

    /// Connect to the upstream proxy and negotiate a stream to `target`.
    async fn connect(&self, target: &StreamTarget) -> Result<Compat<TcpStream>, OpenError> {
        let request = upstream_request(target)?;
        let tcp = TcpStream::connect(self.addr)
            .await
            .map_err(|e| OpenError::io("connecting to upstream proxy", e))?;
        let mut stream = tcp.compat();
        let reply = client_handshake(&mut stream, request).await?;
        match reply.status() {
            SocksStatus::SUCCEEDED => Ok(stream),
            status => Err(OpenError::UpstreamRefused(status)),
        }
    }
}

#[async_trait]
impl StreamOpener for UpstreamSocksConnector {
    type Stream = Compat<TcpStream>;

    async fn open_exit_stream(&self, target: &StreamTarget) -> Result<Self::Stream, OpenError> {
        debug!(
            "Asking upstream proxy at {} for {}",
            self.addr,
            sensitive(target)
        );
        tokio::time::timeout(self.connect_timeout, self.connect(target))
            .await
            .map_err(|_elapsed| OpenError::Timeout)?
    }
}

/// Build the SOCKS5 CONNECT request we send upstream for `target`.
///
/// Client credentials are passed along as a username and password, so that
/// the upstream can keep different clients' streams apart.
fn upstream_request(target: &StreamTarget) -> Result<SocksRequest, OpenError> {
    let addr = match target.host() {
        TargetHost::Hostname(h) => SocksAddr::Hostname(
            h.clone()
                .try_into()
                .map_err(OpenError::UpstreamProtocol)?,
        ),
        TargetHost::Ip(ip) => SocksAddr::Ip(*ip),
    };
    let auth = match target.credentials() {
        Some(c) => SocksAuth::Username(
            fit_credential(c.username()),
            fit_credential(c.password()),
        ),
        None => SocksAuth::NoAuth,
    };
    SocksRequest::new(
        SocksVersion::V5,
        SocksCmd::CONNECT,
        addr,
        target.port(),
        auth,
    )
    .map_err(OpenError::UpstreamProtocol)
}

/// Make `field` short enough for a SOCKS5 username or password.
///
/// A SOCKS4 user id has no length limit.  Anything too long is replaced by
/// its SHA-1 digest, so that distinct ids stay distinct upstream.
fn fit_credential(field: &[u8]) -> Vec<u8> {
    if field.len() <= MAX_CREDENTIAL_LEN {
        field.to_vec()
    } else {
        debug!(
            "Credential of {} bytes is too long for SOCKS5; forwarding its digest.",
            field.len()
        );
        Sha1::digest(field).to_vec()
    }
}

/// Run a SOCKS5 client handshake for `request` over `stream`, and return
/// the proxy's final reply.
async fn client_handshake<S>(stream: &mut S, request: SocksRequest) -> Result<SocksReply, OpenError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = SocksClientHandshake::new(request);
    let mut inbuf = [0_u8; SOCKS_BUF_LEN];
    let mut n_read = 0;
    loop {
        let action = match handshake.handshake(&inbuf[..n_read]) {
            Err(_truncated) => {
                if n_read == inbuf.len() {
                    return Err(OpenError::UpstreamProtocol(
                        onionport_socksproto::Error::Syntax,
                    ));
                }
                // One byte at a time, so that we never read past the end of
                // the reply into stream data.
                let n = stream
                    .read(&mut inbuf[n_read..n_read + 1])
                    .await
                    .map_err(|e| OpenError::io("reading from upstream proxy", e))?;
                if n == 0 {
                    return Err(OpenError::io(
                        "reading from upstream proxy",
                        io::ErrorKind::UnexpectedEof.into(),
                    ));
                }
                n_read += n;
                continue;
            }
            Ok(Err(e)) => return Err(OpenError::UpstreamProtocol(e)),
            Ok(Ok(action)) => action,
        };
        inbuf.copy_within(action.drain..n_read, 0);
        n_read -= action.drain;
        if !action.reply.is_empty() {
            stream
                .write_all(&action.reply)
                .await
                .map_err(|e| OpenError::io("writing to upstream proxy", e))?;
            stream
                .flush()
                .await
                .map_err(|e| OpenError::io("flushing upstream proxy", e))?;
        }
        if action.finished {
            break;
        }
    }
    handshake
        .into_reply()
        .ok_or(OpenError::UpstreamProtocol(onionport_socksproto::Error::Bug(
            "client handshake finished without a reply",
        )))
}

#[cfg(test)]
mod test {
    // @@ begin test lint list
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list
    use super::*;
    use crate::connect::Credentials;
    use crate::socks::negotiate;
    use onionport_socksproto::SocksProxyHandshake;
    use tokio::net::TcpListener;

    /// Credentials that a client presented to [`fake_upstream`].
    type SeenCredentials = Option<(Vec<u8>, Vec<u8>)>;

    /// Read one length-prefixed RFC 1929 field.
    async fn read_field<S: AsyncRead + Unpin>(s: &mut S) -> Vec<u8> {
        let mut len = [0_u8; 1];
        s.read_exact(&mut len).await.unwrap();
        let mut field = vec![0_u8; len[0].into()];
        s.read_exact(&mut field).await.unwrap();
        field
    }

    /// Run a one-shot upstream proxy that answers with `status`, then sends
    /// `banner`.  Return its address, and a handle yielding the request it
    /// got along with any username and password.
    async fn fake_upstream(
        status: SocksStatus,
        banner: &'static [u8],
    ) -> (
        SocketAddr,
        tokio::task::JoinHandle<(SocksRequest, SeenCredentials)>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut s = tcp.compat();

            // Unlike ours, this proxy takes username/password.
            let mut head = [0_u8; 2];
            s.read_exact(&mut head).await.unwrap();
            assert_eq!(head[0], 5);
            let mut methods = vec![0_u8; head[1].into()];
            s.read_exact(&mut methods).await.unwrap();
            let seen = if methods.contains(&2) {
                s.write_all(&[5, 2]).await.unwrap();
                let mut ver = [0_u8; 1];
                s.read_exact(&mut ver).await.unwrap();
                assert_eq!(ver[0], 1);
                let user = read_field(&mut s).await;
                let pass = read_field(&mut s).await;
                s.write_all(&[1, 0]).await.unwrap();
                Some((user, pass))
            } else {
                s.write_all(&[5, 0]).await.unwrap();
                None
            };

            // Methods are settled; our own parser can read the request.
            let mut hs = SocksProxyHandshake::for_version(5).unwrap();
            let _ = hs.handshake(&[1, 0]).unwrap().unwrap();
            let mut inbuf = [0_u8; SOCKS_BUF_LEN];
            let (request, _) = negotiate(&mut s, hs, &mut inbuf).await.unwrap();
            let bound = SocksAddr::Ip([10, 0, 0, 1].into());
            s.write_all(&request.reply(status, Some(&bound))).await.unwrap();
            s.write_all(banner).await.unwrap();
            s.close().await.unwrap();
            (request, seen)
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn open_through_upstream() {
        let (addr, upstream) = fake_upstream(SocksStatus::SUCCEEDED, b"220 hello\r\n").await;
        let c = UpstreamSocksConnector::new(addr, Duration::from_secs(10));
        let target = StreamTarget::new(TargetHost::Hostname("mail.example.com".into()), 25);

        let mut stream = c.open_exit_stream(&target).await.unwrap();
        let mut banner = Vec::new();
        stream.read_to_end(&mut banner).await.unwrap();
        // The banner came right behind the reply, and we didn't swallow it.
        assert_eq!(banner, b"220 hello\r\n");

        let (req, seen) = upstream.await.unwrap();
        assert_eq!(req.hostname(), Some("mail.example.com"));
        assert_eq!(req.port(), 25);
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn credentials_forwarded() {
        let (addr, upstream) = fake_upstream(SocksStatus::SUCCEEDED, b"").await;
        let c = UpstreamSocksConnector::new(addr, Duration::from_secs(10));
        let target = StreamTarget::new(TargetHost::Ip([192, 0, 2, 7].into()), 443)
            .with_credentials(Credentials::new(b"alice".to_vec(), b"tab-1".to_vec()));

        let _stream = c.open_exit_stream(&target).await.unwrap();
        let (req, seen) = upstream.await.unwrap();
        assert_eq!(req.ip(), Some([192, 0, 2, 7].into()));
        assert_eq!(seen, Some((b"alice".to_vec(), b"tab-1".to_vec())));
    }

    #[test]
    fn long_socks4_id() {
        let long_id = vec![b'u'; 300];
        let target = StreamTarget::new(TargetHost::Ip([192, 0, 2, 7].into()), 80)
            .with_credentials(Credentials::new(long_id.clone(), vec![]));
        let req = upstream_request(&target).unwrap();
        let SocksAuth::Username(user, pass) = req.auth() else {
            panic!("no credentials forwarded");
        };
        assert_eq!(user, &Sha1::digest(&long_id).to_vec());
        assert!(pass.is_empty());

        // Different ids still give different usernames.
        let other = StreamTarget::new(TargetHost::Ip([192, 0, 2, 7].into()), 80)
            .with_credentials(Credentials::new(vec![b'v'; 300], vec![]));
        let other = upstream_request(&other).unwrap();
        assert_ne!(req.auth(), other.auth());

        // A 255-byte id fits as it is.
        let target = StreamTarget::new(TargetHost::Ip([192, 0, 2, 7].into()), 80)
            .with_credentials(Credentials::new(vec![b'u'; 255], vec![]));
        let req = upstream_request(&target).unwrap();
        assert_eq!(
            req.auth(),
            &SocksAuth::Username(vec![b'u'; 255], vec![])
        );
    }

    #[tokio::test]
    async fn refused_upstream() {
        let (addr, _upstream) = fake_upstream(SocksStatus::HOST_UNREACHABLE, b"").await;
        let c = UpstreamSocksConnector::new(addr, Duration::from_secs(10));
        let target = StreamTarget::new(TargetHost::Hostname("example.com".into()), 80);

        let e = c.open_exit_stream(&target).await.unwrap_err();
        assert!(matches!(
            e,
            OpenError::UpstreamRefused(SocksStatus::HOST_UNREACHABLE)
        ));
        assert_eq!(e.socks_status(), SocksStatus::HOST_UNREACHABLE);
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let c = UpstreamSocksConnector::new(addr, Duration::from_millis(100));
        let target = StreamTarget::new(TargetHost::Hostname("example.com".into()), 80);

        // The listener accepts (via the backlog) but never says anything.
        let e = c.open_exit_stream(&target).await.unwrap_err();
        assert!(matches!(e, OpenError::Timeout));
        drop(listener);
    }

    #[tokio::test]
    async fn nobody_home() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let c = UpstreamSocksConnector::new(addr, Duration::from_secs(10));
        let target = StreamTarget::new(TargetHost::Hostname("example.com".into()), 80);

        let e = c.open_exit_stream(&target).await.unwrap_err();
        assert!(matches!(e, OpenError::Io { .. }));
        assert_eq!(e.socks_status(), SocksStatus::GENERAL_FAILURE);
    }
}
