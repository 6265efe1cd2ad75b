//! The interface between SOCKS connections and whatever opens exit streams.
//!
//! A [`ConnectionBridge`](crate::ConnectionBridge) never builds circuits or
//! talks to the network on its own; it asks a [`StreamOpener`] for a stream
//! to a [`StreamTarget`], and relays bytes over whatever it gets back.

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use onionport_socksproto::{SocksAddr, SocksAuth, SocksRequest, SocksStatus};
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// The host part of a [`StreamTarget`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum TargetHost {
    /// A hostname, to be resolved at the far end of the stream (if at all).
    Hostname(String),
    /// A literal IP address.
    Ip(IpAddr),
}

/// Credentials that a client presented in its SOCKS handshake.
///
/// We never check these.  They only serve to tell clients apart, so that
/// an opener can keep their streams from sharing circuits.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Credentials {
    /// The username, or the SOCKS4 user id.
    username: Vec<u8>,
    /// The password.  Always empty for SOCKS4.
    password: Vec<u8>,
}

impl Credentials {
    /// Construct a new set of credentials.
    pub fn new(username: Vec<u8>, password: Vec<u8>) -> Self {
        Credentials { username, password }
    }

    /// Return the username.
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    /// Return the password.
    pub fn password(&self) -> &[u8] {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

/// Where a client has asked us to open a stream to.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StreamTarget {
    /// The destination host.
    host: TargetHost,
    /// The destination port.
    port: u16,
    /// What the client authenticated with, if anything.
    credentials: Option<Credentials>,
}

impl StreamTarget {
    /// Construct a new target, with no credentials.
    pub fn new(host: TargetHost, port: u16) -> Self {
        StreamTarget {
            host,
            port,
            credentials: None,
        }
    }

    /// Attach the client's `credentials` to this target.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Return the client's credentials, if it gave any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Return the destination host.
    pub fn host(&self) -> &TargetHost {
        &self.host
    }

    /// Return the destination port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the hostname, if this target has one.
    pub fn hostname(&self) -> Option<&str> {
        match &self.host {
            TargetHost::Hostname(h) => Some(h),
            TargetHost::Ip(_) => None,
        }
    }

    /// Return true if this target names an onion service.
    pub fn is_onion(&self) -> bool {
        self.hostname()
            .is_some_and(onionport_hsdesc::OnionServiceId::is_onion_hostname)
    }
}

impl From<&SocksRequest> for StreamTarget {
    /// Take the destination out of a parsed request.
    ///
    /// A hostname, when the client gave one, wins over any address: we never
    /// resolve names locally, and a SOCKS4a request carries only a
    /// placeholder address.
    fn from(req: &SocksRequest) -> Self {
        let host = match req.addr() {
            SocksAddr::Hostname(h) => TargetHost::Hostname(h.as_ref().to_owned()),
            SocksAddr::Ip(ip) => TargetHost::Ip(*ip),
        };
        let target = StreamTarget::new(host, req.port());
        match req.auth() {
            SocksAuth::Socks4(id) => {
                target.with_credentials(Credentials::new(id.clone(), Vec::new()))
            }
            SocksAuth::Username(user, pass) => {
                target.with_credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => target,
        }
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetHost::Hostname(h) => write!(f, "{}", h),
            TargetHost::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
            TargetHost::Ip(IpAddr::V4(ip)) => write!(f, "{}", ip),
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An error from trying to open an exit stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpenError {
    /// We were told to give up before the stream was open.
    #[error("Stream open was cancelled")]
    Cancelled,

    /// An IO error occurred while opening the stream.
    #[error("IO error while {action}")]
    Io {
        /// What we were doing.
        action: &'static str,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Opening the stream took too long.
    #[error("Timed out while opening stream")]
    Timeout,

    /// An upstream SOCKS proxy answered our request with a failure.
    #[error("Upstream proxy refused the stream: {0}")]
    UpstreamRefused(SocksStatus),

    /// An upstream SOCKS proxy did not follow the protocol.
    #[error("Upstream proxy violated the SOCKS protocol")]
    UpstreamProtocol(#[source] onionport_socksproto::Error),

    /// We have no descriptor for the onion service that was asked for.
    #[error("Onion service not found")]
    OnionServiceNotFound,

    /// The hostname ended in `.onion` but was not a valid onion address.
    #[error("Invalid onion service address")]
    BadOnionAddress,
}

impl OpenError {
    /// Return the SOCKS status that best reports this error to a client.
    pub fn socks_status(&self) -> SocksStatus {
        use SocksStatus as S;
        match self {
            OpenError::OnionServiceNotFound => S::HS_DESC_NOT_FOUND,
            OpenError::BadOnionAddress => S::HS_BAD_ADDRESS,
            OpenError::Timeout => S::TTL_EXPIRED,
            OpenError::UpstreamRefused(status) => *status,
            _ => S::GENERAL_FAILURE,
        }
    }

    /// Return true if this error reports cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OpenError::Cancelled)
    }

    /// Construct an [`OpenError::Io`].
    pub(crate) fn io(action: &'static str, source: io::Error) -> Self {
        OpenError::Io { action, source }
    }
}

/// A service that can open streams to arbitrary destinations.
///
/// One opener is shared by every connection, so it must be safe to call
/// from many tasks at once.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    /// The kind of stream this opener returns.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a stream to `target`.
    ///
    /// Implementations should not resolve hostnames locally.
    async fn open_exit_stream(&self, target: &StreamTarget) -> Result<Self::Stream, OpenError>;
}

#[async_trait]
impl<T: StreamOpener + ?Sized> StreamOpener for Arc<T> {
    type Stream = T::Stream;

    async fn open_exit_stream(&self, target: &StreamTarget) -> Result<Self::Stream, OpenError> {
        (**self).open_exit_stream(target).await
    }
}
