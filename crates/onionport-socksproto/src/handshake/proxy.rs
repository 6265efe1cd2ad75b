//! The proxy (responder) side of a SOCKS handshake.

use super::socks4::Socks4Handshake;
use super::socks5::Socks5Handshake;
use super::{Action, put_socks5_addr};
use crate::msg::{SocksAddr, SocksRequest, SocksStatus, SocksVersion};
use crate::{Error, Result, TResult};

use bytes::BufMut;
use std::net::{IpAddr, Ipv4Addr};

/// The Proxy (responder) side of an ongoing SOCKS handshake.
///
/// The caller reads the version byte itself, then builds one of these with
/// [`SocksProxyHandshake::for_version()`], and feeds it the bytes that
/// follow with [`handshake()`](SocksProxyHandshake::handshake).
///
/// Eventually you will hopefully obtain a [`SocksRequest`],
/// on which you should call [`.reply()`](SocksRequest::reply),
/// and send the resulting data to the peer.
#[derive(Clone, Debug)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksProxyHandshake {
    /// A SOCKS4 or SOCKS4a handshake.
    V4(Socks4Handshake),
    /// A SOCKS5 handshake.
    V5(Socks5Handshake),
}

/// The externally visible progress of a [`SocksProxyHandshake`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SocksHandshakeState {
    /// SOCKS5 only: waiting for the authentication method list.
    AwaitingHeader,
    /// Waiting for the request itself.
    AwaitingBody,
    /// The request has been parsed.
    Parsed,
    /// The handshake failed; no request will come of it.
    Failed,
}

impl SocksProxyHandshake {
    /// Construct a handshake for the protocol announced by `version`, the
    /// first byte the client sent.
    pub fn for_version(version: u8) -> Result<Self> {
        Ok(match SocksVersion::try_from(version)? {
            SocksVersion::V4 => SocksProxyHandshake::V4(Socks4Handshake::new()),
            SocksVersion::V5 => SocksProxyHandshake::V5(Socks5Handshake::new()),
        })
    }

    /// Return the protocol version of this handshake.
    pub fn version(&self) -> SocksVersion {
        match self {
            SocksProxyHandshake::V4(_) => SocksVersion::V4,
            SocksProxyHandshake::V5(_) => SocksVersion::V5,
        }
    }

    /// Try to advance the handshake, given some client input in `input`.
    ///
    /// If there isn't enough input, gives [`Truncated`](crate::Truncated):
    /// read more and call again with all the undrained bytes.
    /// On malformed input, gives an inner error, and the handshake is over.
    ///
    /// On success, return an Action describing what to tell the client
    /// and how much of its input to consume.
    pub fn handshake(&mut self, input: &[u8]) -> TResult<Action> {
        let step = match self {
            SocksProxyHandshake::V4(h) => h.handshake(input)?,
            SocksProxyHandshake::V5(h) => h.handshake(input)?,
        };
        Ok(step.map(|(drain, reply, finished)| Action {
            drain,
            reply,
            finished,
        }))
    }

    /// Return the current state of this handshake.
    pub fn state(&self) -> SocksHandshakeState {
        use SocksHandshakeState as S;
        match self {
            SocksProxyHandshake::V4(h) if h.failure().is_some() => S::Failed,
            SocksProxyHandshake::V4(h) if h.finished() => S::Parsed,
            SocksProxyHandshake::V4(_) => S::AwaitingBody,
            SocksProxyHandshake::V5(h) if h.failure().is_some() => S::Failed,
            SocksProxyHandshake::V5(h) if h.finished() => S::Parsed,
            SocksProxyHandshake::V5(h) if h.negotiating() => S::AwaitingHeader,
            SocksProxyHandshake::V5(_) => S::AwaitingBody,
        }
    }

    /// Return true if this handshake is finished, successfully or not.
    pub fn finished(&self) -> bool {
        match self {
            SocksProxyHandshake::V4(h) => h.finished(),
            SocksProxyHandshake::V5(h) => h.finished(),
        }
    }

    /// Consume this handshake's state; if it finished successfully,
    /// return a SocksRequest.
    ///
    /// Otherwise, return the error that ended it.
    pub fn into_request(self) -> Result<SocksRequest> {
        let (failure, request) = match self {
            SocksProxyHandshake::V4(h) => (h.failure().cloned(), h.into_request()),
            SocksProxyHandshake::V5(h) => (h.failure().cloned(), h.into_request()),
        };
        match (request, failure) {
            (Some(r), _) => Ok(r),
            (None, Some(e)) => Err(e),
            (None, None) => Err(Error::Bug("asked for request before handshake finished")),
        }
    }
}

impl SocksRequest {
    /// Format a reply to this request, indicating success or failure.
    ///
    /// `addr`, if given, is reported as the bound address; otherwise
    /// the address and port fields are zero.
    pub fn reply(&self, status: SocksStatus, addr: Option<&SocksAddr>) -> Vec<u8> {
        match self.version() {
            SocksVersion::V4 => self.s4(status, addr),
            SocksVersion::V5 => self.s5(status, addr),
        }
    }

    /// Format the reply announcing that the stream is open.
    pub fn success_reply(&self) -> Vec<u8> {
        self.reply(SocksStatus::SUCCEEDED, None)
    }

    /// Format a reply reporting failure with `status`.
    ///
    /// For SOCKS4, every failure is reported as "rejected".
    pub fn error_reply(&self, status: SocksStatus) -> Vec<u8> {
        debug_assert_ne!(status, SocksStatus::SUCCEEDED);
        self.reply(status, None)
    }

    /// Format a SOCKS4 reply.
    fn s4(&self, status: SocksStatus, addr: Option<&SocksAddr>) -> Vec<u8> {
        let mut w = Vec::with_capacity(8);
        w.put_u8(0);
        w.put_u8(status.into_socks4_status());
        match addr {
            Some(SocksAddr::Ip(IpAddr::V4(ip))) => {
                w.put_u16(self.port());
                w.put_slice(&ip.octets());
            }
            _ => {
                w.put_u16(0);
                w.put_u32(0);
            }
        }
        w
    }

    /// Format a SOCKS5 reply.
    fn s5(&self, status: SocksStatus, addr: Option<&SocksAddr>) -> Vec<u8> {
        let mut w = Vec::with_capacity(10);
        w.put_u8(5);
        w.put_u8(status.into());
        w.put_u8(0); // reserved.
        if let Some(a) = addr {
            put_socks5_addr(&mut w, a);
            w.put_u16(self.port());
        } else {
            put_socks5_addr(&mut w, &SocksAddr::Ip(Ipv4Addr::UNSPECIFIED.into()));
            w.put_u16(0);
        }
        w
    }
}
