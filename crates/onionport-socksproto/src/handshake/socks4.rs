//! The SOCKS4 and SOCKS4a request parser.

use super::{StepResult, hostname_from_bytes, run_step, take_u8, take_u16, take_u32, take_until_nul};
use crate::msg::{SocksAddr, SocksAuth, SocksCmd, SocksRequest, SocksVersion};
use crate::{Error, TResult};

use std::net::Ipv4Addr;

/// Parser for a SOCKS4 request, after its version byte.
///
/// SOCKS4 has no negotiation: the request is a single message,
/// `[cmd][port][ipv4][userid NUL]`, followed by `[hostname NUL]` when
/// the address is in the SOCKS4a sentinel range `0.0.0.1`-`0.0.0.255`.
#[derive(Clone, Debug, Default)]
pub struct Socks4Handshake {
    /// The parsed request, once we have one.
    request: Option<SocksRequest>,
    /// The error that ended this handshake, if any.
    failure: Option<Error>,
}

/// Return true if `ip` is one of the addresses that announce a SOCKS4a hostname.
fn is_socks4a_sentinel(ip: u32) -> bool {
    ip != 0 && (ip >> 8) == 0
}

impl Socks4Handshake {
    /// Construct a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to parse a request from `input`.
    pub(crate) fn handshake(&mut self, input: &[u8]) -> TResult<(usize, Vec<u8>, bool)> {
        if self.finished() {
            return Ok(Err(Error::AlreadyFinished));
        }
        let outcome = run_step(input, |r| {
            let request = Self::parse(r)?;
            self.request = Some(request);
            Ok((Vec::new(), true))
        })?;
        if let Err(e) = &outcome {
            self.failure = Some(e.clone());
        }
        Ok(outcome)
    }

    /// Parse the body of a SOCKS4 or SOCKS4a request.
    fn parse(r: &mut &[u8]) -> StepResult<SocksRequest> {
        let cmd: SocksCmd = take_u8(r)?.into();
        let port = take_u16(r)?;
        let ip = take_u32(r)?;
        let username = take_until_nul(r)?;
        let auth = if username.is_empty() {
            SocksAuth::NoAuth
        } else {
            SocksAuth::Socks4(username.into())
        };

        let addr = if is_socks4a_sentinel(ip) {
            // The hostname replaces the address entirely.
            let hostname = take_until_nul(r)?;
            SocksAddr::Hostname(hostname_from_bytes(hostname)?)
        } else {
            SocksAddr::Ip(Ipv4Addr::from(ip).into())
        };

        Ok(SocksRequest::new(SocksVersion::V4, cmd, addr, port, auth)?)
    }

    /// Return true if this handshake is over, successfully or not.
    pub fn finished(&self) -> bool {
        self.request.is_some() || self.failure.is_some()
    }

    /// Return the error that ended this handshake, if there was one.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Consume this handshake; if it finished successfully, return the request.
    pub fn into_request(self) -> Option<SocksRequest> {
        self.request
    }
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
    use crate::Truncated;
    use hex_literal::hex;

    #[test]
    fn socks4_good() {
        let mut h = Socks4Handshake::new();
        let (drain, reply, finished) = h.handshake(&hex!("01 0050 CB007107 00")).unwrap().unwrap();
        assert_eq!(drain, 8);
        assert!(reply.is_empty());
        assert!(finished);
        let req = h.into_request().unwrap();
        assert_eq!(req.port(), 80);
        assert_eq!(req.addr().to_string(), "203.0.113.7");
        assert_eq!(req.auth(), &SocksAuth::NoAuth);
        assert!(req.is_connect());
    }

    #[test]
    fn socks4a_hostname() {
        let mut h = Socks4Handshake::new();
        let mut input = hex!("01 01BB 00000007 6A757374 00").to_vec();
        input.extend_from_slice(b"www.torproject.org\0");
        input.extend_from_slice(b"leftover");
        let (drain, _, finished) = h.handshake(&input).unwrap().unwrap();
        assert!(finished);
        assert_eq!(drain, input.len() - "leftover".len());
        let req = h.into_request().unwrap();
        assert_eq!(req.hostname(), Some("www.torproject.org"));
        assert_eq!(req.ip(), None);
        assert_eq!(req.port(), 443);
        assert_eq!(req.auth(), &SocksAuth::Socks4(b"just".to_vec()));
    }

    #[test]
    fn socks4_truncated() {
        let mut h = Socks4Handshake::new();
        assert_eq!(h.handshake(&hex!("01 0050 CB00")), Err(Truncated));
        // No NUL on the user id yet.
        assert_eq!(h.handshake(&hex!("01 0050 CB007107 6162")), Err(Truncated));
        // Sentinel address, but the hostname hasn't arrived.
        assert_eq!(h.handshake(&hex!("01 0050 00000001 00")), Err(Truncated));
        assert!(!h.finished());
    }

    #[test]
    fn socks4_bad() {
        let mut h = Socks4Handshake::new();
        // Empty hostname.
        assert_eq!(
            h.handshake(&hex!("01 0050 00000001 00 00")),
            Ok(Err(Error::Syntax))
        );
        assert!(h.finished());
        assert_eq!(h.failure(), Some(&Error::Syntax));
        assert_eq!(
            h.handshake(&hex!("01 0050 CB007107 00")),
            Ok(Err(Error::AlreadyFinished))
        );

        // UDP_ASSOCIATE is SOCKS5 only.
        let mut h = Socks4Handshake::new();
        assert!(matches!(
            h.handshake(&hex!("03 0050 CB007107 00")),
            Ok(Err(Error::NotImplemented(_)))
        ));
        assert!(h.into_request().is_none());

        // Port zero.
        let mut h = Socks4Handshake::new();
        assert_eq!(
            h.handshake(&hex!("01 0000 CB007107 00")),
            Ok(Err(Error::Syntax))
        );
    }

    #[test]
    fn socks4_bind_parses() {
        let mut h = Socks4Handshake::new();
        let (_, _, finished) = h.handshake(&hex!("02 0015 C0000201 00")).unwrap().unwrap();
        assert!(finished);
        let req = h.into_request().unwrap();
        assert_eq!(req.command(), SocksCmd::BIND);
        assert!(!req.is_connect());
    }
}
