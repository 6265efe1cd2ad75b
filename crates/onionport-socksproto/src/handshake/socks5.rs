//! The SOCKS5 negotiation and request parser.

use super::{
    NO_ACCEPTABLE_METHODS, NO_AUTHENTICATION, StepResult, run_step, take, take_socks5_addr,
    take_u8, take_u16,
};
use crate::msg::{SocksAuth, SocksRequest, SocksVersion};
use crate::{Error, TResult};

/// Where a SOCKS5 handshake has got to.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the list of authentication methods.
    Methods,
    /// Authentication is settled; waiting for the request itself.
    Request,
    /// We have a request.
    Done,
    /// The handshake failed and cannot continue.
    Failed,
}

/// Parser for a SOCKS5 handshake, after its initial version byte.
///
/// Only "no authentication" is ever selected: a client that does not offer
/// it is refused with `[05 FF]`.
#[derive(Clone, Debug)]
pub struct Socks5Handshake {
    /// Current state.  Each completed message advances it.
    state: State,
    /// The parsed request, once we have one.
    request: Option<SocksRequest>,
    /// The error that ended this handshake, if any.
    failure: Option<Error>,
}

/// Output of one parser step: bytes to send back, whether we are done.
type Step = (Vec<u8>, bool);

impl Default for Socks5Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5Handshake {
    /// Construct a new parser, expecting the method list first.
    pub fn new() -> Self {
        Socks5Handshake {
            state: State::Methods,
            request: None,
            failure: None,
        }
    }

    /// Advance the handshake with `input`.
    pub(crate) fn handshake(&mut self, input: &[u8]) -> TResult<(usize, Vec<u8>, bool)> {
        let outcome = run_step(input, |r| match self.state {
            State::Methods => self.methods(r),
            State::Request => self.request(r),
            State::Done | State::Failed => Err(Error::AlreadyFinished.into()),
        })?;
        if let Err(e) = &outcome {
            if self.state != State::Done && self.state != State::Failed {
                self.fail(e.clone());
            }
        }
        Ok(outcome)
    }

    /// Record that the handshake ended with `e`.
    fn fail(&mut self, e: Error) {
        self.state = State::Failed;
        self.failure = Some(e);
    }

    /// Read the offered authentication methods and choose one.
    fn methods(&mut self, r: &mut &[u8]) -> StepResult<Step> {
        let nmethods = take_u8(r)?;
        let methods = take(r, nmethods.into())?;

        if methods.contains(&NO_AUTHENTICATION) {
            self.state = State::Request;
            Ok((vec![5, NO_AUTHENTICATION], false))
        } else {
            // The refusal still has to reach the client.
            self.fail(Error::NoAcceptableMethod);
            Ok((vec![5, NO_ACCEPTABLE_METHODS], true))
        }
    }

    /// Read the request line.
    fn request(&mut self, r: &mut &[u8]) -> StepResult<Step> {
        let version = take_u8(r)?;
        if version != 5 {
            return Err(Error::Syntax.into());
        }
        let cmd = take_u8(r)?.into();
        let reserved = take_u8(r)?;
        let addr = take_socks5_addr(r)?;
        let port = take_u16(r)?;
        if reserved != 0 {
            return Err(Error::Syntax.into());
        }

        let request = SocksRequest::new(SocksVersion::V5, cmd, addr, port, SocksAuth::NoAuth)?;
        self.state = State::Done;
        self.request = Some(request);
        Ok((Vec::new(), true))
    }

    /// Return true if we are still negotiating authentication.
    pub(crate) fn negotiating(&self) -> bool {
        self.state == State::Methods
    }

    /// Return true if this handshake is over, successfully or not.
    pub fn finished(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
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
    use crate::{SocksAddr, SocksCmd, Truncated};
    use hex_literal::hex;
    use std::net::Ipv6Addr;

    #[test]
    fn socks5_noauth_ipv4() {
        let mut h = Socks5Handshake::new();
        // Client offers "no auth" and username/password; we take "no auth".
        let (drain, reply, finished) = h.handshake(&hex!("02 0002")).unwrap().unwrap();
        assert_eq!((drain, &reply[..], finished), (3, &hex!("05 00")[..], false));
        assert!(!h.negotiating());

        let (drain, reply, finished) = h
            .handshake(&hex!("05 01 00 01 7F000001 0050"))
            .unwrap()
            .unwrap();
        assert_eq!(drain, 10);
        assert!(reply.is_empty());
        assert!(finished);
        let req = h.into_request().unwrap();
        assert_eq!(req.addr().to_string(), "127.0.0.1");
        assert_eq!(req.port(), 80);
        assert_eq!(req.auth(), &SocksAuth::NoAuth);
    }

    #[test]
    fn socks5_hostname() {
        let mut h = Socks5Handshake::new();
        let _ = h.handshake(&hex!("01 00")).unwrap().unwrap();

        let mut input = hex!("05 01 00 03 0b").to_vec();
        input.extend_from_slice(b"example.org");
        input.extend_from_slice(&hex!("01bb"));
        let (_, _, finished) = h.handshake(&input).unwrap().unwrap();
        assert!(finished);
        let req = h.into_request().unwrap();
        assert_eq!(req.hostname(), Some("example.org"));
        assert_eq!(req.port(), 443);
    }

    #[test]
    fn socks5_username_only_refused() {
        let mut h = Socks5Handshake::new();
        // Username/password alone is not enough: we only do "no auth".
        let (drain, reply, finished) = h.handshake(&hex!("01 02")).unwrap().unwrap();
        assert_eq!((drain, &reply[..], finished), (2, &hex!("05 FF")[..], true));
        assert_eq!(h.failure(), Some(&Error::NoAcceptableMethod));
        assert_eq!(
            h.handshake(&hex!("01 01 61 01 62")),
            Ok(Err(Error::AlreadyFinished))
        );
        assert!(h.into_request().is_none());
    }

    #[test]
    fn socks5_ipv6_udp() {
        let mut h = Socks5Handshake::new();
        let _ = h.handshake(&hex!("01 00")).unwrap().unwrap();
        let (_, _, finished) = h
            .handshake(&hex!("05 03 00 04 20010db8000000000000000000000001 0000"))
            .unwrap()
            .unwrap();
        assert!(finished);
        let req = h.into_request().unwrap();
        assert_eq!(req.command(), SocksCmd::UDP_ASSOCIATE);
        assert_eq!(
            req.addr(),
            &SocksAddr::Ip("2001:db8::1".parse::<Ipv6Addr>().unwrap().into())
        );
    }

    #[test]
    fn socks5_no_acceptable_method() {
        let mut h = Socks5Handshake::new();
        // GSSAPI only.
        let (drain, reply, finished) = h.handshake(&hex!("01 01")).unwrap().unwrap();
        assert_eq!((drain, &reply[..], finished), (2, &hex!("05 FF")[..], true));
        assert!(h.finished());
        assert_eq!(h.failure(), Some(&Error::NoAcceptableMethod));
        assert!(h.into_request().is_none());
    }

    #[test]
    fn socks5_truncated_and_bad() {
        let mut h = Socks5Handshake::new();
        assert_eq!(h.handshake(&hex!("03 00")), Err(Truncated));
        let _ = h.handshake(&hex!("01 00")).unwrap().unwrap();
        assert_eq!(h.handshake(&hex!("05 01 00 03 10 6162")), Err(Truncated));

        // Unknown address type.
        let mut bad = h.clone();
        assert!(matches!(
            bad.handshake(&hex!("05 01 00 09 00000000 0050")),
            Ok(Err(Error::NotImplemented(_)))
        ));
        assert!(bad.finished());

        // Unknown command.
        let mut bad = h.clone();
        assert!(matches!(
            bad.handshake(&hex!("05 F0 00 01 7F000001 0050")),
            Ok(Err(Error::NotImplemented(_)))
        ));

        // Nonzero reserved byte.
        let mut bad = h.clone();
        assert_eq!(
            bad.handshake(&hex!("05 01 01 01 7F000001 0050")),
            Ok(Err(Error::Syntax))
        );
        assert_eq!(
            bad.handshake(&hex!("05 01 00 01 7F000001 0050")),
            Ok(Err(Error::AlreadyFinished))
        );
    }
}
