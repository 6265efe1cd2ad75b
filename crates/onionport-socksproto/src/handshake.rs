//! Implement the socks handshakes.

#[cfg(feature = "client-handshake")]
pub(crate) mod client;
#[cfg(feature = "proxy-handshake")]
pub(crate) mod proxy;
#[cfg(feature = "proxy-handshake")]
pub(crate) mod socks4;
#[cfg(feature = "proxy-handshake")]
pub(crate) mod socks5;

use crate::msg::{SocksAddr, SocksHostname};
use crate::{Error, TResult, Truncated};

use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Constant for Username/Password-style authentication.
/// (See RFC 1929)
#[cfg(feature = "client-handshake")]
const USERNAME_PASSWORD: u8 = 0x02;
/// Constant for "no authentication".
const NO_AUTHENTICATION: u8 = 0x00;
/// Method-selection answer meaning "none of your methods are acceptable".
#[cfg(feature = "proxy-handshake")]
const NO_ACCEPTABLE_METHODS: u8 = 0xFF;
/// Version byte of the RFC 1929 username/password sub-negotiation.
#[cfg(feature = "client-handshake")]
const USERNAME_PASSWORD_VERSION: u8 = 0x01;

/// An action to take in response to a SOCKS handshake message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Action {
    /// If nonzero, this many bytes should be drained from the
    /// client's inputs.
    pub drain: usize,
    /// If nonempty, this reply should be sent to the other party.
    pub reply: Vec<u8>,
    /// If true, then this handshake is over, either successfully or not.
    pub finished: bool,
}

/// Why a single handshake step could not complete.
///
/// Internal: lets the parsers use `?` on both kinds of failure, and is
/// turned into a [`TResult`] at the public boundary.
#[derive(Clone, Debug)]
pub(crate) enum StepError {
    /// Not enough bytes yet.
    Truncated,
    /// The bytes can never become a valid message.
    Fail(Error),
}

impl From<Truncated> for StepError {
    fn from(_: Truncated) -> Self {
        StepError::Truncated
    }
}

impl From<Error> for StepError {
    fn from(e: Error) -> Self {
        StepError::Fail(e)
    }
}

/// Result of one step of a parser.
pub(crate) type StepResult<T> = std::result::Result<T, StepError>;

/// Run `step` over `input`, and report how many bytes it consumed.
///
/// A truncated step consumes nothing: the caller will present the same
/// bytes again, with more appended.
pub(crate) fn run_step<F>(input: &[u8], step: F) -> TResult<(usize, Vec<u8>, bool)>
where
    F: FnOnce(&mut &[u8]) -> StepResult<(Vec<u8>, bool)>,
{
    let mut r = input;
    match step(&mut r) {
        Ok((reply, finished)) => Ok(Ok((input.len() - r.remaining(), reply, finished))),
        Err(StepError::Truncated) => Err(Truncated),
        Err(StepError::Fail(e)) => Ok(Err(e)),
    }
}

/// Fail unless `r` has at least `n` bytes left.
fn need(r: &[u8], n: usize) -> Result<(), Truncated> {
    if r.remaining() < n {
        Err(Truncated)
    } else {
        Ok(())
    }
}

/// Take one byte from `r`.
pub(crate) fn take_u8(r: &mut &[u8]) -> Result<u8, Truncated> {
    need(r, 1)?;
    Ok(r.get_u8())
}

/// Take a big-endian u16 from `r`.
pub(crate) fn take_u16(r: &mut &[u8]) -> Result<u16, Truncated> {
    need(r, 2)?;
    Ok(r.get_u16())
}

/// Take a big-endian u32 from `r`.
pub(crate) fn take_u32(r: &mut &[u8]) -> Result<u32, Truncated> {
    need(r, 4)?;
    Ok(r.get_u32())
}

/// Take exactly `n` bytes from `r`.
pub(crate) fn take<'a>(r: &mut &'a [u8], n: usize) -> Result<&'a [u8], Truncated> {
    need(r, n)?;
    let (head, tail) = r.split_at(n);
    *r = tail;
    Ok(head)
}

/// Take bytes up to a NUL, consuming the NUL but not returning it.
pub(crate) fn take_until_nul<'a>(r: &mut &'a [u8]) -> Result<&'a [u8], Truncated> {
    let pos = r.iter().position(|b| *b == 0).ok_or(Truncated)?;
    let (head, tail) = r.split_at(pos);
    *r = &tail[1..];
    Ok(head)
}

/// Decode a hostname from raw bytes.
pub(crate) fn hostname_from_bytes(b: &[u8]) -> crate::Result<SocksHostname> {
    std::str::from_utf8(b)
        .map_err(|_| Error::Syntax)?
        .to_string()
        .try_into()
}

/// Read a SOCKS5 address: an address-type byte, then the address.
pub(crate) fn take_socks5_addr(r: &mut &[u8]) -> StepResult<SocksAddr> {
    let atype = take_u8(r)?;
    match atype {
        1 => Ok(SocksAddr::Ip(Ipv4Addr::from(take_u32(r)?).into())),
        3 => {
            let hlen = take_u8(r)?;
            let hostname = take(r, hlen.into())?;
            Ok(SocksAddr::Hostname(hostname_from_bytes(hostname)?))
        }
        4 => {
            let bytes: [u8; 16] = take(r, 16)?
                .try_into()
                .map_err(|_| Error::Bug("took wrong number of bytes"))?;
            Ok(SocksAddr::Ip(Ipv6Addr::from(bytes).into()))
        }
        _ => Err(Error::NotImplemented(format!("address type {}", atype).into()).into()),
    }
}

/// Write a SOCKS5 address: an address-type byte, then the address.
pub(crate) fn put_socks5_addr(w: &mut Vec<u8>, addr: &SocksAddr) {
    match addr {
        SocksAddr::Ip(IpAddr::V4(ip)) => {
            w.put_u8(1);
            w.put_slice(&ip.octets());
        }
        SocksAddr::Ip(IpAddr::V6(ip)) => {
            w.put_u8(4);
            w.put_slice(&ip.octets());
        }
        SocksAddr::Hostname(h) => {
            // SocksHostname guarantees at most 255 bytes.
            let h = h.as_ref().as_bytes();
            w.put_u8(3);
            w.put_u8(h.len() as u8);
            w.put_slice(h);
        }
    }
}
