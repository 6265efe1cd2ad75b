//! Declare an error type for onionport_socksproto
use std::borrow::Cow;

use thiserror::Error;

/// An error that occurs while negotiating a SOCKS handshake.
#[derive(Clone, Error, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The SOCKS client didn't implement SOCKS correctly.
    ///
    /// (Or, more likely, we didn't account for its behavior.)
    #[error("SOCKS protocol syntax violation")]
    Syntax,

    /// The SOCKS client declared a SOCKS version number that isn't
    /// one we support.
    ///
    /// In all likelihood, this is somebody trying to use the port for
    /// some protocol other than SOCKS.
    #[error("Unrecognized SOCKS protocol version {0}")]
    BadProtocol(u8),

    /// The SOCKS client tried to use a SOCKS feature that we don't
    /// support at all.
    #[error("SOCKS feature ({0}) not implemented")]
    NotImplemented(Cow<'static, str>),

    /// The SOCKS5 client offered no authentication method that we accept.
    #[error("No acceptable SOCKS5 authentication method offered")]
    NoAcceptableMethod,

    /// The SOCKS proxy refused our authentication.
    #[error("SOCKS Authentication failed")]
    AuthRejected,

    /// Tried to progress the SOCKS handshake when it was already
    /// finished.  This is a programming error.
    #[error("SOCKS handshake was finished; no need to call this again")]
    AlreadyFinished,

    /// The program (perhaps this module, perhaps the caller) is buggy.
    #[error("Bug while handling SOCKS handshake: {0}")]
    Bug(&'static str),
}

/// The input ended before a complete SOCKS message was available.
///
/// This is not a failure: read more bytes and try again.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("SOCKS message truncated; more input needed")]
#[allow(clippy::exhaustive_structs)]
pub struct Truncated;
