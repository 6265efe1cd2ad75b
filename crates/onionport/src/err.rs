//! Errors for the SOCKS front end.

use crate::connect::OpenError;
use onionport_socksproto::SocksCmd;
use std::io;
use thiserror::Error;

/// A connection was abandoned because we were shutting down.
#[derive(Clone, Copy, Debug, Default, Error, Eq, PartialEq)]
#[error("Connection cancelled")]
#[non_exhaustive]
pub struct Cancelled;

/// Why a single SOCKS connection ended early.
///
/// The bridge logs these; apart from [`ConnError::Cancelled`], none of them
/// is reported to its caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnError {
    /// Reading from or writing to one of the connection's streams failed.
    #[error("IO error while {action}")]
    Io {
        /// What we were doing.
        action: &'static str,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The client sent a handshake we could not accept.
    #[error("SOCKS handshake failed")]
    Handshake(#[source] onionport_socksproto::Error),

    /// The client closed the connection before the handshake was complete.
    #[error("Connection closed during SOCKS handshake")]
    UnexpectedEof,

    /// The client seems to be speaking HTTP to a SOCKS port.
    #[error("Received an HTTP request on a SOCKS port; HTTP proxying is not implemented")]
    HttpNotSupported,

    /// The first byte was not a SOCKS version we know.
    #[error("Unrecognized protocol (first byte {0:#04x})")]
    UnrecognizedProtocol(u8),

    /// The client asked for something other than CONNECT.
    #[error("SOCKS command {0} is not supported")]
    CommandNotSupported(SocksCmd),

    /// We could not open a stream for the client.
    #[error("Unable to open stream")]
    Open(#[source] OpenError),

    /// We were told to stop.
    #[error("Connection cancelled")]
    Cancelled,
}

impl ConnError {
    /// Construct a [`ConnError::Io`].
    pub(crate) fn io(action: &'static str, source: io::Error) -> Self {
        ConnError::Io { action, source }
    }

    /// Return true if this is an everyday way for a connection to end,
    /// not worth a warning.
    pub(crate) fn is_routine(&self) -> bool {
        matches!(
            self,
            ConnError::Io { .. } | ConnError::UnexpectedEof | ConnError::UnrecognizedProtocol(_)
        )
    }
}

impl From<OpenError> for ConnError {
    fn from(e: OpenError) -> Self {
        match e {
            OpenError::Cancelled => ConnError::Cancelled,
            e => ConnError::Open(e),
        }
    }
}
