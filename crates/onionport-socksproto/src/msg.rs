//! Structures that represent SOCKS messages

use crate::{Error, Result};

use caret::caret_int;
use std::fmt;
use std::net::IpAddr;

/// A supported SOCKS version.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum SocksVersion {
    /// Socks v4 (and its v4a extension).
    V4,
    /// Socks v5.
    V5,
}

impl TryFrom<u8> for SocksVersion {
    type Error = Error;
    fn try_from(v: u8) -> Result<SocksVersion> {
        match v {
            4 => Ok(SocksVersion::V4),
            5 => Ok(SocksVersion::V5),
            _ => Err(Error::BadProtocol(v)),
        }
    }
}

impl From<SocksVersion> for u8 {
    fn from(v: SocksVersion) -> u8 {
        match v {
            SocksVersion::V4 => 4,
            SocksVersion::V5 => 5,
        }
    }
}

/// A completed SOCKS request, as negotiated on a SOCKS connection.
///
/// Once this request exists, we know where to connect.  Don't
/// discard this object immediately: Use it to report success or
/// failure.
///
/// There are no mutators: the destination of a parsed request
/// never changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksRequest {
    /// Negotiated SOCKS protocol version.
    version: SocksVersion,
    /// The command requested by the SOCKS client.
    cmd: SocksCmd,
    /// The target address.
    addr: SocksAddr,
    /// The target port.
    port: u16,
    /// Authentication information.
    ///
    /// Nobody checks these credentials; an upstream proxy may use them
    /// to decide which streams can share a circuit.
    auth: SocksAuth,
}

/// An address sent or received as part of a SOCKS handshake
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksAddr {
    /// A hostname, left unresolved so that resolution happens at the far
    /// end of the circuit.
    Hostname(SocksHostname),
    /// A numeric IP address.
    Ip(IpAddr),
}

/// A hostname for use with SOCKS.
///
/// Never empty, at most 255 bytes, and without any NUL bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocksHostname(String);

/// Provided authentication from a SOCKS handshake
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SocksAuth {
    /// No authentication was provided
    NoAuth,
    /// Socks4 authentication (a user id string) was provided.
    Socks4(Vec<u8>),
    /// Socks5 username/password authentication was provided.
    Username(Vec<u8>, Vec<u8>),
}

caret_int! {
    /// Command from the socks client telling us what to do.
    pub struct SocksCmd(u8) {
        /// Connect to a remote TCP address:port.
        CONNECT = 1,
        /// Listen for an incoming connection.  Never served here.
        BIND = 2,
        /// Relay UDP datagrams (SOCKS5 only).  Never served here.
        UDP_ASSOCIATE = 3,
    }
}

caret_int! {
    /// Possible reply status values from a SOCKS5 handshake.
    ///
    /// Note that the documentation for these values is kind of scant,
    /// and is limited to what the RFC says.  Note also that SOCKS4
    /// only represents success and failure.
    pub struct SocksStatus(u8) {
        /// RFC 1928: "succeeded"
        SUCCEEDED = 0x00,
        /// RFC 1928: "general SOCKS server failure"
        GENERAL_FAILURE = 0x01,
        /// RFC 1928: "connection not allowable by ruleset"
        NOT_ALLOWED = 0x02,
        /// RFC 1928: "Network unreachable"
        NETWORK_UNREACHABLE = 0x03,
        /// RFC 1928: "Host unreachable"
        HOST_UNREACHABLE = 0x04,
        /// RFC 1928: "Connection refused"
        CONNECTION_REFUSED = 0x05,
        /// RFC 1928: "TTL expired"
        TTL_EXPIRED = 0x06,
        /// RFC 1928: "Command not supported"
        COMMAND_NOT_SUPPORTED = 0x07,
        /// RFC 1928: "Address type not supported"
        ADDRTYPE_NOT_SUPPORTED = 0x08,
        /// Prop304: "Onion Service Descriptor Can Not be Found"
        HS_DESC_NOT_FOUND = 0xF0,
        /// Prop304: "Onion Service Descriptor Is Invalid"
        HS_DESC_INVALID = 0xF1,
        /// Prop304: "Onion Service Introduction Failed"
        HS_INTRO_FAILED = 0xF2,
        /// Prop304: "Onion Service Rendezvous Failed"
        HS_REND_FAILED = 0xF3,
        /// Prop304: "Onion Service Missing Client Authorization"
        HS_MISSING_CLIENT_AUTH = 0xF4,
        /// Prop304: "Onion Service Wrong Client Authorization"
        HS_WRONG_CLIENT_AUTH = 0xF5,
        /// "Onion service address is invalid"
        HS_BAD_ADDRESS = 0xF6,
        /// "Onion Service Introduction Timed Out"
        HS_INTRO_TIMEOUT = 0xF7
    }
}

impl SocksCmd {
    /// Return true if `version` of the protocol can express this command.
    fn recognized_by(self, version: SocksVersion) -> bool {
        match version {
            SocksVersion::V4 => matches!(self, SocksCmd::CONNECT | SocksCmd::BIND),
            SocksVersion::V5 => matches!(
                self,
                SocksCmd::CONNECT | SocksCmd::BIND | SocksCmd::UDP_ASSOCIATE
            ),
        }
    }
}

impl SocksStatus {
    /// Convert this status into a value for use with SOCKS4 or SOCKS4a.
    ///
    /// SOCKS4 can only say "granted" or "rejected".
    #[cfg(feature = "proxy-handshake")]
    pub(crate) fn into_socks4_status(self) -> u8 {
        match self {
            SocksStatus::SUCCEEDED => 0x5A,
            _ => 0x5B,
        }
    }
}

impl TryFrom<String> for SocksHostname {
    type Error = Error;
    fn try_from(s: String) -> Result<SocksHostname> {
        // The length limit comes from SOCKS5 and the NUL restriction from
        // SOCKS4, but we enforce both everywhere.
        if s.is_empty() || s.len() > 255 || s.as_bytes().contains(&0) {
            Err(Error::Syntax)
        } else {
            Ok(SocksHostname(s))
        }
    }
}

impl AsRef<str> for SocksHostname {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl SocksAuth {
    /// Check whether this authentication is well-formed and compatible with the
    /// provided SOCKS version.
    ///
    /// Return an error if not.
    fn validate(&self, version: SocksVersion) -> Result<()> {
        match self {
            SocksAuth::NoAuth => {}
            SocksAuth::Socks4(data) => {
                if version != SocksVersion::V4 || data.contains(&0) {
                    return Err(Error::Syntax);
                }
            }
            SocksAuth::Username(user, pass) => {
                if version != SocksVersion::V5
                    || user.len() > u8::MAX as usize
                    || pass.len() > u8::MAX as usize
                {
                    return Err(Error::Syntax);
                }
            }
        }
        Ok(())
    }
}

impl SocksRequest {
    /// Create a SocksRequest with a given set of fields.
    ///
    /// Return an error if the inputs aren't supported or valid.
    pub fn new(
        version: SocksVersion,
        cmd: SocksCmd,
        addr: SocksAddr,
        port: u16,
        auth: SocksAuth,
    ) -> Result<Self> {
        if !cmd.recognized_by(version) {
            return Err(Error::NotImplemented(
                format!("SOCKS command {}", cmd).into(),
            ));
        }
        if port == 0 && cmd == SocksCmd::CONNECT {
            return Err(Error::Syntax);
        }
        auth.validate(version)?;

        Ok(SocksRequest {
            version,
            cmd,
            addr,
            port,
            auth,
        })
    }

    /// Return the negotiated version (4 or 5).
    pub fn version(&self) -> SocksVersion {
        self.version
    }

    /// Return the command that the client requested.
    pub fn command(&self) -> SocksCmd {
        self.cmd
    }

    /// Return true if the client asked us to CONNECT, the only command we serve.
    pub fn is_connect(&self) -> bool {
        self.cmd == SocksCmd::CONNECT
    }

    /// Return the 'authentication' information from this request.
    pub fn auth(&self) -> &SocksAuth {
        &self.auth
    }

    /// Return the requested port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the requested address.
    pub fn addr(&self) -> &SocksAddr {
        &self.addr
    }

    /// Return true if the destination is an unresolved hostname.
    pub fn has_hostname(&self) -> bool {
        matches!(self.addr, SocksAddr::Hostname(_))
    }

    /// Return the requested hostname, if the client gave one.
    pub fn hostname(&self) -> Option<&str> {
        match &self.addr {
            SocksAddr::Hostname(h) => Some(h.as_ref()),
            SocksAddr::Ip(_) => None,
        }
    }

    /// Return the requested numeric address, if the client gave one.
    pub fn ip(&self) -> Option<IpAddr> {
        match &self.addr {
            SocksAddr::Ip(a) => Some(*a),
            SocksAddr::Hostname(_) => None,
        }
    }
}

impl fmt::Display for SocksAddr {
    /// Format a string (a hostname or IP address) corresponding to this
    /// SocksAddr.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksAddr::Ip(a) => write!(f, "{}", a),
            SocksAddr::Hostname(h) => write!(f, "{}", h.0),
        }
    }
}

/// The reply from a SOCKS proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksReply {
    /// The provided status code
    status: SocksStatus,
    /// The provided address, if any.
    addr: SocksAddr,
    /// The provided port.
    port: u16,
}

impl SocksReply {
    /// Create a new SocksReply.
    #[cfg(feature = "client-handshake")]
    pub(crate) fn new(status: SocksStatus, addr: SocksAddr, port: u16) -> Self {
        Self { status, addr, port }
    }

    /// Return the status code from this socks reply.
    pub fn status(&self) -> SocksStatus {
        self.status
    }

    /// Return the bound address from this socks reply.
    ///
    /// Many proxies answer `0.0.0.0` here to mean "no address given".
    pub fn addr(&self) -> &SocksAddr {
        &self.addr
    }

    /// Return the bound port from this socks reply.
    pub fn port(&self) -> u16 {
        self.port
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
    use std::net::Ipv4Addr;

    #[test]
    fn display_cmd() {
        assert_eq!(format!("{}", SocksCmd::CONNECT), "CONNECT");
        assert_eq!(format!("{}", SocksCmd::UDP_ASSOCIATE), "UDP_ASSOCIATE");
        assert_eq!(format!("{}", SocksCmd::from(0x99)), "153");
    }

    #[test]
    fn hostname_limits() {
        let ok: Result<SocksHostname> = "example.com".to_string().try_into();
        assert_eq!(ok.unwrap().as_ref(), "example.com");

        let long = "x".repeat(256);
        assert_eq!(SocksHostname::try_from(long), Err(Error::Syntax));
        assert_eq!(SocksHostname::try_from(String::new()), Err(Error::Syntax));
        assert_eq!(
            SocksHostname::try_from("a\0b".to_string()),
            Err(Error::Syntax)
        );
        assert!(SocksHostname::try_from("y".repeat(255)).is_ok());
    }

    #[test]
    fn new_request_validation() {
        let ip = SocksAddr::Ip(Ipv4Addr::LOCALHOST.into());
        let host = SocksAddr::Hostname("example.com".to_string().try_into().unwrap());

        // UDP_ASSOCIATE doesn't exist in SOCKS4.
        assert!(matches!(
            SocksRequest::new(
                SocksVersion::V4,
                SocksCmd::UDP_ASSOCIATE,
                ip.clone(),
                80,
                SocksAuth::NoAuth
            ),
            Err(Error::NotImplemented(_))
        ));
        // Port zero isn't something we can connect to.
        assert_eq!(
            SocksRequest::new(
                SocksVersion::V5,
                SocksCmd::CONNECT,
                ip.clone(),
                0,
                SocksAuth::NoAuth
            ),
            Err(Error::Syntax)
        );
        // SOCKS4 user ids don't belong in a SOCKS5 request.
        assert_eq!(
            SocksRequest::new(
                SocksVersion::V5,
                SocksCmd::CONNECT,
                ip.clone(),
                443,
                SocksAuth::Socks4(b"alice".to_vec())
            ),
            Err(Error::Syntax)
        );

        let r = SocksRequest::new(
            SocksVersion::V5,
            SocksCmd::CONNECT,
            host,
            443,
            SocksAuth::Username(b"u".to_vec(), b"p".to_vec()),
        )
        .unwrap();
        assert!(r.is_connect());
        assert!(r.has_hostname());
        assert_eq!(r.hostname(), Some("example.com"));
        assert_eq!(r.ip(), None);
        assert_eq!(r.port(), 443);
        assert_eq!(r.addr().to_string(), "example.com");

        let r = SocksRequest::new(SocksVersion::V4, SocksCmd::BIND, ip, 21, SocksAuth::NoAuth)
            .unwrap();
        assert!(!r.is_connect());
        assert!(!r.has_hostname());
        assert_eq!(r.ip(), Some(Ipv4Addr::LOCALHOST.into()));
    }

    #[test]
    fn socks4_status() {
        assert_eq!(SocksStatus::SUCCEEDED.into_socks4_status(), 0x5A);
        assert_eq!(SocksStatus::GENERAL_FAILURE.into_socks4_status(), 0x5B);
        assert_eq!(SocksStatus::HS_DESC_NOT_FOUND.into_socks4_status(), 0x5B);
    }
}
