//! Constants and small types that appear in SOCKS5 messages.

use caret::caret_int;
use std::fmt;
use std::net::IpAddr;

/// The version byte that starts every SOCKS5 message (except the
/// RFC 1929 authentication sub-negotiation, which uses its own).
pub const SOCKS_VERSION: u8 = 5;

/// The version byte of the RFC 1929 username/password sub-negotiation.
pub(crate) const AUTH_VERSION: u8 = 1;

caret_int! {
    /// An authentication method, as offered by a client and chosen by a
    /// server during method negotiation.
    pub struct AuthMethod(u8) {
        /// No authentication required.
        NO_AUTHENTICATION = 0x00,
        /// GSSAPI (not supported here).
        GSSAPI = 0x01,
        /// RFC 1929 username/password.
        USERNAME_PASSWORD = 0x02,
        /// The server accepts none of the offered methods.
        NO_ACCEPTABLE_METHODS = 0xFF,
    }
}

caret_int! {
    /// Command from the SOCKS client telling us what to do.
    pub struct SocksCmd(u8) {
        /// Connect to a remote TCP address:port.
        CONNECT = 1,
        /// Not supported.
        BIND = 2,
        /// Not supported.
        UDP_ASSOCIATE = 3,
    }
}

caret_int! {
    /// How the address in a request or reply is encoded.
    pub struct AddrType(u8) {
        /// Four bytes of IPv4 address.
        IPV4 = 1,
        /// A length byte followed by a hostname.
        DOMAIN_NAME = 3,
        /// Sixteen bytes of IPv6 address.
        IPV6 = 4,
    }
}

caret_int! {
    /// Possible reply status values from a SOCKS5 handshake.
    ///
    /// The documentation here is limited to what RFC 1928 says.
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
    }
}

/// A destination address from a SOCKS request or reply.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksAddr {
    /// A hostname, to be resolved by whoever receives the request.
    Hostname(String),
    /// A literal IP address.
    Ip(IpAddr),
}

impl SocksAddr {
    /// Return the address type that would encode this address.
    pub fn addr_type(&self) -> AddrType {
        match self {
            SocksAddr::Ip(IpAddr::V4(_)) => AddrType::IPV4,
            SocksAddr::Ip(IpAddr::V6(_)) => AddrType::IPV6,
            SocksAddr::Hostname(_) => AddrType::DOMAIN_NAME,
        }
    }

    /// Build an address from a host string: IP literals become
    /// [`SocksAddr::Ip`], anything else a hostname.
    pub fn from_host(host: &str) -> SocksAddr {
        match host.parse::<IpAddr>() {
            Ok(ip) => SocksAddr::Ip(ip),
            Err(_) => SocksAddr::Hostname(host.to_string()),
        }
    }
}

impl fmt::Display for SocksAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksAddr::Ip(a) => write!(f, "{}", a),
            SocksAddr::Hostname(h) => write!(f, "{}", h),
        }
    }
}
