//! Declare an error type for socks5_proto
use crate::msg::SocksStatus;
use thiserror::Error;

/// An error that occurs while parsing or building SOCKS5 messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Tried to handle a message that wasn't complete: try again.
    #[error("Message truncated; need to wait for more")]
    Truncated,

    /// The peer didn't implement SOCKS correctly.
    #[error("SOCKS protocol syntax violation")]
    Syntax,

    /// The peer declared a version number that isn't one we support.
    ///
    /// In all likelihood, this is somebody trying to use the port for
    /// some protocol other than SOCKS.
    #[error("Unrecognized SOCKS protocol version {0}")]
    BadProtocol(u8),

    /// The upstream server picked an authentication method that we never
    /// offered or don't implement.
    #[error("SOCKS server selected unsupported method {0}")]
    UnsupportedMethod(u8),

    /// The upstream server refused our username and password.
    #[error("SOCKS server rejected our credentials (status {0})")]
    AuthRejected(u8),

    /// The upstream server answered our CONNECT with a failure.
    #[error("SOCKS server refused the request: {0}")]
    RequestRejected(SocksStatus),

    /// The peer used an address type we don't know.
    #[error("SOCKS address type {0} not supported")]
    AddressTypeNotSupported(u8),

    /// A hostname was too long to fit in a SOCKS5 message.
    #[error("Hostname too long for SOCKS5")]
    HostnameTooLong,

    /// Tried to progress the SOCKS handshake when it was already
    /// finished.  This is a programming error.
    #[error("SOCKS handshake was finished; no need to call this again")]
    AlreadyFinished,
}
