//! SOCKS5 handshake parsing, for both ends of a connection.
//!
//! A proxy speaks SOCKS5 in two directions: it answers clients that connect
//! to it ([`Socks5RequestParser`]), and it may itself act as a client of an
//! upstream SOCKS5 server ([`Socks5ResponseParser`]).  Both parsers are
//! small state machines that consume one complete protocol message per call.
//!
//! TCP does not preserve message boundaries, so each parser also offers a
//! `message_len()` method that looks at an accumulation buffer and says how
//! many bytes make up the next complete message, or that more bytes are
//! needed.
//!
//! Only the parts of the protocol a CONNECT proxy needs are here:
//!
//!   * [RFC 1928](https://tools.ietf.org/html/rfc1928): method negotiation
//!     and the CONNECT command;
//!   * [RFC 1929](https://tools.ietf.org/html/rfc1929): username/password
//!     authentication.
//!
//! BIND, UDP ASSOCIATE and GSSAPI are not supported.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]

mod build;
mod client;
mod err;
mod msg;
mod reader;
mod server;

pub use build::{
    auth_reply, auth_request, connect_request, error_reply, method_reply, method_request,
    success_reply,
};
pub use client::{ClientState, Socks5ResponseParser};
pub use err::Error;
pub use msg::{AddrType, AuthMethod, SocksAddr, SocksCmd, SocksStatus, SOCKS_VERSION};
pub use server::{ServerState, Socks5RequestParser};

/// A Result type for the socks5_proto crate.
pub type Result<T> = std::result::Result<T, Error>;
