//! Parsing for the request head a client sends to an HTTP forward proxy.
//!
//! A proxy only needs a small part of HTTP/1.x: the request line, the
//! header block, and enough of the request target to know where to
//! connect.  [`HttpHeaderParser`] extracts those from an accumulation
//! buffer once the head is complete; [`find_header_end`] and
//! [`starts_with_valid_http_method`] let the caller tell "need more
//! bytes" apart from "not HTTP at all" while it is still accumulating.
//!
//! The replies a proxy sends on its own behalf are here too.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]

mod err;
mod parse;
mod reply;

pub use err::Error;
pub use parse::{find_header_end, starts_with_valid_http_method, HttpHeaderParser};
pub use reply::{rewrite_proxy_connection, REPLY_BAD_GATEWAY, REPLY_BAD_REQUEST, REPLY_OK_FOR_CONNECT};

/// A Result type for the proxy_httpproto crate.
pub type Result<T> = std::result::Result<T, Error>;
