//! Declare an error type for proxy_httpproto
use thiserror::Error;

/// An error that occurs while parsing an HTTP proxy request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The request head isn't terminated yet: read more and try again.
    #[error("HTTP request head incomplete; need to wait for more")]
    Incomplete,

    /// The request is too short to be an HTTP request at all.
    #[error("HTTP request too short")]
    TooShort,

    /// The request head didn't follow HTTP/1.x syntax.
    #[error("Malformed HTTP request: {0}")]
    Malformed(&'static str),

    /// Neither the Host header nor the request URL named a target.
    #[error("HTTP request names no target host")]
    NoTarget,

    /// The target port wasn't a number between 0 and 65535.
    #[error("Invalid port in HTTP request target")]
    BadPort,
}
