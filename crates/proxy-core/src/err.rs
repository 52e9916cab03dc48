//! Declare an error type for proxy_core
use retry_error::RetryError;
use socks5_proto::SocksStatus;
use std::io::ErrorKind;
use thiserror::Error;

/// An error that ends a proxy session or stops a server from starting.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A read or write on one of the connections failed.
    #[error("I/O error on proxy connection")]
    Io(#[from] std::io::Error),

    /// A SOCKS client sent something we couldn't accept.
    #[error("Bad SOCKS handshake from client")]
    Socks(#[from] socks5_proto::Error),

    /// A SOCKS client's request was refused with the given status.
    #[error("Refused SOCKS request: {0}")]
    SocksRefused(SocksStatus),

    /// An HTTP client sent something we couldn't accept.
    #[error("Bad HTTP request from client")]
    Http(#[from] proxy_httpproto::Error),

    /// A hostname didn't resolve, or resolved to nothing.
    #[error("Couldn't resolve {host}")]
    Resolve {
        /// The name we looked up.
        host: String,
        /// What the resolver said, if it failed outright.
        #[source]
        source: Option<std::io::Error>,
    },

    /// Every address for a destination refused us.
    #[error("Couldn't connect to {target}")]
    ConnectFailed {
        /// The destination, as `host:port`.
        target: String,
        /// What happened at each address.
        attempts: RetryError<std::io::Error>,
    },

    /// A SOCKS client gave the wrong username or password.
    #[error("SOCKS client sent wrong credentials")]
    AuthFailed,

    /// The upstream SOCKS5 server didn't let us through.
    #[error("Upstream SOCKS5 handshake failed")]
    UpstreamHandshake(#[source] socks5_proto::Error),

    /// An upstream proxy URI couldn't be used.
    #[error("Invalid upstream proxy {uri:?}: {problem}")]
    BadUpstreamUri {
        /// The URI as given.
        uri: String,
        /// What's wrong with it.
        problem: &'static str,
    },

    /// `start()` was called before a session factory was set.
    #[error("No session factory configured")]
    NoSessionFactory,

    /// The listening socket couldn't be opened.
    #[error("Couldn't listen on {addr}")]
    Bind {
        /// The address we tried.
        addr: String,
        /// Why it failed.
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called on a server that's already running.
    #[error("Server already started")]
    AlreadyStarted,

    /// The runtime wouldn't run a task for us.
    #[error("Couldn't spawn task")]
    Spawn(#[from] futures::task::SpawnError),
}

impl Error {
    /// Return the status a SOCKS server should send back for this error.
    pub fn socks_status(&self) -> SocksStatus {
        match self {
            Error::Resolve { .. } => SocksStatus::HOST_UNREACHABLE,
            Error::SocksRefused(status) => *status,
            Error::ConnectFailed { attempts, .. } => match attempts.sources().last().map(|e| e.kind())
            {
                Some(ErrorKind::ConnectionRefused) => SocksStatus::CONNECTION_REFUSED,
                Some(ErrorKind::AddrNotAvailable) => SocksStatus::NETWORK_UNREACHABLE,
                Some(ErrorKind::TimedOut) => SocksStatus::TTL_EXPIRED,
                _ => SocksStatus::GENERAL_FAILURE,
            },
            _ => SocksStatus::GENERAL_FAILURE,
        }
    }
}
