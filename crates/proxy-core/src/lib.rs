//! The moving parts of a SOCKS5 or HTTP proxy.
//!
//! A [`ProxyServer`] accepts connections and hands each one to a session
//! made by its [`SessionFactory`]: either a [`SocksProxySession`] or an
//! [`HttpProxySession`].  A session reads the client's handshake,
//! resolves the destination, connects to it (directly, or through an
//! upstream SOCKS5 or HTTP proxy), and then relays bytes both ways until
//! either side hangs up.
//!
//! All I/O goes through a [`proxy_rtcompat::Runtime`], so the same code
//! runs on tokio or on the simulated network in `proxy-rtmock`.  All relay
//! buffers come from one shared [`BufferPool`] per server.
//!
//! # Limitations
//!
//! Only CONNECT (SOCKS5) and CONNECT or plain forwarding (HTTP) are
//! supported.  There is no TLS: an `https://` upstream is spoken to in
//! plain HTTP.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]

mod connect;
mod err;
mod pool;
mod relay;
mod server;
mod session;
mod socks_client;
mod upstream;
mod watch;

pub use connect::{connect_any, resolve_target};
pub use err::Error;
pub use pool::BufferPool;
pub use relay::relay;
pub use server::{ProxyServer, ServerStatus, SessionId, StatusCallback};
pub use session::http::{HttpProxySession, HttpSessionFactory};
pub use session::socks::{SocksProxySession, SocksSessionFactory};
pub use session::{ProxySession, SessionContext, SessionFactory};
pub use socks_client::SocksUpstreamClient;
pub use upstream::{UpstreamConfig, UpstreamKind};
pub use watch::RuleFileWatcher;

/// A Result type for the proxy_core crate.
pub type Result<T> = std::result::Result<T, Error>;
