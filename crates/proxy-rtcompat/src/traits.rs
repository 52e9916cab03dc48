//! Declarations for the traits a runtime has to implement.
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite, Future};
use std::io::Result as IoResult;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub use futures::task::Spawn;

/// Everything the proxy needs from an executor and its reactor.
///
/// A `Runtime` is cheap to clone; every clone refers to the same
/// underlying event loop.
pub trait Runtime:
    Send
    + Sync
    + Spawn
    + SpawnBlocking
    + Clone
    + SleepProvider
    + TcpProvider
    + DnsProvider
    + 'static
{
}

impl<T> Runtime for T where
    T: Send
        + Sync
        + Spawn
        + SpawnBlocking
        + Clone
        + SleepProvider
        + TcpProvider
        + DnsProvider
        + 'static
{
}

/// Trait for a runtime that can wait until a timer has expired.
pub trait SleepProvider {
    /// A future returned by [`SleepProvider::sleep()`]
    type SleepFuture: Future<Output = ()> + Send + 'static;
    /// Return a future that will be ready after `duration` has
    /// elapsed.
    fn sleep(&self, duration: Duration) -> Self::SleepFuture;
}

/// Trait for a runtime that can block the current thread on a future.
pub trait SpawnBlocking {
    /// Run `future` until it is ready, and return its output.
    fn block_on<F: Future>(&self, future: F) -> F::Output;
}

/// Access to the addresses of a connected stream.
///
/// The SOCKS server reports the local address of its upstream leg back to
/// the client, so every stream type we hand out has to know it.
pub trait StreamAddrs {
    /// Return the local address of this stream.
    fn local_addr(&self) -> IoResult<SocketAddr>;
    /// Return the address of the remote end of this stream.
    fn peer_addr(&self) -> IoResult<SocketAddr>;
}

/// Trait for a runtime that can create and accept TCP connections.
#[async_trait]
pub trait TcpProvider {
    /// The type for the TCP connections returned by [`Self::connect()`].
    type TcpStream: AsyncRead + AsyncWrite + StreamAddrs + Send + Unpin + 'static;
    /// The type for the TCP listeners returned by [`Self::listen()`].
    type TcpListener: TcpListener<TcpStream = Self::TcpStream> + Send + Sync + Unpin + 'static;

    /// Launch a TCP connection to a given socket address.
    async fn connect(&self, addr: &SocketAddr) -> IoResult<Self::TcpStream>;

    /// Open a TCP listener on a given socket address, with room for
    /// `backlog` pending connections.
    ///
    /// Implementations enable address reuse on the listening socket.
    async fn listen(&self, addr: &SocketAddr, backlog: u32) -> IoResult<Self::TcpListener>;
}

/// Trait for a local socket that accepts incoming TCP streams.
#[async_trait]
pub trait TcpListener {
    /// The type of TCP connections returned by [`Self::accept()`].
    type TcpStream: AsyncRead + AsyncWrite + StreamAddrs + Send + Unpin + 'static;

    /// Wait for an incoming stream; return it along with its address.
    async fn accept(&self) -> IoResult<(Self::TcpStream, SocketAddr)>;

    /// Return the local address that this listener is bound to.
    fn local_addr(&self) -> IoResult<SocketAddr>;
}

/// Trait for a runtime that can look up hostnames.
#[async_trait]
pub trait DnsProvider {
    /// Resolve `host` into a list of addresses, in the order that they
    /// should be tried.
    ///
    /// Dropping the returned future abandons the lookup.
    async fn resolve(&self, host: &str) -> IoResult<Vec<IpAddr>>;
}
