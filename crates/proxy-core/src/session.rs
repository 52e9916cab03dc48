//! Traits and shared plumbing for proxy sessions.
//!
//! A session owns one accepted client connection from the first handshake
//! byte until both legs are closed.  Sessions are made by a
//! [`SessionFactory`], which carries whatever configuration every session
//! of a server shares.

pub(crate) mod http;
pub(crate) mod socks;

use crate::pool::BufferPool;
use crate::Result;
use proxy_rtcompat::Runtime;

use async_trait::async_trait;
use futures::future::{self, Either, Future};
use futures::io::{AsyncRead, AsyncReadExt};
use futures::pin_mut;
use std::net::SocketAddr;
use std::sync::Arc;

/// Everything a new session gets from the server that accepted it.
pub struct SessionContext<R: Runtime> {
    /// The server-assigned session id, for logs.
    pub id: u32,
    /// The runtime to resolve names and open upstream connections with.
    pub runtime: R,
    /// The client's connection.
    pub stream: R::TcpStream,
    /// The client's address.
    pub peer: SocketAddr,
    /// The server's shared buffer pool.
    pub pool: Arc<BufferPool>,
}

/// A single client connection being served.
#[async_trait]
pub trait ProxySession: Send + 'static {
    /// Serve the client until either side closes.
    ///
    /// Errors are for logging only: by the time one is returned, the client
    /// has already been sent whatever reply the protocol calls for.
    async fn run(self) -> Result<()>;
}

/// Makes a session for each connection a server accepts.
pub trait SessionFactory<R: Runtime>: Send + Sync + 'static {
    /// The kind of session this factory makes.
    type Session: ProxySession;

    /// Construct a session for a newly accepted connection.
    fn create(&self, ctx: SessionContext<R>) -> Self::Session;
}

/// Run `fut` to completion while reading from `reader`.
///
/// Anything read is appended to `pending`.  If the reader reaches EOF or
/// fails first, `fut` is dropped and `None` is returned: a client that hangs
/// up cancels whatever we were doing for it.
pub(crate) async fn while_reading<Rd, F, T>(
    reader: &mut Rd,
    pending: &mut Vec<u8>,
    fut: F,
) -> Option<T>
where
    Rd: AsyncRead + Unpin,
    F: Future<Output = T>,
{
    pin_mut!(fut);
    let mut chunk = [0_u8; 1024];
    loop {
        let read = match future::select(&mut fut, reader.read(&mut chunk[..])).await {
            Either::Left((out, _)) => return Some(out),
            Either::Right((r, _)) => r,
        };
        match read {
            Ok(0) | Err(_) => return None,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
        }
    }
}
