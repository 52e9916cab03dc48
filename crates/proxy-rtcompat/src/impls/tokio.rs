//! Implementation of the runtime traits on top of tokio.
//!
//! Tokio streams implement tokio's own I/O traits, so we wrap them with
//! `tokio_util::compat` to get the `futures` versions that the rest of the
//! workspace uses.

/// Types used for networking (tokio implementation)
pub(crate) mod net {
    use crate::traits;

    use async_trait::async_trait;
    use futures::io::{AsyncRead, AsyncWrite};
    use std::io::Result as IoResult;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio_crate::net::{TcpListener as TokioTcpListener, TcpSocket, TcpStream as TokioTcpStream};
    use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

    /// A TCP stream that implements the `futures` I/O traits.
    #[derive(Debug)]
    pub struct TcpStream {
        /// The underlying tokio stream, wrapped for compatibility.
        s: Compat<TokioTcpStream>,
    }

    impl From<TokioTcpStream> for TcpStream {
        fn from(s: TokioTcpStream) -> TcpStream {
            let s = s.compat();
            TcpStream { s }
        }
    }

    impl AsyncRead for TcpStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<IoResult<usize>> {
            Pin::new(&mut self.s).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TcpStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<IoResult<usize>> {
            Pin::new(&mut self.s).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
            Pin::new(&mut self.s).poll_flush(cx)
        }

        fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
            Pin::new(&mut self.s).poll_close(cx)
        }
    }

    impl traits::StreamAddrs for TcpStream {
        fn local_addr(&self) -> IoResult<SocketAddr> {
            self.s.get_ref().local_addr()
        }
        fn peer_addr(&self) -> IoResult<SocketAddr> {
            self.s.get_ref().peer_addr()
        }
    }

    /// Wrap a tokio TcpListener so that it yields our stream type.
    #[derive(Debug)]
    pub struct TcpListener {
        /// The underlying listener.
        lis: TokioTcpListener,
    }

    #[async_trait]
    impl traits::TcpListener for TcpListener {
        type TcpStream = TcpStream;

        async fn accept(&self) -> IoResult<(Self::TcpStream, SocketAddr)> {
            let (stream, addr) = self.lis.accept().await?;
            Ok((stream.into(), addr))
        }

        fn local_addr(&self) -> IoResult<SocketAddr> {
            self.lis.local_addr()
        }
    }

    /// Open a listening socket on `addr` with `SO_REUSEADDR` set.
    pub(crate) fn bind_listener(addr: &SocketAddr, backlog: u32) -> IoResult<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(*addr)?;
        let lis = socket.listen(backlog)?;
        Ok(TcpListener { lis })
    }
}

// ==============================

use crate::traits::*;
use async_trait::async_trait;
use futures::task::{FutureObj, Spawn, SpawnError};
use futures::Future;
use std::io::Result as IoResult;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A runtime backed by a single-threaded tokio event loop.
///
/// All clones share one loop; tasks spawned through any clone run on it.
#[derive(Clone, Debug)]
pub struct TokioRuntime {
    /// The tokio runtime we drive.
    rt: Arc<tokio_crate::runtime::Runtime>,
}

/// Build a new current-thread tokio runtime with I/O and timers enabled.
pub(crate) fn create_runtime() -> IoResult<TokioRuntime> {
    let rt = tokio_crate::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(TokioRuntime { rt: Arc::new(rt) })
}

impl Spawn for TokioRuntime {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        let _join_handle = self.rt.spawn(future);
        Ok(())
    }
}

impl SpawnBlocking for TokioRuntime {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.rt.block_on(future)
    }
}

impl SleepProvider for TokioRuntime {
    type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
    fn sleep(&self, duration: Duration) -> Self::SleepFuture {
        // Created lazily so the timer is registered from inside the loop.
        Box::pin(async move { tokio_crate::time::sleep(duration).await })
    }
}

#[async_trait]
impl TcpProvider for TokioRuntime {
    type TcpStream = net::TcpStream;
    type TcpListener = net::TcpListener;

    async fn connect(&self, addr: &SocketAddr) -> IoResult<Self::TcpStream> {
        let s = tokio_crate::net::TcpStream::connect(addr).await?;
        Ok(s.into())
    }

    async fn listen(&self, addr: &SocketAddr, backlog: u32) -> IoResult<Self::TcpListener> {
        net::bind_listener(addr, backlog)
    }
}

#[async_trait]
impl DnsProvider for TokioRuntime {
    async fn resolve(&self, host: &str) -> IoResult<Vec<IpAddr>> {
        let mut result: Vec<IpAddr> = Vec::new();
        for addr in tokio_crate::net::lookup_host((host, 0)).await? {
            if !result.contains(&addr.ip()) {
                result.push(addr.ip());
            }
        }
        Ok(result)
    }
}
