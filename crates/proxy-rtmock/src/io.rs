//! An in-memory, bidirectional byte stream.

use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::stream::Stream;
use proxy_rtcompat::StreamAddrs;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Number of writes that may be queued before a writer has to wait.
const CHANNEL_SIZE: usize = 64;

/// One end of a simulated TCP connection.
///
/// Everything written on one end of a pair can be read on the other.
/// Closing or dropping one end makes reads on the other end return EOF,
/// and dropping one end makes writes on the other end fail.
#[derive(Debug)]
pub struct LocalStream {
    /// Sender for bytes we write. `None` once we've closed our side.
    w: Option<mpsc::Sender<Vec<u8>>>,
    /// Receiver for bytes the other side writes.
    r: mpsc::Receiver<Vec<u8>>,
    /// A chunk we have received but not yet handed to a reader.
    pending: Vec<u8>,
    /// How much of `pending` has been read already.
    pending_pos: usize,
    /// Address of this end.
    local: SocketAddr,
    /// Address of the other end.
    peer: SocketAddr,
}

/// Create a connected pair of streams.
///
/// The first stream believes it lives at `a` and talks to `b`; the second
/// one sees the reverse.
pub fn stream_pair(a: SocketAddr, b: SocketAddr) -> (LocalStream, LocalStream) {
    let (w1, r2) = mpsc::channel(CHANNEL_SIZE);
    let (w2, r1) = mpsc::channel(CHANNEL_SIZE);
    let s1 = LocalStream {
        w: Some(w1),
        r: r1,
        pending: Vec::new(),
        pending_pos: 0,
        local: a,
        peer: b,
    };
    let s2 = LocalStream {
        w: Some(w2),
        r: r2,
        pending: Vec::new(),
        pending_pos: 0,
        local: b,
        peer: a,
    };
    (s1, s2)
}

impl AsyncRead for LocalStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            if self.pending_pos < self.pending.len() {
                let avail = &self.pending[self.pending_pos..];
                let n = std::cmp::min(avail.len(), buf.len());
                buf[..n].copy_from_slice(&avail[..n]);
                self.pending_pos += n;
                return Poll::Ready(Ok(n));
            }
            match Pin::new(&mut self.r).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Ready(Some(chunk)) => {
                    self.pending = chunk;
                    self.pending_pos = 0;
                }
            }
        }
    }
}

impl AsyncWrite for LocalStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let w = match self.w.as_mut() {
            Some(w) => w,
            None => return Poll::Ready(Err(IoError::from(ErrorKind::NotConnected))),
        };
        match w.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(_)) => return Poll::Ready(Err(IoError::from(ErrorKind::BrokenPipe))),
            Poll::Ready(Ok(())) => {}
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        match w.start_send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(IoError::from(ErrorKind::BrokenPipe))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        self.w = None;
        Poll::Ready(Ok(()))
    }
}

impl StreamAddrs for LocalStream {
    fn local_addr(&self) -> IoResult<SocketAddr> {
        Ok(self.local)
    }
    fn peer_addr(&self) -> IoResult<SocketAddr> {
        Ok(self.peer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "192.0.2.1:1000".parse().unwrap(),
            "192.0.2.2:2000".parse().unwrap(),
        )
    }

    #[test]
    fn pair_carries_bytes_both_ways() {
        futures::executor::block_on(async {
            let (a, b) = addrs();
            let (mut s1, mut s2) = stream_pair(a, b);
            s1.write_all(b"ping").await.unwrap();
            s2.write_all(b"pong!").await.unwrap();

            let mut buf = [0_u8; 4];
            s2.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            let mut buf = [0_u8; 5];
            s1.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"pong!");
        });
    }

    #[test]
    fn small_reads_drain_a_chunk() {
        futures::executor::block_on(async {
            let (a, b) = addrs();
            let (mut s1, mut s2) = stream_pair(a, b);
            s1.write_all(b"abcdef").await.unwrap();
            let mut buf = [0_u8; 4];
            assert_eq!(s2.read(&mut buf).await.unwrap(), 4);
            assert_eq!(&buf, b"abcd");
            assert_eq!(s2.read(&mut buf).await.unwrap(), 2);
            assert_eq!(&buf[..2], b"ef");
        });
    }

    #[test]
    fn close_gives_eof_and_drop_breaks_pipe() {
        futures::executor::block_on(async {
            let (a, b) = addrs();
            let (mut s1, mut s2) = stream_pair(a, b);
            s1.write_all(b"bye").await.unwrap();
            s1.close().await.unwrap();

            let mut v = Vec::new();
            s2.read_to_end(&mut v).await.unwrap();
            assert_eq!(&v, b"bye");
            assert!(s1.write_all(b"more").await.is_err());

            drop(s1);
            let e = s2.write_all(b"anyone?").await.unwrap_err();
            assert_eq!(e.kind(), ErrorKind::BrokenPipe);
        });
    }

    #[test]
    fn addresses_are_mirrored() {
        let (a, b) = addrs();
        let (s1, s2) = stream_pair(a, b);
        assert_eq!(s1.local_addr().unwrap(), a);
        assert_eq!(s1.peer_addr().unwrap(), b);
        assert_eq!(s2.local_addr().unwrap(), b);
        assert_eq!(s2.peer_addr().unwrap(), a);
    }
}
