//! Copy bytes between the two legs of a session.

use crate::pool::BufferPool;

use futures::future::{self, Either};
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::pin_mut;
use std::io::Result as IoResult;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Which way bytes are going in a [`relay`].
#[derive(Clone, Copy, Debug)]
enum Direction {
    /// Client to destination.
    Up,
    /// Destination to client.
    Down,
}

/// Relay between `down` (the client) and `up` (the destination) until
/// either side closes or fails, then close both.
///
/// Every chunk read from one side is written to the other in a buffer from
/// `pool`, and the buffer goes back to the pool once its write is done.
/// Returns the number of bytes sent upstream and downstream.
pub async fn relay<DR, DW, UR, UW>(
    pool: &BufferPool,
    down_r: DR,
    down_w: DW,
    up_r: UR,
    up_w: UW,
) -> IoResult<(u64, u64)>
where
    DR: AsyncRead + Unpin,
    DW: AsyncWrite + Unpin,
    UR: AsyncRead + Unpin,
    UW: AsyncWrite + Unpin,
{
    let sent_up = AtomicU64::new(0);
    let sent_down = AtomicU64::new(0);
    let upward = copy_interactive(pool, down_r, up_w, Direction::Up, &sent_up);
    let downward = copy_interactive(pool, up_r, down_w, Direction::Down, &sent_down);
    pin_mut!(upward);
    pin_mut!(downward);

    // When one side is finished the other is dropped, which closes both
    // connections once the caller lets go of them.
    let result = match future::select(upward, downward).await {
        Either::Left((r, _)) => r,
        Either::Right((r, _)) => r,
    };
    result.map(|()| {
        (
            sent_up.load(Ordering::Relaxed),
            sent_down.load(Ordering::Relaxed),
        )
    })
}

/// Copy all the data from `reader` into `writer` until we encounter an EOF or
/// an error.
///
/// The writer is only flushed when the reader has nothing more for us
/// right away, so bursts go out together.
async fn copy_interactive<R, W>(
    pool: &BufferPool,
    mut reader: R,
    mut writer: W,
    dir: Direction,
    total: &AtomicU64,
) -> IoResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use futures::{poll, task::Poll};

    let chunk = pool.max_buffer_size();
    let loop_result: IoResult<()> = loop {
        let mut buf = pool.request(chunk);
        let n = {
            let mut read_future = reader.read(&mut buf[..]);
            match poll!(&mut read_future) {
                Poll::Ready(r) => r,
                Poll::Pending => match writer.flush().await {
                    Ok(()) => read_future.await,
                    Err(e) => Err(e),
                },
            }
        };
        let n = match n {
            Ok(0) => {
                pool.recycle(buf);
                break Ok(());
            }
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        buf.truncate(n);
        if let Err(e) = writer.write_all(&buf).await {
            break Err(e);
        }
        pool.recycle(buf);
        total.fetch_add(n as u64, Ordering::Relaxed);
        trace!("Relayed {} bytes {:?}", n, dir);
    };

    // If the reader closed cleanly, pass the close along; otherwise just
    // push out whatever we have.
    let flush_result = if loop_result.is_ok() {
        writer.close().await
    } else {
        writer.flush().await
    };

    loop_result.or(flush_result)
}

/// Write `data` to `writer` in a pooled buffer and flush it.
pub(crate) async fn write_pooled<W>(pool: &BufferPool, writer: &mut W, data: &[u8]) -> IoResult<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    let buf = pool.assemble_data_buffer(data);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    pool.recycle(buf);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use proxy_rtcompat::test_with_runtime;
    use proxy_rtmock::io::stream_pair;

    #[test]
    fn both_ways_then_close() {
        test_with_runtime(|_rt| async move {
            let pool = BufferPool::new(16, 4);
            let a = "10.0.0.1:1".parse().unwrap();
            let b = "10.0.0.2:2".parse().unwrap();
            let (client, down) = stream_pair(a, b);
            let (up, server) = stream_pair(b, a);

            let (down_r, down_w) = down.split();
            let (up_r, up_w) = up.split();
            let relaying = relay(&pool, down_r, down_w, up_r, up_w);

            let talking = async {
                let (mut c_r, mut c_w) = client.split();
                let (mut s_r, mut s_w) = server.split();
                let msg = b"a message longer than one sixteen-byte buffer";
                c_w.write_all(msg).await?;
                c_w.flush().await?;
                let mut got = vec![0_u8; msg.len()];
                s_r.read_exact(&mut got).await?;
                assert_eq!(&got[..], &msg[..]);

                s_w.write_all(b"reply").await?;
                s_w.flush().await?;
                let mut got = [0_u8; 5];
                c_r.read_exact(&mut got).await?;
                assert_eq!(&got, b"reply");

                // Hanging up on one side closes the other.
                s_w.close().await?;
                drop(s_w);
                let mut rest = Vec::new();
                c_r.read_to_end(&mut rest).await?;
                assert!(rest.is_empty());
                IoResult::Ok(msg.len())
            };

            let (relayed, talked) = futures::join!(relaying, talking);
            let n = talked.unwrap();
            assert_eq!(relayed.unwrap(), (n as u64, 5));
            assert!(pool.idle_count() > 0);
        });
    }
}
