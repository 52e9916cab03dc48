//! Tests for the tokio implementation of the runtime traits.
//!
//! These use the loopback interface; they don't need outside network
//! access.

use crate::test_with_runtime;
use crate::traits::*;
use crate::{SleepProviderExt, TimeoutError};

use futures::io::{AsyncReadExt, AsyncWriteExt};
use futures::task::SpawnExt;
use std::io::Result as IoResult;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

#[test]
fn small_delay() {
    test_with_runtime(|rt| async move {
        let i1 = Instant::now();
        let one_msec = Duration::from_millis(1);
        rt.sleep(one_msec).await;
        assert!(Instant::now() >= i1 + one_msec);
    });
}

#[test]
fn timeout_ok_and_expire() {
    test_with_runtime(|rt| async move {
        let one_day = Duration::from_secs(86400);
        let outcome = rt.timeout(one_day, async { 413_u32 }).await;
        assert_eq!(outcome, Ok(413));

        let outcome = rt
            .timeout(Duration::from_micros(1), futures::future::pending::<()>())
            .await;
        assert_eq!(outcome, Err(TimeoutError));
        let ioe: std::io::Error = TimeoutError.into();
        assert_eq!(ioe.kind(), std::io::ErrorKind::TimedOut);
    });
}

#[test]
fn self_connect() -> IoResult<()> {
    test_with_runtime(|rt| async move {
        let localhost = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        let listener = rt.listen(&localhost.into(), 16).await?;
        let addr = listener.local_addr()?;

        let server = async {
            let mut buf = vec![0_u8; 11];
            let (mut con, peer) = listener.accept().await?;
            assert_eq!(con.peer_addr()?, peer);
            con.read_exact(&mut buf[..]).await?;
            IoResult::Ok(buf)
        };
        let client = async {
            let mut con = rt.connect(&addr).await?;
            assert_eq!(con.peer_addr()?, addr);
            assert!(con.local_addr()?.ip().is_loopback());
            con.write_all(b"Hello world").await?;
            con.flush().await?;
            IoResult::Ok(())
        };

        let (data, send_r) = futures::join!(server, client);
        send_r?;
        assert_eq!(&data?[..], b"Hello world");
        IoResult::Ok(())
    })
}

#[test]
fn listen_twice_with_reuseaddr() -> IoResult<()> {
    test_with_runtime(|rt| async move {
        let localhost: SocketAddr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0).into();
        let first = rt.listen(&localhost, 1).await?;
        let addr = first.local_addr()?;
        drop(first);
        // The port is free again straight away.
        let second = rt.listen(&addr, 1).await?;
        assert_eq!(second.local_addr()?, addr);
        IoResult::Ok(())
    })
}

#[test]
fn resolve_literal() -> IoResult<()> {
    test_with_runtime(|rt| async move {
        let addrs = rt.resolve("127.0.0.1").await?;
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        IoResult::Ok(())
    })
}

#[test]
fn spawned_task_runs() {
    test_with_runtime(|rt| async move {
        let (tx, rx) = futures::channel::oneshot::channel();
        rt.spawn(async move {
            let _ignore = tx.send(7_u8);
        })
        .unwrap();
        assert_eq!(rx.await, Ok(7));
    });
}
