//! A small simulated internet for session tests.
#![allow(dead_code)]

use futures::io::{AsyncRead, AsyncReadExt};
use proxy_core::{BufferPool, ProxyServer, SessionFactory};
use proxy_rtcompat::{Runtime, SleepProvider};
use proxy_rtmock::dns::MockDns;
use proxy_rtmock::net::{MockNetProvider, MockNetwork};
use proxy_rtmock::MockNetRuntime;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Where the proxy under test lives.
pub const PROXY_IP: &str = "10.0.0.1";
/// Where the client lives.
pub const CLIENT_IP: &str = "10.0.0.2";
/// Where a chained proxy lives.
pub const UPSTREAM_IP: &str = "10.0.0.3";

/// Parse an address or die.
pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Parse a socket address or die.
pub fn sa(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// A network and resolver shared by every host in a test.
pub struct Internet {
    pub net: Arc<MockNetwork>,
    pub dns: MockDns,
}

impl Internet {
    pub fn new() -> Self {
        Internet {
            net: MockNetwork::new(),
            dns: MockDns::new(),
        }
    }

    /// A host that can run a proxy server.
    pub fn runtime<R: Runtime>(&self, addr: &str, rt: R) -> MockNetRuntime<R> {
        self.net
            .builder()
            .add_address(ip(addr))
            .runtime(rt)
            .with_dns(self.dns.clone())
    }

    /// A host that just makes or takes connections.
    pub fn host(&self, addr: &str) -> MockNetProvider {
        self.net.builder().add_address(ip(addr)).provider()
    }

    /// Connection attempts to `port`, in order.
    pub fn attempts_to_port(&self, port: u16) -> Vec<SocketAddr> {
        self.net
            .connect_attempts()
            .into_iter()
            .filter(|a| a.port() == port)
            .collect()
    }
}

/// Start a server made by `factory` on `addr:port`.
pub async fn serve<R, F>(rt: R, factory: F, addr: &str, port: u16) -> ProxyServer<R, F>
where
    R: Runtime,
    F: SessionFactory<R>,
{
    let mut server = ProxyServer::new(rt, Arc::new(BufferPool::new(64, 8)));
    server.set_session_factory(factory);
    server.start(addr, port, 16).await.unwrap();
    server
}

/// Read until EOF and return what was read.
pub async fn read_rest<S: AsyncRead + Unpin>(s: &mut S) -> Vec<u8> {
    let mut v = Vec::new();
    let _ = s.read_to_end(&mut v).await;
    v
}

/// Wait until `cond` holds, or give up after about a second.
pub async fn eventually<R: SleepProvider, C: Fn() -> bool>(rt: &R, cond: C) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        rt.sleep(Duration::from_millis(10)).await;
    }
    cond()
}
