//! Declare MockNetRuntime.

use crate::dns::MockDns;
use crate::net::MockNetProvider;
use proxy_rtcompat::{DnsProvider, Runtime, SleepProvider, SpawnBlocking, TcpProvider};

use async_trait::async_trait;
use futures::task::{FutureObj, Spawn, SpawnError};
use futures::Future;
use std::io::Result as IoResult;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// A wrapper runtime that replaces the network and the resolver of an
/// underlying runtime with simulated ones.
///
/// Spawning, blocking and timers still go to the wrapped runtime.
#[derive(Clone, Debug)]
pub struct MockNetRuntime<R: Runtime> {
    /// The underlying runtime. Most calls get delegated here.
    runtime: R,
    /// Network calls get delegated here.
    net: MockNetProvider,
    /// Name lookups get delegated here.
    dns: MockDns,
}

impl<R: Runtime> MockNetRuntime<R> {
    /// Create a new runtime that wraps `runtime`, but sees the network
    /// through `net` and an empty [`MockDns`].
    pub fn new(runtime: R, net: MockNetProvider) -> Self {
        MockNetRuntime {
            runtime,
            net,
            dns: MockDns::new(),
        }
    }

    /// Replace this runtime's resolver with `dns`.
    pub fn with_dns(mut self, dns: MockDns) -> Self {
        self.dns = dns;
        self
    }

    /// Return a reference to the underlying runtime.
    pub fn inner(&self) -> &R {
        &self.runtime
    }

    /// Return a reference to the [`MockNetProvider`].
    pub fn mock_net(&self) -> &MockNetProvider {
        &self.net
    }

    /// Return a reference to the [`MockDns`].
    pub fn mock_dns(&self) -> &MockDns {
        &self.dns
    }
}

impl<R: Runtime> Spawn for MockNetRuntime<R> {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.runtime.spawn_obj(future)
    }
}

impl<R: Runtime> SpawnBlocking for MockNetRuntime<R> {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

#[async_trait]
impl<R: Runtime> TcpProvider for MockNetRuntime<R> {
    type TcpStream = <MockNetProvider as TcpProvider>::TcpStream;
    type TcpListener = <MockNetProvider as TcpProvider>::TcpListener;

    async fn connect(&self, addr: &SocketAddr) -> IoResult<Self::TcpStream> {
        self.net.connect(addr).await
    }
    async fn listen(&self, addr: &SocketAddr, backlog: u32) -> IoResult<Self::TcpListener> {
        self.net.listen(addr, backlog).await
    }
}

#[async_trait]
impl<R: Runtime> DnsProvider for MockNetRuntime<R> {
    async fn resolve(&self, host: &str) -> IoResult<Vec<IpAddr>> {
        self.dns.resolve(host).await
    }
}

impl<R: Runtime> SleepProvider for MockNetRuntime<R> {
    type SleepFuture = R::SleepFuture;
    fn sleep(&self, dur: Duration) -> Self::SleepFuture {
        self.runtime.sleep(dur)
    }
}
