//! A simulated TCP network for testing.
//!
//! The simulation only knows about listeners and connection attempts;
//! there is no packet loss or reordering.  Connecting to an address with
//! no listener is refused, unless the test has scripted a different
//! outcome for that address.

use super::io::{stream_pair, LocalStream};
use super::MockNetRuntime;
use proxy_rtcompat::{Runtime, TcpListener, TcpProvider};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::lock::Mutex as AsyncMutex;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

/// A channel sender that we use to send incoming connections to
/// listeners.
type ConnSender = mpsc::Sender<(LocalStream, SocketAddr)>;
/// A channel receiver that listeners use to receive incoming connections.
type ConnReceiver = mpsc::Receiver<(LocalStream, SocketAddr)>;

/// What happens when somebody tries to connect to a given address.
#[derive(Clone, Debug)]
enum Outcome {
    /// Fail at once with this kind of error.
    Fail(ErrorKind),
    /// Never finish.
    Hang,
}

/// A simulated Internet.
///
/// Shared by any number of [`MockNetProvider`]s, each of which has its own
/// addresses on the network.
#[derive(Debug)]
pub struct MockNetwork {
    /// Listeners, by the address they are bound to.
    listening: Mutex<HashMap<SocketAddr, ConnSender>>,
    /// Scripted outcomes for connection attempts to particular addresses.
    scripted: Mutex<HashMap<SocketAddr, Outcome>>,
    /// Every address that anybody has tried to connect to, in order.
    attempts: Mutex<Vec<SocketAddr>>,
}

/// One host's view of a [`MockNetwork`].
///
/// Implements [`TcpProvider`], so it can stand in for the real network in
/// code under test.
#[derive(Clone, Debug)]
pub struct MockNetProvider {
    /// Shared state for this host.
    inner: Arc<MockNetProviderInner>,
}

/// Shared part of a [`MockNetProvider`].
#[derive(Debug)]
struct MockNetProviderInner {
    /// Addresses this host owns.
    addrs: Vec<IpAddr>,
    /// The network we're attached to.
    net: Arc<MockNetwork>,
    /// Next port to hand out for outgoing connections or port-0 listeners.
    next_port: AtomicU16,
}

/// A [`TcpListener`] returned by a [`MockNetProvider`].
///
/// Dropping it frees its address on the network.
#[derive(Debug)]
pub struct MockNetListener {
    /// The address we're listening on.
    addr: SocketAddr,
    /// Incoming connections.
    receiver: AsyncMutex<ConnReceiver>,
    /// The network, so that we can unregister on drop.
    net: Arc<MockNetwork>,
}

/// A builder for a [`MockNetProvider`]; see [`MockNetwork::builder()`].
#[derive(Debug)]
pub struct ProviderBuilder {
    /// Addresses the new host will own.
    addrs: Vec<IpAddr>,
    /// The network it will be attached to.
    net: Arc<MockNetwork>,
}

/// Return an io error of a given kind.
fn err(kind: ErrorKind) -> IoError {
    IoError::from(kind)
}

impl MockNetwork {
    /// Make a new MockNetwork with no active listeners.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(MockNetwork {
            listening: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    /// Return a [`ProviderBuilder`] for creating a host on this network.
    ///
    /// ```
    /// # use proxy_rtmock::net::*;
    /// let network = MockNetwork::new();
    /// let host = network.builder()
    ///     .add_address("198.51.100.6".parse().unwrap())
    ///     .provider();
    /// ```
    pub fn builder(self: &Arc<Self>) -> ProviderBuilder {
        ProviderBuilder {
            addrs: vec![],
            net: Arc::clone(self),
        }
    }

    /// Make every connection attempt to `addr` fail with `kind`.
    pub fn fail_connections_to(&self, addr: SocketAddr, kind: ErrorKind) {
        self.scripted_map().insert(addr, Outcome::Fail(kind));
    }

    /// Make every connection attempt to `addr` wait forever.
    pub fn blackhole(&self, addr: SocketAddr) {
        self.scripted_map().insert(addr, Outcome::Hang);
    }

    /// Return every address that has been connected to so far, in the
    /// order the attempts were made.
    pub fn connect_attempts(&self) -> Vec<SocketAddr> {
        self.attempts
            .lock()
            .expect("Poisoned lock on attempt log")
            .clone()
    }

    /// Return true if something is listening on `addr`.
    pub fn is_listening(&self, addr: &SocketAddr) -> bool {
        self.listener_map().contains_key(addr)
    }

    /// Lock and return the map of listeners.
    fn listener_map(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, ConnSender>> {
        self.listening.lock().expect("Poisoned lock on listeners")
    }

    /// Lock and return the map of scripted outcomes.
    fn scripted_map(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, Outcome>> {
        self.scripted.lock().expect("Poisoned lock on scripted outcomes")
    }

    /// Deliver `peer_stream` from `source_addr` to whoever listens on
    /// `target_addr`.
    async fn send_connection(
        &self,
        source_addr: SocketAddr,
        target_addr: SocketAddr,
        peer_stream: LocalStream,
    ) -> IoResult<()> {
        self.attempts
            .lock()
            .expect("Poisoned lock on attempt log")
            .push(target_addr);

        let scripted = self.scripted_map().get(&target_addr).cloned();
        match scripted {
            Some(Outcome::Fail(kind)) => return Err(err(kind)),
            Some(Outcome::Hang) => futures::future::pending::<()>().await,
            None => {}
        }

        let sender = self.listener_map().get(&target_addr).cloned();
        if let Some(mut sender) = sender {
            if sender.send((peer_stream, source_addr)).await.is_ok() {
                return Ok(());
            }
        }
        Err(err(ErrorKind::ConnectionRefused))
    }

    /// Register a listener at `addr`, with room for `backlog` pending
    /// connections.
    fn add_listener(&self, addr: SocketAddr, backlog: u32) -> IoResult<ConnReceiver> {
        let mut listener_map = self.listener_map();
        if listener_map.contains_key(&addr) {
            return Err(err(ErrorKind::AddrInUse));
        }
        let (send, recv) = mpsc::channel(backlog.max(1) as usize);
        listener_map.insert(addr, send);
        Ok(recv)
    }
}

impl ProviderBuilder {
    /// Add `addr` as a new address for the provider we're building.
    pub fn add_address(&mut self, addr: IpAddr) -> &mut Self {
        self.addrs.push(addr);
        self
    }
    /// Use this builder to return a new [`MockNetRuntime`] wrapping
    /// an existing `runtime`.
    pub fn runtime<R: Runtime>(&self, runtime: R) -> MockNetRuntime<R> {
        MockNetRuntime::new(runtime, self.provider())
    }
    /// Use this builder to return a new [`MockNetProvider`]
    pub fn provider(&self) -> MockNetProvider {
        let inner = MockNetProviderInner {
            addrs: self.addrs.clone(),
            net: Arc::clone(&self.net),
            next_port: AtomicU16::new(40000),
        };
        MockNetProvider {
            inner: Arc::new(inner),
        }
    }
}

impl Drop for MockNetListener {
    fn drop(&mut self) {
        self.net.listener_map().remove(&self.addr);
    }
}

#[async_trait]
impl TcpListener for MockNetListener {
    type TcpStream = LocalStream;

    async fn accept(&self) -> IoResult<(Self::TcpStream, SocketAddr)> {
        let mut receiver = self.receiver.lock().await;
        receiver
            .next()
            .await
            .ok_or_else(|| err(ErrorKind::BrokenPipe))
    }

    fn local_addr(&self) -> IoResult<SocketAddr> {
        Ok(self.addr)
    }
}

impl MockNetProvider {
    /// Return one of our addresses in the same family as `other`.
    fn get_addr_in_family(&self, other: &IpAddr) -> Option<IpAddr> {
        self.inner
            .addrs
            .iter()
            .find(|a| a.is_ipv4() == other.is_ipv4())
            .copied()
    }

    /// Return a port number that we haven't handed out before.
    ///
    /// # Panics
    ///
    /// Panics once the counter wraps around.
    fn arbitrary_port(&self) -> u16 {
        let next = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        assert!(next != 0);
        next
    }

    /// Pick the source address for a connection to `addr`.
    fn get_origin_addr_for(&self, addr: &SocketAddr) -> IoResult<SocketAddr> {
        let my_addr = self
            .get_addr_in_family(&addr.ip())
            .ok_or_else(|| err(ErrorKind::AddrNotAvailable))?;
        Ok(SocketAddr::new(my_addr, self.arbitrary_port()))
    }

    /// Pick the address to bind when told to listen on `spec`.
    ///
    /// Unspecified IPs become one of our own addresses; port 0 becomes a
    /// fresh port.
    fn get_listener_addr(&self, spec: &SocketAddr) -> IoResult<SocketAddr> {
        let ip = spec.ip();
        let ipaddr = if ip.is_unspecified() {
            self.get_addr_in_family(&ip)
                .ok_or_else(|| err(ErrorKind::AddrNotAvailable))?
        } else if self.inner.addrs.contains(&ip) {
            ip
        } else {
            return Err(err(ErrorKind::AddrNotAvailable));
        };
        let port = match spec.port() {
            0 => self.arbitrary_port(),
            p => p,
        };
        Ok(SocketAddr::new(ipaddr, port))
    }
}

#[async_trait]
impl TcpProvider for MockNetProvider {
    type TcpStream = LocalStream;
    type TcpListener = MockNetListener;

    async fn connect(&self, addr: &SocketAddr) -> IoResult<LocalStream> {
        let my_addr = self.get_origin_addr_for(addr)?;
        let (mine, theirs) = stream_pair(my_addr, *addr);
        self.inner
            .net
            .send_connection(my_addr, *addr, theirs)
            .await?;
        Ok(mine)
    }

    async fn listen(&self, addr: &SocketAddr, backlog: u32) -> IoResult<Self::TcpListener> {
        let addr = self.get_listener_addr(addr)?;
        let receiver = AsyncMutex::new(self.inner.net.add_listener(addr, backlog)?);
        Ok(MockNetListener {
            addr,
            receiver,
            net: Arc::clone(&self.inner.net),
        })
    }
}
