//! The accept loop and the registry of live sessions.

use crate::connect::resolve_target;
use crate::pool::BufferPool;
use crate::session::{ProxySession, SessionContext, SessionFactory};
use crate::{Error, Result};
use proxy_rtcompat::{Runtime, SpawnExt, TcpListener};

use futures::channel::oneshot;
use futures::future::{self, AbortHandle, Either};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Identifies a session within one server.  Wraps around on overflow.
pub type SessionId = u32;

/// A change in a server's lifecycle, as reported to its
/// [`StatusCallback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerStatus {
    /// The server is listening.
    Started,
    /// The server has stopped listening.
    Shutdown,
    /// The server couldn't start.
    ErrorOccurred,
}

/// A function to tell about lifecycle changes, along with a description.
pub type StatusCallback = Arc<dyn Fn(ServerStatus, &str) + Send + Sync>;

/// What the registry knows about a live session.
struct SessionEntry {
    /// Who the client is.
    peer: SocketAddr,
    /// Stops the session's task, dropping both of its connections.
    handle: AbortHandle,
}

/// State shared between a [`ProxyServer`] and its tasks.
#[derive(Default)]
struct Shared {
    /// Live sessions.
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    /// Tasks to stop along with the server.
    background: Mutex<Vec<AbortHandle>>,
    /// True while the listener is open.
    running: AtomicBool,
    /// The next session id to hand out.
    next_id: AtomicU32,
}

/// How to stop a running accept loop and learn that it's gone.
struct StopHandle {
    /// Tells the loop to close its listener.
    stop: oneshot::Sender<()>,
    /// Resolves once the listener is closed.
    done: oneshot::Receiver<()>,
}

/// A listening proxy server.
///
/// Each accepted connection gets a new session from the server's
/// [`SessionFactory`], running in its own task.  The server keeps a
/// registry of live sessions so that [`ProxyServer::shutdown`] can close
/// them all.
///
/// Dropping a running server closes its listener, but leaves the sessions
/// it already started alone.
pub struct ProxyServer<R: Runtime, F: SessionFactory<R>> {
    /// Runtime for listening, spawning, and everything the sessions do.
    runtime: R,
    /// Shared by all of our sessions.
    pool: Arc<BufferPool>,
    /// Makes the sessions.
    factory: Option<Arc<F>>,
    /// Told about lifecycle changes.
    callback: Option<StatusCallback>,
    /// State our tasks need too.
    shared: Arc<Shared>,
    /// Where we're listening, once we are.
    local_addr: Option<SocketAddr>,
    /// Present while the accept loop runs.
    stop: Option<StopHandle>,
}

impl<R: Runtime, F: SessionFactory<R>> ProxyServer<R, F> {
    /// Construct a server that isn't listening yet.
    pub fn new(runtime: R, pool: Arc<BufferPool>) -> Self {
        ProxyServer {
            runtime,
            pool,
            factory: None,
            callback: None,
            shared: Arc::new(Shared::default()),
            local_addr: None,
            stop: None,
        }
    }

    /// Use `factory` to make the sessions.  Required before
    /// [`ProxyServer::start`].
    pub fn set_session_factory(&mut self, factory: F) {
        self.factory = Some(Arc::new(factory));
    }

    /// Report lifecycle changes to `callback`.
    pub fn set_event_callback(&mut self, callback: StatusCallback) {
        self.callback = Some(callback);
    }

    /// Start listening on `host:port`, and accept connections in a
    /// background task.
    ///
    /// Returns the address actually bound, which differs from the one asked
    /// for when `port` is 0.
    pub async fn start(&mut self, host: &str, port: u16, backlog: u32) -> Result<SocketAddr> {
        let factory = match &self.factory {
            Some(f) => Arc::clone(f),
            None => return Err(Error::NoSessionFactory),
        };
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }

        let ip = match resolve_target(&self.runtime, host).await {
            Ok(ips) => ips[0],
            Err(e) => {
                self.report(ServerStatus::ErrorOccurred, &e.to_string());
                return Err(e);
            }
        };
        let addr = SocketAddr::new(ip, port);
        let listener = match self.runtime.listen(&addr, backlog).await {
            Ok(l) => l,
            Err(e) => {
                error!("Couldn't listen on {}: {}", addr, e);
                self.report(ServerStatus::ErrorOccurred, &e.to_string());
                return Err(Error::Bind {
                    addr: addr.to_string(),
                    source: e,
                });
            }
        };
        let local = listener.local_addr()?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.running.store(true, Ordering::SeqCst);
        let accepting = accept_loop(
            listener,
            self.runtime.clone(),
            factory,
            Arc::clone(&self.pool),
            Arc::clone(&self.shared),
            self.callback.clone(),
            stop_rx,
            done_tx,
        );
        if let Err(e) = self.runtime.spawn(accepting) {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        self.local_addr = Some(local);
        self.stop = Some(StopHandle {
            stop: stop_tx,
            done: done_rx,
        });
        info!("Listening on {}", local);
        self.report(
            ServerStatus::Started,
            &format!("ProxyServer bound on {}:{}", host, local.port()),
        );
        Ok(local)
    }

    /// Close the listener, then every live session and any background
    /// tasks.
    ///
    /// The listener goes first, so that no connection accepted during
    /// shutdown outlives it.  Does nothing to the listener if the server
    /// isn't running.
    pub async fn shutdown(&mut self) {
        if let Some(StopHandle { stop, done }) = self.stop.take() {
            let _ = stop.send(());
            // The loop reports the shutdown itself.
            let _ = done.await;
        }
        self.local_addr = None;

        let sessions: Vec<(SessionId, SessionEntry)> = self
            .shared
            .sessions
            .lock()
            .expect("poisoned lock")
            .drain()
            .collect();
        for (id, entry) in sessions {
            debug!("Closing session {} with {}", id, entry.peer);
            entry.handle.abort();
        }
        for task in self
            .shared
            .background
            .lock()
            .expect("poisoned lock")
            .drain(..)
        {
            task.abort();
        }
    }

    /// Return true if the server is listening.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Return the address the server is listening on, if it is.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Return the number of sessions that haven't finished yet.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().expect("poisoned lock").len()
    }

    /// Stop the task behind `handle` when the server shuts down.
    pub fn add_background_task(&self, handle: AbortHandle) {
        self.shared
            .background
            .lock()
            .expect("poisoned lock")
            .push(handle);
    }

    /// Tell the callback, if there is one.
    fn report(&self, status: ServerStatus, msg: &str) {
        report(&self.callback, status, msg);
    }
}

/// Tell `callback` about `status`, if there is a callback.
fn report(callback: &Option<StatusCallback>, status: ServerStatus, msg: &str) {
    if let Some(cb) = callback {
        cb(status, msg);
    }
}

/// Accept connections on `listener` until told to stop, starting a session
/// for each.
#[allow(clippy::too_many_arguments)]
async fn accept_loop<R, F>(
    listener: R::TcpListener,
    runtime: R,
    factory: Arc<F>,
    pool: Arc<BufferPool>,
    shared: Arc<Shared>,
    callback: Option<StatusCallback>,
    mut stop: oneshot::Receiver<()>,
    done: oneshot::Sender<()>,
) where
    R: Runtime,
    F: SessionFactory<R>,
{
    loop {
        let accepted = match future::select(listener.accept(), &mut stop).await {
            Either::Left((r, _)) => r,
            // Asked to stop, or the server was dropped.
            Either::Right(_) => break,
        };
        match accepted {
            Ok((_, peer)) if !matches!(stop.try_recv(), Ok(None)) => {
                debug!("Dropping connection from {}: shutting down", peer);
                break;
            }
            Ok((stream, peer)) => {
                launch_session(&runtime, &factory, &pool, &shared, stream, peer);
            }
            Err(e) => {
                warn!("Failed to accept a connection: {}", e);
                runtime.sleep(Duration::from_millis(100)).await;
            }
        }
    }

    let addr = listener.local_addr();
    drop(listener);
    shared.running.store(false, Ordering::SeqCst);
    match addr {
        Ok(a) => info!("Stopped listening on {}", a),
        Err(_) => info!("Stopped listening"),
    }
    report(&callback, ServerStatus::Shutdown, "ProxyServer shut down");
    let _ = done.send(());
}

/// Register a session for `stream` and spawn a task to run it.
fn launch_session<R, F>(
    runtime: &R,
    factory: &Arc<F>,
    pool: &Arc<BufferPool>,
    shared: &Arc<Shared>,
    stream: R::TcpStream,
    peer: SocketAddr,
) where
    R: Runtime,
    F: SessionFactory<R>,
{
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    debug!("Session {}: accepted connection from {}", id, peer);
    let session = factory.create(SessionContext {
        id,
        runtime: runtime.clone(),
        stream,
        peer,
        pool: Arc::clone(pool),
    });

    let (running, handle) = future::abortable(session.run());
    shared
        .sessions
        .lock()
        .expect("poisoned lock")
        .insert(id, SessionEntry { peer, handle });

    let registry = Arc::clone(shared);
    let spawned = runtime.spawn(async move {
        match running.await {
            Ok(Ok(())) => debug!("Session {}: finished", id),
            Ok(Err(e)) => debug!("Session {}: ended with error: {}", id, e),
            Err(future::Aborted) => debug!("Session {}: closed by the server", id),
        }
        registry.sessions.lock().expect("poisoned lock").remove(&id);
    });
    if let Err(e) = spawned {
        warn!("Couldn't start session {}: {}", id, e);
        shared.sessions.lock().expect("poisoned lock").remove(&id);
    }
}
