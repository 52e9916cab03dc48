//! A scripted hostname resolver.

use async_trait::async_trait;
use proxy_rtcompat::DnsProvider;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The scripted answer for one hostname.
#[derive(Clone, Debug)]
enum Answer {
    /// Resolve to these addresses (possibly none).
    Addrs(Vec<IpAddr>),
    /// Fail with this kind of error.
    Fail(ErrorKind),
    /// Never answer.
    Hang,
}

/// A resolver that answers from a table.
///
/// Unknown names fail with [`ErrorKind::NotFound`]; IP literals resolve
/// to themselves.  Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct MockDns {
    /// Shared state.
    inner: Arc<MockDnsInner>,
}

/// Shared part of a [`MockDns`].
#[derive(Debug, Default)]
struct MockDnsInner {
    /// Scripted answers, by hostname.
    table: Mutex<HashMap<String, Answer>>,
    /// Every name that has been looked up, in order.
    lookups: Mutex<Vec<String>>,
    /// Number of lookups that were dropped before they finished.
    abandoned: AtomicUsize,
}

/// Counts a lookup as abandoned unless it is disarmed first.
struct AbandonGuard<'a> {
    /// Counter to bump on drop.
    counter: &'a AtomicUsize,
    /// Whether to bump it.
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl MockDns {
    /// Create a resolver with an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `host` resolve to `addrs`, in that order.
    pub fn add_host(&self, host: &str, addrs: Vec<IpAddr>) {
        self.table().insert(host.to_string(), Answer::Addrs(addrs));
    }

    /// Make lookups of `host` fail with `kind`.
    pub fn fail_host(&self, host: &str, kind: ErrorKind) {
        self.table().insert(host.to_string(), Answer::Fail(kind));
    }

    /// Make lookups of `host` never finish.
    pub fn hang_host(&self, host: &str) {
        self.table().insert(host.to_string(), Answer::Hang);
    }

    /// Return every name that has been looked up so far.
    pub fn lookups(&self) -> Vec<String> {
        self.inner
            .lookups
            .lock()
            .expect("Poisoned lock on lookup log")
            .clone()
    }

    /// Return how many lookups were dropped before they finished.
    pub fn abandoned_lookups(&self) -> usize {
        self.inner.abandoned.load(Ordering::SeqCst)
    }

    /// Lock and return the answer table.
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Answer>> {
        self.inner.table.lock().expect("Poisoned lock on DNS table")
    }
}

#[async_trait]
impl DnsProvider for MockDns {
    async fn resolve(&self, host: &str) -> IoResult<Vec<IpAddr>> {
        self.inner
            .lookups
            .lock()
            .expect("Poisoned lock on lookup log")
            .push(host.to_string());

        let mut guard = AbandonGuard {
            counter: &self.inner.abandoned,
            armed: true,
        };

        let answer = self.table().get(host).cloned();
        let result = match answer {
            Some(Answer::Addrs(a)) => Ok(a),
            Some(Answer::Fail(kind)) => Err(IoError::from(kind)),
            Some(Answer::Hang) => futures::future::pending().await,
            None => match host.parse::<IpAddr>() {
                Ok(ip) => Ok(vec![ip]),
                Err(_) => Err(IoError::from(ErrorKind::NotFound)),
            },
        };
        guard.armed = false;
        result
    }
}
