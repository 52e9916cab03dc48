//! Compatibility layer between the proxy crates and an async runtime.
//!
//! The proxy core never talks to a reactor directly.  Instead it asks for
//! a [`Runtime`]: something that can spawn tasks, sleep, open and accept
//! TCP connections, and resolve hostnames.  This crate declares those
//! traits and provides one implementation on top of a single-threaded
//! tokio runtime.
//!
//! Tests elsewhere in the workspace swap the network half of a runtime for
//! a simulated one (see the `proxy-rtmock` crate), so nothing here may
//! assume that a stream is a real socket.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]

pub(crate) mod impls;
mod timer;
mod traits;

#[cfg(all(test, feature = "tokio"))]
mod test;

pub use timer::{SleepProviderExt, Timeout, TimeoutError};
pub use traits::{
    DnsProvider, Runtime, SleepProvider, Spawn, SpawnBlocking, StreamAddrs, TcpListener,
    TcpProvider,
};

pub use futures::task::SpawnExt;

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "tokio")]
pub use crate::tokio::{create_runtime, test_with_runtime};
