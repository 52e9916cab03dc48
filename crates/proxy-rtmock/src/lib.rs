//! Support for testing the proxy crates without a real network.
//!
//! This crate should only be used for writing tests.
//!
//! It provides in-memory stream pairs, a simulated TCP network, a
//! scripted hostname resolver, and a [`MockNetRuntime`] that plugs those
//! into an otherwise real runtime.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod dns;
pub mod io;
pub mod net;

mod net_runtime;
pub use net_runtime::MockNetRuntime;
