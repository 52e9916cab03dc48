//! Implementations of the runtime traits for particular executors.

#[cfg(feature = "tokio")]
pub(crate) mod tokio;
