//! Entry points for use with tokio.
pub use crate::impls::tokio::TokioRuntime;

/// Create a new tokio-backed [`Runtime`](crate::Runtime).
///
/// Call this once and clone the result; clones share the same event loop.
pub fn create_runtime() -> std::io::Result<TokioRuntime> {
    crate::impls::tokio::create_runtime()
}

/// Run a test function using a freshly created tokio runtime.
///
/// # Panics
///
/// Panics if no runtime can be built.
pub fn test_with_runtime<P, F, O>(func: P) -> O
where
    P: FnOnce(TokioRuntime) -> F,
    F: futures::Future<Output = O>,
{
    use crate::SpawnBlocking;
    let runtime = create_runtime().expect("Couldn't build a tokio runtime");
    runtime.block_on(func(runtime.clone()))
}
