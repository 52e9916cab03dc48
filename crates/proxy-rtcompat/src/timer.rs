//! Timer helpers that work with any [`SleepProvider`].

use crate::traits::SleepProvider;
use futures::Future;
use pin_project::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// An error value given when a function times out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct TimeoutError;

impl std::error::Error for TimeoutError {}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timeout expired")
    }
}

impl From<TimeoutError> for std::io::Error {
    fn from(err: TimeoutError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::TimedOut, err)
    }
}

/// Extension methods for every [`SleepProvider`].
pub trait SleepProviderExt: SleepProvider {
    /// Race `future` against a timer of length `duration`.
    ///
    /// The returned future yields the output of `future` if it finishes
    /// first, and [`TimeoutError`] otherwise.  The inner future is dropped
    /// along with the returned one.
    fn timeout<F: Future>(&self, duration: Duration, future: F) -> Timeout<F, Self::SleepFuture> {
        Timeout {
            future,
            sleep_future: self.sleep(duration),
        }
    }
}

impl<T: SleepProvider + ?Sized> SleepProviderExt for T {}

/// A future returned by [`SleepProviderExt::timeout`].
#[pin_project]
#[must_use = "Futures do nothing unless .awaited on."]
pub struct Timeout<T, S> {
    /// The future we are waiting for.
    #[pin]
    future: T,
    /// The timer that limits how long we wait.
    #[pin]
    sleep_future: S,
}

impl<T, S> Future for Timeout<T, S>
where
    T: Future,
    S: Future<Output = ()>,
{
    type Output = Result<T::Output, TimeoutError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(x) = this.future.poll(cx) {
            return Poll::Ready(Ok(x));
        }
        match this.sleep_future.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => Poll::Ready(Err(TimeoutError)),
        }
    }
}
