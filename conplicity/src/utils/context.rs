use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream, Stream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ConplicityError, Result};

/// Deadline given to cleanup calls once the caller's context is already done.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cancellation and deadline carried into every container runtime call.
#[derive(Clone, Debug)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never done unless cancelled explicitly.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derives a context cancelled together with `self`, whose deadline is the
    /// earlier of the parent's and `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) => parent.min(deadline),
                None => deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self, operation: &'static str) -> ConplicityError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ConplicityError::Cancelled {
                    operation,
                    reason: "context cancelled",
                },
                _ = tokio::time::sleep_until(deadline) => ConplicityError::Cancelled {
                    operation,
                    reason: "deadline exceeded",
                },
            },
            None => {
                self.token.cancelled().await;
                ConplicityError::Cancelled {
                    operation,
                    reason: "context cancelled",
                }
            }
        }
    }

    /// Runs `fut` until it completes or the context is done, whichever is first.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            reason = self.done(operation) => Err(reason),
            res = fut => res,
        }
    }

    /// Forwards `inner` until the context is done, then yields a single
    /// cancellation error and ends.
    pub fn bind_stream<'a, S, T>(
        &'a self,
        operation: &'static str,
        inner: S,
    ) -> BoxStream<'a, Result<T>>
    where
        S: Stream<Item = Result<T>> + Send + 'a,
        T: Send + 'a,
    {
        let done = Box::pin(self.done(operation));
        stream::unfold(Some((inner.boxed(), done)), |state| async move {
            let Some((mut inner, mut done)) = state else {
                return None;
            };
            tokio::select! {
                biased;
                reason = &mut done => Some((Err(reason), None)),
                item = inner.next() => item.map(|item| (item, Some((inner, done)))),
            }
        })
        .boxed()
    }

    /// The context to use for best-effort cleanup after work under `self`.
    pub fn cleanup_context(&self) -> Self {
        if self.is_done() {
            Self::with_timeout(CLEANUP_TIMEOUT)
        } else {
            self.clone()
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
