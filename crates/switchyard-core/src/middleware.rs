//! Ordered middleware chains with explicit continuation.
//!
//! A chain is a slice of [`Middleware`] followed by one terminal [`Listener`].
//! Each middleware receives a [`Next`] handle. Calling [`Next::run`] hands
//! control to the rest of the chain; returning without calling it ends the
//! chain early, which is not an error. `Next` is consumed by `run`, so
//! continuing twice does not compile:
//!
//! ```compile_fail
//! use switchyard_core::args::EventArgs;
//! use switchyard_core::middleware::{ListenerResult, Middleware, Next};
//!
//! struct Twice;
//!
//! #[async_trait::async_trait]
//! impl Middleware for Twice {
//!     async fn handle(&self, _args: &EventArgs, next: Next<'_>) -> ListenerResult {
//!         next.run().await?;
//!         next.run().await
//!     }
//! }
//! ```
//!
//! Chains hold no state between invocations; the same slice can drive any
//! number of events concurrently.

use crate::args::EventArgs;
use crate::error::ListenerError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of a middleware or listener.
pub type ListenerResult = Result<(), ListenerError>;

/// A step in a chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle the event, calling `next.run()` to continue the chain.
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult;
}

/// The terminal handler of a chain.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn handle(&self, args: &EventArgs) -> ListenerResult;
}

/// Continuation of a running chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Listener,
    args: &'a EventArgs,
    completed: &'a AtomicBool,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain and return its result.
    pub async fn run(self) -> ListenerResult {
        match self.remaining.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    remaining: rest,
                    terminal: self.terminal,
                    args: self.args,
                    completed: self.completed,
                };
                head.handle(self.args, next).await
            }
            None => {
                self.completed.store(true, Ordering::SeqCst);
                self.terminal.handle(self.args).await
            }
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining.len())
            .finish_non_exhaustive()
    }
}

/// How a chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every middleware continued and the terminal ran.
    Completed,
    /// A middleware returned without continuing; the terminal did not run.
    Stopped,
}

/// Run `middleware` in order, then `terminal`.
///
/// # Errors
///
/// The first error raised by a middleware or the terminal; nothing after it runs.
pub async fn run_chain(
    middleware: &[Arc<dyn Middleware>],
    terminal: &dyn Listener,
    args: &EventArgs,
) -> Result<ChainOutcome, ListenerError> {
    let completed = AtomicBool::new(false);
    Next {
        remaining: middleware,
        terminal,
        args,
        completed: &completed,
    }
    .run()
    .await?;

    if completed.load(Ordering::SeqCst) {
        Ok(ChainOutcome::Completed)
    } else {
        Ok(ChainOutcome::Stopped)
    }
}

// ============================================================================
// Closure Adapters
// ============================================================================

struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a EventArgs, Next<'a>) -> BoxFuture<'a, ListenerResult> + Send + Sync,
{
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        (self.0)(args, next).await
    }
}

/// Wrap a closure as middleware.
///
/// ```
/// use futures::FutureExt;
/// use switchyard_core::middleware::middleware_fn;
///
/// let log_kind = middleware_fn(|args, next| {
///     async move {
///         tracing::debug!(kind = %args.kind(), "passing through");
///         next.run().await
///     }
///     .boxed()
/// });
/// # drop(log_kind);
/// ```
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: for<'a> Fn(&'a EventArgs, Next<'a>) -> BoxFuture<'a, ListenerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnMiddleware(f))
}

struct FnListener<F>(F);

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: for<'a> Fn(&'a EventArgs) -> BoxFuture<'a, ListenerResult> + Send + Sync,
{
    async fn handle(&self, args: &EventArgs) -> ListenerResult {
        (self.0)(args).await
    }
}

/// Wrap a closure as a listener.
pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: for<'a> Fn(&'a EventArgs) -> BoxFuture<'a, ListenerResult> + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

#[cfg(test)]
#[path = "middleware_tests.rs"]
mod tests;
