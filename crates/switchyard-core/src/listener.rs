//! Listener registry and concurrent fan-out.
//!
//! Every registration is a chain of predicate middleware, optional user
//! middleware and one terminal listener. Dispatch runs every chain at once,
//! each on its own task, waits for all of them to settle and folds the results
//! into a single [`DispatchOutcome`]. One listener failing never cancels the
//! others.

use crate::args::EventArgs;
use crate::error::{ListenerError, MultipleListenerError};
use crate::middleware::{run_chain, ChainOutcome, Listener, ListenerResult, Middleware};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error};

/// User middleware plus the listener it guards.
#[derive(Clone)]
pub struct ListenerChain {
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub listener: Arc<dyn Listener>,
}

impl ListenerChain {
    pub fn new(listener: Arc<dyn Listener>) -> Self {
        Self {
            middleware: Vec::new(),
            listener,
        }
    }

    /// Append a middleware that runs after the built-in predicates.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }
}

impl From<Arc<dyn Listener>> for ListenerChain {
    fn from(listener: Arc<dyn Listener>) -> Self {
        Self::new(listener)
    }
}

/// One immutable registration.
struct ListenerEntry {
    description: String,
    middleware: Vec<Arc<dyn Middleware>>,
    listener: Arc<dyn Listener>,
}

/// Result of fanning one event out to every registration.
#[derive(Debug)]
pub enum DispatchOutcome {
    Success,
    SingleFailure(ListenerError),
    MultipleFailure(Vec<ListenerError>),
}

impl DispatchOutcome {
    fn from_failures(mut failures: Vec<ListenerError>) -> Self {
        match failures.len() {
            0 => Self::Success,
            1 => match failures.pop() {
                Some(failure) => Self::SingleFailure(failure),
                None => Self::Success,
            },
            _ => Self::MultipleFailure(failures),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// A single failure is returned unchanged; several are wrapped in
    /// [`MultipleListenerError`].
    pub fn into_result(self) -> ListenerResult {
        match self {
            Self::Success => Ok(()),
            Self::SingleFailure(error) => Err(error),
            Self::MultipleFailure(errors) => Err(Box::new(MultipleListenerError { errors })),
        }
    }
}

/// Ordered set of listener registrations.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<Arc<ListenerEntry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration. `predicates` run before the chain's own middleware.
    pub fn register(
        &mut self,
        description: impl Into<String>,
        predicates: Vec<Arc<dyn Middleware>>,
        chain: ListenerChain,
    ) {
        let description = description.into();
        debug!(listener = %description, "Registering listener");

        let mut middleware = predicates;
        middleware.extend(chain.middleware);
        self.entries.push(Arc::new(ListenerEntry {
            description,
            middleware,
            listener: chain.listener,
        }));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptions of the registrations, in insertion order.
    pub fn descriptions(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.description.as_str())
            .collect()
    }

    /// Run every registration against `args` concurrently.
    pub async fn dispatch(&self, args: Arc<EventArgs>) -> DispatchOutcome {
        let tasks = self.entries.iter().map(|entry| {
            let entry = Arc::clone(entry);
            let args = Arc::clone(&args);
            tokio::spawn(async move {
                run_chain(&entry.middleware, entry.listener.as_ref(), &args).await
            })
        });
        let settled = join_all(tasks).await;

        let mut matched = 0usize;
        let mut failures: Vec<ListenerError> = Vec::new();
        for (entry, result) in self.entries.iter().zip(settled) {
            match result {
                Ok(Ok(ChainOutcome::Completed)) => matched += 1,
                Ok(Ok(ChainOutcome::Stopped)) => {}
                Ok(Err(failure)) => {
                    debug!(listener = %entry.description, error = %failure, "Listener failed");
                    failures.push(failure);
                }
                Err(join_error) => {
                    error!(listener = %entry.description, error = %join_error, "Listener task aborted");
                    failures.push(format!("listener task aborted: {join_error}").into());
                }
            }
        }

        debug!(
            registered = self.entries.len(),
            matched,
            failed = failures.len(),
            "Dispatch settled"
        );
        DispatchOutcome::from_failures(failures)
    }
}

/// Terminal of the global chain: hands the event to the registry.
pub(crate) struct FanOut<'a> {
    registry: &'a ListenerRegistry,
    args: Arc<EventArgs>,
}

impl<'a> FanOut<'a> {
    pub(crate) fn new(registry: &'a ListenerRegistry, args: Arc<EventArgs>) -> Self {
        Self { registry, args }
    }
}

#[async_trait]
impl<'a> Listener for FanOut<'a> {
    async fn handle(&self, _args: &EventArgs) -> ListenerResult {
        self.registry
            .dispatch(Arc::clone(&self.args))
            .await
            .into_result()
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
