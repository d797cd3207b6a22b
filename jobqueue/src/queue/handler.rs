//! Job handlers.
//!
//! A handler is the only code that interprets a job's payload. Workers call it
//! once per claimed job; any returned error (or panic) counts as a failed
//! execution.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::job::Job;

/// Executes jobs for a queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        (**self).handle(job).await
    }
}

/// Handler backed by an async closure. Build one with [`handler_fn`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Adapt `Fn(Job) -> impl Future<Output = anyhow::Result<()>>` into a [`JobHandler`].
///
/// The closure receives an owned clone of the job.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        (self.f)(job.clone()).await
    }
}

/// Dispatches jobs to a handler chosen by the job's `name`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for jobs named `name`, replacing any previous one.
    pub fn register(mut self, name: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl JobHandler for HandlerRegistry {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        match self.handlers.get(&job.name) {
            Some(handler) => handler.handle(job).await,
            None => anyhow::bail!("no handler registered for job '{}'", job.name),
        }
    }
}
