//! Cancellable effect pipelines.
//!
//! An [`Effect`] wraps an async unit of work parameterized by an input. Each
//! [`invoke`](Effect::invoke) is admitted according to the pipeline's
//! [`Concurrency`] policy and runs as a tokio task with its own cancellation
//! token derived from the owning [`Scope`].
//!
//! ```text
//! invoke(input)
//!     │
//!     ▼
//! Concurrency policy ── Exhaust: drop while busy
//!     │                 Concat:  queue, run serially
//!     │                 Merge:   run concurrently
//!     ▼
//! handler(input, EffectContext)
//!     │  ctx.loading(flag)   onStart / onComplete
//!     │  ctx.attempt(op)     retry + cancellation
//!     │  ctx.commit(f)       state write, skipped once cancelled
//!     ▼
//! Done | Failed → error container + log | Cancelled → nothing
//! ```

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::Retryable as _;
use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::live_data::{lock, LiveData};
use crate::retry::{RetryPolicy, Retryable};
use crate::scope::{Gate, Scope};

/// How overlapping invocations of one pipeline interleave.
///
/// The choice is part of an operation's semantics: swapping policies changes
/// which writes happen and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Drop new invocations while one is running.
    Exhaust,
    /// Queue invocations and run them one at a time in arrival order.
    Concat,
    /// Run every invocation immediately; completion order is unspecified.
    Merge,
}

/// What happened to an invocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Work started.
    Started,
    /// Work was queued behind a running invocation (Concat).
    Queued,
    /// Work was discarded because another invocation is running (Exhaust).
    Dropped,
    /// The owning scope is disposed, or there is no runtime to run on.
    Closed,
}

/// Terminal outcome of one attempted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T, E> {
    Done(T),
    /// Failed after the retry policy was exhausted, or on a non-transient error.
    Failed(E),
    /// Superseded or disposed. Not an error.
    Cancelled,
}

impl<T, E> Attempt<T, E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Attempt::Cancelled)
    }
}

type Handler<I> = Arc<dyn Fn(I, EffectContext) -> BoxFuture<'static, ()> + Send + Sync>;

struct Slots<I> {
    token: CancellationToken,
    generation: u64,
    active: usize,
    queue: VecDeque<I>,
}

struct EffectInner<I> {
    name: &'static str,
    concurrency: Concurrency,
    scope: Scope,
    retry: RetryPolicy,
    handler: Handler<I>,
    slots: Mutex<Slots<I>>,
    idle: Notify,
}

/// A named, invokable async pipeline.
///
/// Cloning yields another handle to the same pipeline.
pub struct Effect<I> {
    inner: Arc<EffectInner<I>>,
}

impl<I> Clone for Effect<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I: Send + 'static> Effect<I> {
    pub fn new<F, Fut>(
        name: &'static str,
        concurrency: Concurrency,
        scope: &Scope,
        retry: RetryPolicy,
        handler: F,
    ) -> Self
    where
        F: Fn(I, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<I> =
            Arc::new(move |input: I, ctx: EffectContext| -> BoxFuture<'static, ()> {
                Box::pin(handler(input, ctx))
            });
        Self {
            inner: Arc::new(EffectInner {
                name,
                concurrency,
                scope: scope.clone(),
                retry,
                handler,
                slots: Mutex::new(Slots {
                    token: scope.token().child_token(),
                    generation: 0,
                    active: 0,
                    queue: VecDeque::new(),
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn concurrency(&self) -> Concurrency {
        self.inner.concurrency
    }

    /// Request a run with `input`. Never panics; failures surface through the
    /// handler's error channel.
    pub fn invoke(&self, input: I) -> Dispatch {
        let inner = &self.inner;
        if inner.scope.is_disposed() {
            log::debug!("{}: invoked after dispose, ignoring", inner.name);
            return Dispatch::Closed;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::error!("{}: invoked outside a tokio runtime", inner.name);
                return Dispatch::Closed;
            }
        };

        let mut slots = lock(&inner.slots);
        if slots.active > 0 {
            match inner.concurrency {
                Concurrency::Exhaust => {
                    log::debug!("{}: busy, dropping invocation", inner.name);
                    return Dispatch::Dropped;
                }
                Concurrency::Concat => {
                    slots.queue.push_back(input);
                    return Dispatch::Queued;
                }
                Concurrency::Merge => {}
            }
        }
        slots.active += 1;
        let generation = slots.generation;
        let token = slots.token.child_token();
        drop(slots);

        let inner = self.inner.clone();
        runtime.spawn(async move {
            let mut next = Some((input, token));
            while let Some((input, token)) = next.take() {
                let ctx = EffectContext {
                    name: inner.name,
                    token: token.clone(),
                    gate: inner.scope.gate().clone(),
                    retry: inner.retry.clone(),
                };
                let work = (inner.handler)(input, ctx);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        log::debug!("{}: invocation cancelled", inner.name);
                    }
                    _ = work => {}
                }
                next = inner.next_or_finish(generation);
            }
        });
        Dispatch::Started
    }

    /// Cancel running and queued invocations.
    ///
    /// The pipeline stays usable: the next `invoke` starts fresh. When this
    /// returns, cancelled invocations no longer write state.
    pub fn cancel(&self) {
        let token = {
            let mut slots = lock(&self.inner.slots);
            let fresh = self.inner.scope.token().child_token();
            let old = std::mem::replace(&mut slots.token, fresh);
            slots.generation += 1;
            slots.active = 0;
            slots.queue.clear();
            old
        };
        self.inner.scope.gate().close(&token);
        self.inner.idle.notify_waiters();
    }

    /// Whether an invocation is running or queued.
    pub fn is_running(&self) -> bool {
        let slots = lock(&self.inner.slots);
        slots.active > 0 || !slots.queue.is_empty()
    }

    /// Wait until no invocation is running or queued.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

impl<I> EffectInner<I> {
    /// Pop the next queued input, or release the slot.
    fn next_or_finish(&self, generation: u64) -> Option<(I, CancellationToken)> {
        let mut slots = lock(&self.slots);
        if slots.generation != generation {
            return None;
        }
        if let Some(input) = slots.queue.pop_front() {
            return Some((input, slots.token.child_token()));
        }
        slots.active = slots.active.saturating_sub(1);
        let idle = slots.active == 0;
        drop(slots);
        if idle {
            self.idle.notify_waiters();
        }
        None
    }
}

impl<I> std::fmt::Debug for Effect<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = lock(&self.inner.slots);
        f.debug_struct("Effect")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .field("active", &slots.active)
            .field("queued", &slots.queue.len())
            .finish()
    }
}

/// Per-invocation handle passed to an effect handler.
pub struct EffectContext {
    name: &'static str,
    token: CancellationToken,
    gate: Gate,
    retry: RetryPolicy,
}

impl EffectContext {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancellation signal to hand to the transport.
    pub fn signal(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Apply a state write unless this invocation was cancelled.
    pub fn commit<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.gate.commit(&self.token, f)
    }

    /// Run `op` under the pipeline's retry policy.
    ///
    /// Transient failures are retried with backoff; the first non-transient
    /// failure, or the last transient one, is returned as `Failed`.
    /// Cancellation during the call or a backoff sleep yields `Cancelled`.
    pub async fn attempt<T, E, F, Fut>(&self, mut op: F) -> Attempt<T, E>
    where
        E: Retryable + Display,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = &self.name;
        let retried = (|| op(self.signal()))
            .retry(&self.retry.builder())
            .sleep(tokio::time::sleep)
            .when(|err: &E| err.is_transient())
            .notify(|err: &E, delay: Duration| {
                log::warn!("{}: attempt failed ({}), retrying in {:?}", name, err, delay);
            });

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Attempt::Cancelled,
            result = retried => match result {
                Ok(value) => Attempt::Done(value),
                Err(err) => Attempt::Failed(err),
            },
        }
    }

    /// Mark `flag` as loading until the returned guard drops.
    ///
    /// The reset is a commit: it happens after success or failure, never
    /// after cancellation.
    pub fn loading(&self, flag: &LiveData<bool>) -> Loading {
        self.commit(|| flag.set(true));
        Loading {
            flag: flag.clone(),
            token: self.token.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Route a failure into `errors` and log it.
    pub fn fail<E>(&self, errors: &LiveData<Option<E>>, err: E, what: &str)
    where
        E: Clone + PartialEq + Send + Display + 'static,
    {
        if self.is_cancelled() {
            return;
        }
        log::error!("{what}: {err}");
        self.commit(|| errors.set(Some(err)));
    }
}

/// onComplete half of [`EffectContext::loading`].
pub struct Loading {
    flag: LiveData<bool>,
    token: CancellationToken,
    gate: Gate,
}

impl Drop for Loading {
    fn drop(&mut self) {
        let flag = &self.flag;
        self.gate.commit(&self.token, || flag.set(false));
    }
}
