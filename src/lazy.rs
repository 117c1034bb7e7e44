//! Deferred evaluation on the actual value
//!
//! [`Template::execute_lazy`] evaluates a template in its own task. When the
//! evaluation reaches `$` before finishing, the caller gets a [`Lazy`] back
//! and the task stays parked until a value is supplied through it.
//!
//! One evaluation attempt owns three single-use channels:
//!
//! - `ready` carries the actual value from the [`Lazy`] to the evaluator,
//! - `blocked` tells the caller the evaluator is waiting on `ready`,
//! - `done` carries the evaluation result back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, OnceCell};
use tokio::time::Instant;
use tracing::debug;

use crate::context::Context;
use crate::errors::{Error, Result};
use crate::template::{Evaluator, Template};
use crate::value::Value;

/// Synchronization state of one evaluation attempt.
pub(crate) struct WaitContext {
    context: Arc<Context>,
    deadline: Option<Instant>,
    ready: Mutex<Option<oneshot::Receiver<Value>>>,
    blocked: Mutex<Option<oneshot::Sender<()>>>,
    actual: OnceCell<Option<Value>>,
}

impl WaitContext {
    fn new(
        context: Arc<Context>,
        deadline: Option<Instant>,
        ready: oneshot::Receiver<Value>,
        blocked: oneshot::Sender<()>,
    ) -> Self {
        Self {
            context,
            deadline,
            ready: Mutex::new(Some(ready)),
            blocked: Mutex::new(Some(blocked)),
            actual: OnceCell::new(),
        }
    }

    /// Value of `$`; every reference after the first reuses the same result.
    pub(crate) async fn actual(&self) -> Result<Value> {
        self.actual
            .get_or_init(|| self.wait_for_actual())
            .await
            .clone()
            .ok_or(Error::ActualValueUnavailable)
    }

    async fn wait_for_actual(&self) -> Option<Value> {
        if let Some(blocked) = self.blocked.lock().await.take() {
            // the receiver is gone when nobody waits for a Lazy
            let _ = blocked.send(());
        }
        let mut ready = self.ready.lock().await;
        let rx = ready.as_mut()?;
        tokio::select! {
            biased;
            v = &mut *rx => v.ok(),
            _ = expired(self.deadline) => {
                // a value delivered before the deadline still wins
                let v = rx.try_recv().ok();
                if v.is_none() {
                    debug!("deadline expired before the actual value was supplied");
                }
                v
            }
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handles of one running evaluation.
struct Attempt {
    supply: Option<oneshot::Sender<Value>>,
    done: oneshot::Receiver<Result<Value>>,
}

impl Attempt {
    fn spawn(
        context: Arc<Context>,
        data: Arc<Value>,
        deadline: Option<Instant>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (supply, ready) = oneshot::channel();
        let (blocked_tx, blocked_rx) = oneshot::channel();
        let (done_tx, done) = oneshot::channel();
        let wait = WaitContext::new(context, deadline, ready, blocked_tx);
        tokio::spawn(async move {
            let result = Evaluator::new(&wait.context, Some(&wait))
                .execute(&data)
                .await;
            let _ = done_tx.send(result);
        });
        (
            Self {
                supply: Some(supply),
                done,
            },
            blocked_rx,
        )
    }

    /// Supply the actual value; only the first call per attempt succeeds.
    fn set(&mut self, actual: Value) -> Result<()> {
        let supply = self.supply.take().ok_or(Error::ActualValueAlreadySet)?;
        // a finished evaluator no longer listens; its result is still on `done`
        let _ = supply.send(actual);
        Ok(())
    }

    async fn wait(self) -> Result<Value> {
        self.done
            .await
            .map_err(|_| Error::Runtime("evaluation task terminated unexpectedly".into()))?
    }
}

/// Evaluation suspended on `$`.
///
/// The first call resumes the evaluation that produced this value. Later
/// calls evaluate the template again from scratch.
#[derive(Clone)]
pub struct Lazy {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    context: Arc<Context>,
    data: Arc<Value>,
    timeout: Option<Duration>,
    pending: Mutex<Option<Attempt>>,
}

impl Lazy {
    pub async fn call(&self, actual: Value) -> Result<Value> {
        let pending = self.inner.pending.lock().await.take();
        let mut attempt = match pending {
            Some(attempt) => attempt,
            None => {
                debug!("evaluating deferred template again");
                let deadline = self.inner.timeout.map(|t| Instant::now() + t);
                let (attempt, _blocked) = Attempt::spawn(
                    self.inner.context.clone(),
                    self.inner.data.clone(),
                    deadline,
                );
                attempt
            }
        };
        attempt.set(actual)?;
        attempt.wait().await
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("template", &self.inner.data)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// Evaluate with `$` available.
    ///
    /// Returns the value directly when the evaluation never touches `$`,
    /// otherwise a [`Value::Lazy`] waiting for it.
    pub async fn execute_lazy(&self, data: &Value) -> Result<Value> {
        let data = Arc::new(data.clone());
        let deadline = self.timeout().map(|t| Instant::now() + t);
        let (mut attempt, mut blocked) =
            Attempt::spawn(self.context().clone(), data.clone(), deadline);
        let finished = tokio::select! {
            biased;
            result = &mut attempt.done => Some(result),
            Ok(()) = &mut blocked => None,
        };
        match finished {
            Some(result) => result
                .map_err(|_| Error::Runtime("evaluation task terminated unexpectedly".into()))?,
            None => {
                debug!("deferring evaluation until the actual value is supplied");
                Ok(Value::Lazy(Lazy {
                    inner: Arc::new(LazyInner {
                        context: self.context().clone(),
                        data,
                        timeout: self.timeout(),
                        pending: Mutex::new(Some(attempt)),
                    }),
                }))
            }
        }
    }
}
