//! Saga building blocks.

use crate::action::{Action, BoxFuture};
use crate::errors::BoxError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

type CompensatorFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;
type RunFn<T, E> =
    Arc<dyn Fn(SagaCtx) -> BoxFuture<'static, Result<T, StepFailure<E>>> + Send + Sync>;

/// A recorded undo action, tagged with the stage that produced it.
pub(crate) struct RollbackEntry {
    pub(crate) stage: usize,
    pub(crate) undo: UndoFn,
}

/// Per-run saga state: the undo stack and the stage counter.
#[derive(Clone)]
pub(crate) struct SagaCtx {
    log: Arc<Mutex<Vec<RollbackEntry>>>,
    stages_started: Arc<AtomicUsize>,
}

impl SagaCtx {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            stages_started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn next_stage(&self) -> usize {
        self.stages_started.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_stage(&self) -> usize {
        self.stages_started.load(Ordering::SeqCst).max(1)
    }

    pub(crate) fn record(&self, stage: usize, undo: UndoFn) {
        self.log.lock().push(RollbackEntry { stage, undo });
    }

    pub(crate) fn recorded(&self) -> usize {
        self.log.lock().len()
    }

    pub(crate) fn drain(&self) -> Vec<RollbackEntry> {
        std::mem::take(&mut *self.log.lock())
    }
}

pub(crate) type StepFailure<E> = (usize, SagaFailure<E>);

/// A single saga step: an action plus an optional compensator.
pub struct SagaStep<T, E> {
    action: Action<T, E>,
    compensator: Option<CompensatorFn<T>>,
}

impl<T, E> Clone for SagaStep<T, E> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            compensator: self.compensator.clone(),
        }
    }
}

/// Creates a saga step from an action. Attach an undo with
/// [`SagaStep::compensate`].
pub fn step<T, E>(action: Action<T, E>) -> SagaStep<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    SagaStep {
        action,
        compensator: None,
    }
}

impl<T, E> SagaStep<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Attaches the compensator that undoes this step.
    ///
    /// It receives the step's success value and runs only if a later
    /// stage fails (or the saga is cancelled).
    #[must_use]
    pub fn compensate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.compensator = Some(Arc::new(move |value| Box::pin(f(value))));
        self
    }

    /// Runs the step's action at the given stage, recording the
    /// compensator on success.
    pub(crate) async fn execute(&self, ctx: &SagaCtx, stage: usize) -> Result<T, StepFailure<E>> {
        match self.action.run().await {
            Ok(value) => {
                if let Some(compensator) = &self.compensator {
                    let compensator = Arc::clone(compensator);
                    let undo_value = value.clone();
                    ctx.record(stage, Box::new(move || compensator(undo_value)));
                }
                Ok(value)
            }
            Err(e) => Err((stage, SagaFailure::Failed(e))),
        }
    }

    /// Chains a dependent step after this one, producing a saga
    /// program.
    pub fn then<U, F>(self, f: F) -> Saga<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> SagaStep<U, E> + Send + Sync + 'static,
    {
        self.into_saga().then(f)
    }

    /// Wraps the step into a single-stage saga program.
    #[must_use]
    pub fn into_saga(self) -> Saga<T, E> {
        Saga {
            run_fn: Arc::new(move |ctx| {
                let step = self.clone();
                Box::pin(async move {
                    let stage = ctx.next_stage();
                    step.execute(&ctx, stage).await
                })
            }),
        }
    }
}

/// A composed saga program: one or more chained steps.
///
/// Programs are lazy and reusable; nothing runs until handed to
/// [`run_saga`](crate::saga::run_saga).
pub struct Saga<T, E> {
    pub(crate) run_fn: RunFn<T, E>,
}

impl<T, E> Clone for Saga<T, E> {
    fn clone(&self) -> Self {
        Self {
            run_fn: Arc::clone(&self.run_fn),
        }
    }
}

impl<T, E> Saga<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Chains a dependent step after this program.
    ///
    /// `f` receives the previous stage's success value and returns the
    /// next step to run.
    pub fn then<U, F>(self, f: F) -> Saga<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> SagaStep<U, E> + Send + Sync + 'static,
    {
        let prev = self.run_fn;
        let f = Arc::new(f);
        Saga {
            run_fn: Arc::new(move |ctx| {
                let prev = Arc::clone(&prev);
                let f = Arc::clone(&f);
                Box::pin(async move {
                    let value = prev(ctx.clone()).await?;
                    let stage = ctx.next_stage();
                    f(value).execute(&ctx, stage).await
                })
            }),
        }
    }
}

/// Successful saga outcome with rollback-bookkeeping metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaResult<T> {
    /// The final stage's value.
    pub value: T,
    /// How many stages ran.
    pub steps_executed: usize,
    /// How many compensators were recorded along the way.
    pub compensators_recorded: usize,
}

/// Why a saga stage did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaFailure<E> {
    /// The stage's action returned an error.
    #[error("{0}")]
    Failed(E),

    /// The saga was cancelled while this stage was in flight.
    #[error("cancelled")]
    Cancelled,
}

/// A compensator that itself failed during rollback.
#[derive(Debug, Error)]
#[error("compensator for stage {stage} failed: {error}")]
pub struct RollbackError {
    /// The stage whose compensator failed.
    pub stage: usize,
    /// The compensator's error.
    pub error: BoxError,
}

/// A failed saga: where it failed and how the rollback went.
#[derive(Debug, Error)]
#[error("saga failed at stage {stage}: {failure}")]
pub struct SagaError<E> {
    /// The 1-based stage that failed.
    pub stage: usize,
    /// The failure itself.
    pub failure: SagaFailure<E>,
    /// Whether every compensator ran cleanly.
    pub rollback_complete: bool,
    /// Compensators that failed during the unwind, in unwind order.
    pub rollback_errors: Vec<RollbackError>,
}
