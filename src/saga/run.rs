//! Saga runners: sequential, cancellable, parallel, and racing.

use super::types::{RollbackEntry, RollbackError, Saga, SagaCtx, SagaError, SagaFailure, SagaResult, SagaStep};
use crate::cancellation::CancellationToken;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Pops recorded compensators in LIFO order and runs every one.
///
/// Failures are collected, never fatal: a broken compensator does not
/// stop the remaining ones from being attempted.
async fn unwind(ctx: &SagaCtx) -> Vec<RollbackError> {
    let mut entries = ctx.drain();
    let mut failures = Vec::new();

    while let Some(RollbackEntry { stage, undo }) = entries.pop() {
        debug!(stage, "running compensator");
        if let Err(error) = undo().await {
            warn!(stage, %error, "compensator failed during rollback");
            failures.push(RollbackError { stage, error });
        }
    }

    failures
}

fn rollback_outcome<E>(stage: usize, failure: SagaFailure<E>, rollback_errors: Vec<RollbackError>) -> SagaError<E> {
    SagaError {
        stage,
        failure,
        rollback_complete: rollback_errors.is_empty(),
        rollback_errors,
    }
}

/// Runs a single compensated step.
pub async fn run<T, E>(step: &SagaStep<T, E>) -> Result<SagaResult<T>, SagaError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    run_saga(&step.clone().into_saga()).await
}

/// Runs a saga program, unwinding recorded compensators on failure.
pub async fn run_saga<T, E>(saga: &Saga<T, E>) -> Result<SagaResult<T>, SagaError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    let ctx = SagaCtx::new();

    match (saga.run_fn)(ctx.clone()).await {
        Ok(value) => Ok(SagaResult {
            value,
            steps_executed: ctx.current_stage(),
            compensators_recorded: ctx.recorded(),
        }),
        Err((stage, failure)) => {
            let rollback_errors = unwind(&ctx).await;
            Err(rollback_outcome(stage, failure, rollback_errors))
        }
    }
}

/// Runs a saga program under a cancellation token.
///
/// A token firing while stage *i* is in flight abandons that stage's
/// action, unwinds every compensator recorded so far, and surfaces
/// [`SagaFailure::Cancelled`] at stage *i*.
pub async fn run_cancellable<T, E>(
    saga: &Saga<T, E>,
    token: &CancellationToken,
) -> Result<SagaResult<T>, SagaError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    let ctx = SagaCtx::new();

    let outcome = tokio::select! {
        outcome = (saga.run_fn)(ctx.clone()) => outcome,
        () = token.cancelled() => Err((ctx.current_stage(), SagaFailure::Cancelled)),
    };

    match outcome {
        Ok(value) => Ok(SagaResult {
            value,
            steps_executed: ctx.current_stage(),
            compensators_recorded: ctx.recorded(),
        }),
        Err((stage, failure)) => {
            let rollback_errors = unwind(&ctx).await;
            Err(rollback_outcome(stage, failure, rollback_errors))
        }
    }
}

/// Runs independent steps concurrently; all must succeed.
///
/// On any failure the remaining siblings are aborted and the
/// compensators of every step that already succeeded run. Stages are
/// numbered by input position (1-based). Values come back in input
/// order.
pub async fn parallel_steps<T, E>(
    steps: &[SagaStep<T, E>],
) -> Result<SagaResult<Vec<T>>, SagaError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    let ctx = SagaCtx::new();
    let mut set = JoinSet::new();
    for (index, step) in steps.iter().enumerate() {
        let step = step.clone();
        let ctx = ctx.clone();
        set.spawn(async move { (index, step.execute(&ctx, index + 1).await) });
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(steps.len()).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => slots[index] = Some(value),
            Ok((_, Err((stage, failure)))) => {
                drop(set);
                let rollback_errors = unwind(&ctx).await;
                return Err(rollback_outcome(stage, failure, rollback_errors));
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }
    }

    Ok(SagaResult {
        value: slots.into_iter().flatten().collect(),
        steps_executed: steps.len(),
        compensators_recorded: ctx.recorded(),
    })
}

/// Races steps; the first success wins and the rest are aborted.
///
/// The winner's compensator stays recorded in the result metadata but
/// is not run. If every step fails, all recorded compensators unwind
/// and the last failure surfaces at stage `1 + rest.len()`.
pub async fn race_steps<T, E>(
    first: &SagaStep<T, E>,
    rest: &[SagaStep<T, E>],
) -> Result<SagaResult<T>, SagaError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    let ctx = SagaCtx::new();
    let mut set = JoinSet::new();
    for (index, step) in std::iter::once(first).chain(rest.iter()).enumerate() {
        let step = step.clone();
        let ctx = ctx.clone();
        set.spawn(async move { step.execute(&ctx, index + 1).await });
    }

    let mut last_failure = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(value)) => {
                return Ok(SagaResult {
                    value,
                    steps_executed: 1,
                    compensators_recorded: ctx.recorded(),
                });
            }
            Ok(Err((_, failure))) => last_failure = Some(failure),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }
    }

    let failure = match last_failure {
        Some(f) => f,
        None => unreachable!("race_steps ran at least one step"),
    };
    let rollback_errors = unwind(&ctx).await;
    Err(rollback_outcome(1 + rest.len(), failure, rollback_errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::saga::step;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recording_step(
        log: &Log,
        value: i32,
        tag: &'static str,
    ) -> SagaStep<i32, String> {
        let log = log.clone();
        step(Action::ok(value)).compensate(move |_| {
            let log = log.clone();
            async move {
                log.lock().push(tag);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn single_step_success() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let result = run(&recording_step(&log, 10, "c1")).await.unwrap();

        assert_eq!(result.value, 10);
        assert_eq!(result.steps_executed, 1);
        assert_eq!(result.compensators_recorded, 1);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn second_stage_failure_rolls_back_first() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let saga = recording_step(&log, 10, "c1")
            .then(|_| step(Action::<i32, String>::err("fail".to_string())));

        let err = run_saga(&saga).await.unwrap_err();
        assert_eq!(err.stage, 2);
        assert_eq!(err.failure, SagaFailure::Failed("fail".to_string()));
        assert!(err.rollback_complete);
        assert!(err.rollback_errors.is_empty());
        assert_eq!(*log.lock(), vec!["c1"]);
    }

    #[tokio::test]
    async fn rollback_runs_in_reverse_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let saga = recording_step(&log, 1, "c1")
            .then({
                let log = log.clone();
                move |_| recording_step(&log, 2, "c2")
            })
            .then({
                let log = log.clone();
                move |_| recording_step(&log, 3, "c3")
            })
            .then(|_| step(Action::<i32, String>::err("late failure".to_string())));

        let err = run_saga(&saga).await.unwrap_err();
        assert_eq!(err.stage, 4);
        assert!(err.rollback_complete);
        assert_eq!(*log.lock(), vec!["c3", "c2", "c1"]);
    }

    #[tokio::test]
    async fn chained_values_flow_forward() {
        let saga = step(Action::<i32, String>::ok(5))
            .then(|five| step(Action::ok(five * 2)))
            .then(|ten| step(Action::ok(ten + 1)));

        let result = run_saga(&saga).await.unwrap();
        assert_eq!(result.value, 11);
        assert_eq!(result.steps_executed, 3);
    }

    #[tokio::test]
    async fn failing_stage_compensator_does_not_run() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let poisoned = {
            let log = log.clone();
            step(Action::<i32, String>::err("stage failed".to_string())).compensate(move |_| {
                let log = log.clone();
                async move {
                    log.lock().push("never");
                    Ok(())
                }
            })
        };
        let saga = recording_step(&log, 1, "c1").then(move |_| poisoned.clone());

        let err = run_saga(&saga).await.unwrap_err();
        assert_eq!(err.stage, 2);
        assert_eq!(*log.lock(), vec!["c1"]);
    }

    #[tokio::test]
    async fn broken_compensators_do_not_stop_the_unwind() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let breaking = {
            let log = log.clone();
            step(Action::<i32, String>::ok(2)).compensate(move |_| {
                let log = log.clone();
                async move {
                    log.lock().push("c2-broken");
                    Err("undo exploded".into())
                }
            })
        };

        let saga = recording_step(&log, 1, "c1")
            .then(move |_| breaking.clone())
            .then(|_| step(Action::<i32, String>::err("late".to_string())));

        let err = run_saga(&saga).await.unwrap_err();
        assert_eq!(err.stage, 3);
        assert!(!err.rollback_complete);
        assert_eq!(err.rollback_errors.len(), 1);
        assert_eq!(err.rollback_errors[0].stage, 2);
        // Both compensators were attempted, in reverse order.
        assert_eq!(*log.lock(), vec!["c2-broken", "c1"]);
    }

    #[tokio::test]
    async fn cancellation_unwinds_and_surfaces_cancelled() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let slow = step(Action::<i32, String>::new(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(2)
        }));
        let saga = recording_step(&log, 1, "c1").then(move |_| slow.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel("shutdown");
        });

        let err = run_cancellable(&saga, &token).await.unwrap_err();
        assert_eq!(err.stage, 2);
        assert_eq!(err.failure, SagaFailure::Cancelled);
        assert!(err.rollback_complete);
        assert_eq!(*log.lock(), vec!["c1"]);
    }

    #[tokio::test]
    async fn parallel_steps_compensate_successes_on_failure() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        let quick_ok = recording_step(&log, 1, "undo-quick");
        let failing = step(Action::<i32, String>::new(|| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err("sibling failed".to_string())
        }));

        let err = parallel_steps(&[quick_ok, failing]).await.unwrap_err();
        assert_eq!(err.stage, 2);
        assert!(err.rollback_complete);
        assert_eq!(*log.lock(), vec!["undo-quick"]);
    }

    #[tokio::test]
    async fn parallel_steps_all_succeed() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let steps = [
            recording_step(&log, 1, "a"),
            recording_step(&log, 2, "b"),
            recording_step(&log, 3, "c"),
        ];

        let result = parallel_steps(&steps).await.unwrap();
        assert_eq!(result.value, vec![1, 2, 3]);
        assert_eq!(result.compensators_recorded, 3);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn race_returns_first_success() {
        let slow = step(Action::<i32, String>::new(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        }));
        let fast = step(Action::<i32, String>::new(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(2)
        }));

        let result = race_steps(&slow, &[fast]).await.unwrap();
        assert_eq!(result.value, 2);
        assert_eq!(result.steps_executed, 1);
    }

    #[tokio::test]
    async fn race_all_failed_unwinds() {
        let a = step(Action::<i32, String>::err("a".to_string()));
        let b = step(Action::<i32, String>::err("b".to_string()));

        let err = race_steps(&a, &[b]).await.unwrap_err();
        assert_eq!(err.stage, 2);
        assert!(matches!(err.failure, SagaFailure::Failed(_)));
    }
}
