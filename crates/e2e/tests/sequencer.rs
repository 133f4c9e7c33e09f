//! Ordering, carried state, deadlines and cleanup of a single group

use platform_e2e::assertions::ensure_eq;
use platform_e2e::report::{GroupOutcome, StepStatus};
use platform_e2e::{
    CarriedState, E2eError, ErrorKind, Sequencer, SequencerConfig, Step, StepContext, StepFuture, WorkflowGroup,
};
use platform_e2e_common::Configuration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn ctx() -> StepContext {
    StepContext::new("group", 0, Arc::new(Configuration::from_pairs("test", [("PROJECT_REF", "abc")]).unwrap()))
}

fn sequencer() -> Sequencer {
    Sequencer::new(SequencerConfig::default(), CancellationToken::new())
}

fn pass<'a>(_ctx: &'a StepContext, _state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async { Ok(()) })
}

fn mismatch<'a>(_ctx: &'a StepContext, _state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async { ensure_eq(3, 4) })
}

fn sleep_10s<'a>(_ctx: &'a StepContext, _state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    })
}

/// Group whose finalizer bumps the returned counter
fn counted(group: WorkflowGroup) -> (WorkflowGroup, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let group = group.finally(move |_ctx, _state| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    (group, calls)
}

#[tokio::test]
async fn failure_stops_the_group_and_cleanup_runs_once() {
    let (group, finalized) = counted(
        WorkflowGroup::new("five")
            .step(Step::new("one", pass))
            .step(Step::new("two", pass))
            .step(Step::new("three", mismatch))
            .step(Step::new("four", pass))
            .step(Step::new("five", pass)),
    );

    let report = sequencer().run(&group, &ctx()).await;

    let statuses: Vec<&StepStatus> = report.steps.iter().map(|s| &s.status).collect();
    assert_eq!(statuses[0], &StepStatus::Passed);
    assert_eq!(statuses[1], &StepStatus::Passed);
    assert!(matches!(statuses[2], StepStatus::Failed { kind: ErrorKind::AssertionMismatch, .. }));
    assert_eq!(statuses[3], &StepStatus::NotRun);
    assert_eq!(statuses[4], &StepStatus::NotRun);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);

    match report.outcome {
        GroupOutcome::Failed { step, kind, message } => {
            assert_eq!(step, "three");
            assert_eq!(kind, ErrorKind::AssertionMismatch);
            assert!(message.contains("expected 4, got 3"), "{message}");
            assert!(message.contains("sequencer.rs"), "location missing: {message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn carried_state_flows_forward() {
    let group = WorkflowGroup::new("carry")
        .step(Step::new("write", |_ctx, state| {
            Box::pin(async move {
                state.set("restore_point", "rp_1")?;
                state.set("captured_at", 1_700_000_000_i64)
            })
        }))
        .step(Step::new("read", |_ctx, state| {
            Box::pin(async move {
                ensure_eq(state.get_str("restore_point")?, "rp_1")?;
                ensure_eq(state.get::<i64>("captured_at")?, 1_700_000_000)
            })
        }));

    let report = sequencer().run(&group, &ctx()).await;
    assert!(report.is_passed(), "{:?}", report.outcome);
}

#[tokio::test]
async fn state_from_an_excluded_step_is_a_loud_failure() {
    let group = WorkflowGroup::new("excluded-producer")
        .step(
            Step::new("capture checkpoint", |_ctx, state| {
                Box::pin(async move { state.set("checkpoint", "cp") })
            })
            .excluded("checkpoints are not yet stable"),
        )
        .step(Step::new("use checkpoint", |_ctx, state| {
            Box::pin(async move {
                state.get_str("checkpoint")?;
                Ok(())
            })
        }));

    let report = sequencer().run(&group, &ctx()).await;

    assert!(matches!(report.steps[0].status, StepStatus::Excluded { .. }));
    match report.outcome {
        GroupOutcome::Failed { step, kind, message } => {
            assert_eq!(step, "use checkpoint");
            assert_eq!(kind, ErrorKind::MissingState);
            assert!(message.contains("checkpoint"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cleanup_failure_keeps_the_outcome() {
    let group = WorkflowGroup::new("dirty")
        .step(Step::new("only", pass))
        .finally(|_ctx, _state| Box::pin(async { Err(E2eError::Playwright("browser already closed".to_string())) }));

    let report = sequencer().run(&group, &ctx()).await;

    assert!(report.is_passed());
    assert!(report.cleanup_error.unwrap().contains("browser already closed"));
}

#[tokio::test]
async fn panicking_step_fails_only_its_group() {
    let (group, finalized) = counted(WorkflowGroup::new("panics").step(Step::new("boom", |_ctx, _state| {
        Box::pin(async {
            let values: Vec<u32> = Vec::new();
            if values.is_empty() {
                panic!("no values");
            }
            Ok(())
        })
    })));

    let report = sequencer().run(&group, &ctx()).await;

    assert!(report.is_failed());
    assert!(matches!(
        &report.steps[0].status,
        StepStatus::Failed { kind: ErrorKind::Harness, message } if message.contains("no values")
    ));
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn step_deadline_is_a_timeout() {
    let (group, finalized) = counted(
        WorkflowGroup::new("slow")
            .step(Step::new("wait", sleep_10s).with_timeout(Duration::from_secs(1)))
            .step(Step::new("after", pass)),
    );

    let report = sequencer().run(&group, &ctx()).await;

    match &report.outcome {
        GroupOutcome::Failed { step, kind, message } => {
            assert_eq!(step, "wait");
            assert_eq!(*kind, ErrorKind::Timeout);
            assert!(message.contains("step 'wait'"), "{message}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(report.steps[1].status, StepStatus::NotRun);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn group_deadline_bounds_later_steps() {
    let config = SequencerConfig {
        step_timeout: Duration::from_secs(60),
        group_timeout: Duration::from_secs(15),
        finalizer_timeout: Duration::from_secs(5),
    };
    let group = WorkflowGroup::new("budget")
        .step(Step::new("first", sleep_10s))
        .step(Step::new("second", sleep_10s));

    let report = Sequencer::new(config, CancellationToken::new()).run(&group, &ctx()).await;

    assert_eq!(report.steps[0].status, StepStatus::Passed);
    match &report.outcome {
        GroupOutcome::Failed { step, kind, message } => {
            assert_eq!(step, "second");
            assert_eq!(*kind, ErrorKind::Timeout);
            assert!(message.contains("group 'budget'"), "{message}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_still_runs_cleanup() {
    let cancel = CancellationToken::new();
    let (group, finalized) = counted(
        WorkflowGroup::new("cancelled")
            .step(Step::new("long", sleep_10s))
            .step(Step::new("never", pass)),
    );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let report = Sequencer::new(SequencerConfig::default(), cancel).run(&group, &ctx()).await;

    assert!(matches!(
        report.outcome,
        GroupOutcome::Failed {
            kind: ErrorKind::Cancelled,
            ..
        }
    ));
    assert_eq!(report.steps[1].status, StepStatus::NotRun);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_instances_keep_separate_state() {
    let group = WorkflowGroup::new("isolated")
        .step(Step::new("claim", |ctx, state| {
            Box::pin(async move { state.set("owner", ctx.unique_name("owner")) })
        }))
        .step(Step::new("yield", |_ctx, _state| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
        }))
        .step(Step::new("verify", |ctx, state| {
            Box::pin(async move {
                ensure_eq(state.get::<String>("owner")?, ctx.unique_name("owner"))?;
                ensure_eq(state.len(), 1)
            })
        }));

    let seq = sequencer();
    let (a, b) = (ctx(), ctx());
    let (first, second) = tokio::join!(seq.run(&group, &a), seq.run(&group, &b));

    assert!(first.is_passed(), "{:?}", first.outcome);
    assert!(second.is_passed(), "{:?}", second.outcome);
}
