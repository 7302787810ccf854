//! Dependency unlocking through the coordinator, including racing completions.

mod common;

use common::strategies::{completion_choices_strategy, pieces_strategy, template_strategy};
use common::{all_round_operator, drain, names, Harness};
use garment_flow::orchestration::ProgressAggregator;
use garment_flow::state_machine::StepStatus;
use garment_flow::Bundle;
use proptest::prelude::*;

fn assert_readiness_consistent(bundle: &Bundle) {
    for step in &bundle.steps {
        let met = bundle.prerequisites_met(step.step_number());
        match step.status {
            StepStatus::Waiting => assert!(
                !met,
                "step {} is waiting with all prerequisites completed",
                step.step_number()
            ),
            StepStatus::Ready | StepStatus::InProgress | StepStatus::Completed => assert!(
                met,
                "step {} is {} before its prerequisites completed",
                step.step_number(),
                step.status
            ),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_parents_completing_together_unlock_the_join() {
    for run in 0..100 {
        let harness = Harness::new();
        let bundle_id = harness.polo_bundle(&format!("LOT-J{run}"), 20).await;
        let coordinator = &harness.coordinator;
        coordinator
            .claim(&bundle_id, 1, &all_round_operator("op-a"))
            .await
            .unwrap();
        coordinator
            .claim(&bundle_id, 2, &all_round_operator("op-b"))
            .await
            .unwrap();

        let complete = |step_number: u32, operator_id: &'static str| {
            let coordinator = harness.coordinator.clone();
            let bundle_id = bundle_id.clone();
            tokio::spawn(async move {
                coordinator
                    .complete_pieces(&bundle_id, step_number, operator_id, 20)
                    .await
            })
        };
        let first = complete(1, "op-a");
        let second = complete(2, "op-b");
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert!(first.step_completed && second.step_completed);
        // exactly one of the two completions saw the other and unlocked the join
        let unlocked: Vec<u32> = first
            .unlocked_steps
            .iter()
            .chain(&second.unlocked_steps)
            .copied()
            .collect();
        assert_eq!(unlocked, vec![3], "run {run}");

        let bundle = harness.snapshot(&bundle_id).await;
        assert_eq!(bundle.step_status(3), Some(StepStatus::Ready), "run {run}");
    }
}

#[tokio::test]
async fn test_linear_chain_unlocks_one_step_at_a_time() {
    let harness = Harness::new();
    let tee = harness.registry.get_template("tee").unwrap();
    let bundle_id = harness.bundle_from(&tee, 12).await;

    let bundle = harness.snapshot(&bundle_id).await;
    assert_eq!(bundle.step_status(1), Some(StepStatus::Ready));
    assert_eq!(bundle.step_status(2), Some(StepStatus::Waiting));
    assert_eq!(bundle.step_status(3), Some(StepStatus::Waiting));

    harness.finish_step(&bundle_id, 1, "op-1").await;
    let bundle = harness.snapshot(&bundle_id).await;
    assert_eq!(bundle.step_status(2), Some(StepStatus::Ready));
    assert_eq!(bundle.step_status(3), Some(StepStatus::Waiting));

    let err = harness
        .coordinator
        .claim(&bundle_id, 3, &all_round_operator("op-2"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_partial_progress_does_not_unlock_dependents() {
    let harness = Harness::new();
    let bundle_id = harness.polo_bundle("LOT-PARTIAL", 30).await;
    harness.finish_step(&bundle_id, 1, "op-a").await;

    let op = all_round_operator("op-b");
    harness.coordinator.claim(&bundle_id, 2, &op).await.unwrap();
    let outcome = harness
        .coordinator
        .complete_pieces(&bundle_id, 2, "op-b", 29)
        .await
        .unwrap();

    assert!(!outcome.step_completed);
    assert!(outcome.unlocked_steps.is_empty());
    assert_eq!(
        harness.snapshot(&bundle_id).await.step_status(3),
        Some(StepStatus::Waiting)
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_completing_ready_steps_keeps_readiness_consistent(
        template in template_strategy(),
        pieces in pieces_strategy(),
        choices in completion_choices_strategy(),
    ) {
        tokio_test::block_on(async {
            let harness = Harness::new();
            let bundle_id = harness.bundle_from(&template, pieces).await;
            let mut events = harness.coordinator.subscribe();

            let mut bundle = harness.snapshot(&bundle_id).await;
            assert_readiness_consistent(&bundle);
            let mut last_progress = ProgressAggregator::bundle_progress(&bundle);

            for choice in choices.iter().cycle().take(template.step_count()) {
                let ready: Vec<u32> = bundle.claimable_steps().map(|s| s.step_number()).collect();
                assert!(!ready.is_empty(), "unfinished bundle with nothing claimable");
                let step_number = ready[choice.index(ready.len())];

                harness.finish_step(&bundle_id, step_number, "op-prop").await;

                bundle = harness.snapshot(&bundle_id).await;
                assert_readiness_consistent(&bundle);
                assert_eq!(bundle.step_status(step_number), Some(StepStatus::Completed));

                let progress = ProgressAggregator::bundle_progress(&bundle);
                assert!(progress >= last_progress);
                last_progress = progress;
            }

            assert!(bundle.is_complete());
            assert!((last_progress - 1.0).abs() < f64::EPSILON);

            let published = drain(&mut events);
            let names = names(&published);
            assert_eq!(names.last(), Some(&"bundle.completed"));
            assert_eq!(names.iter().filter(|n| **n == "bundle.completed").count(), 1);
            assert_eq!(
                names.iter().filter(|n| **n == "step.completed").count(),
                template.step_count()
            );
        });
    }
}
