use criterion::{black_box, criterion_group, criterion_main, Criterion};
use garment_flow::{
    Bundle, BundleFactory, CuttingOutput, EventPublisher, InMemoryWorkStore, OperatorInfo,
    ProcessStepDefinition, ProcessTemplate, ProcessTemplateRegistry, StepDependencyResolver,
    StepEvent, WorkAssignment, WorkClaimCoordinator, WorkStore,
};
use garment_flow::state_machine::StepStateMachine;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn polo() -> ProcessTemplate {
    ProcessTemplate::new(
        "polo",
        vec![
            ProcessStepDefinition::new(1, "Collar", "single_needle").parallel(),
            ProcessStepDefinition::new(2, "Placket", "single_needle").parallel(),
            ProcessStepDefinition::new(3, "ShoulderJoin", "overlock").with_prerequisites([1, 2]),
        ],
    )
    .unwrap()
}

fn wide_template(width: u32) -> ProcessTemplate {
    let mut steps: Vec<_> = (1..=width)
        .map(|n| ProcessStepDefinition::new(n, format!("op{n}"), "single_needle"))
        .collect();
    steps.push(
        ProcessStepDefinition::new(width + 1, "Join", "overlock").with_prerequisites(1..=width),
    );
    ProcessTemplate::new("wide", steps).unwrap()
}

fn setup(rt: &Runtime, rows: u32) -> (WorkClaimCoordinator, Vec<Bundle>) {
    let store: Arc<dyn WorkStore> = Arc::new(InMemoryWorkStore::new());
    let registry = Arc::new(ProcessTemplateRegistry::new());
    registry.register(polo()).unwrap();
    let factory = BundleFactory::new(store.clone(), registry);
    let output = (0..rows).fold(CuttingOutput::new("BENCH", "ART", "polo"), |o, i| {
        o.with_row("RED", format!("S{i}"), 50)
    });
    let bundles = rt.block_on(factory.create_bundles(&output)).unwrap();
    (WorkClaimCoordinator::new(store, EventPublisher::default()), bundles)
}

fn benchmark_claim_and_complete(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let operator = OperatorInfo::new("bench", "Bench").with_machine("single_needle");

    c.bench_function("claim_and_complete", |b| {
        b.iter_batched(
            || setup(&rt, 1),
            |(coordinator, bundles)| {
                rt.block_on(async {
                    let bundle_id = &bundles[0].bundle_id;
                    coordinator.claim(bundle_id, 1, &operator).await.unwrap();
                    black_box(
                        coordinator
                            .complete_pieces(bundle_id, 1, "bench", 50)
                            .await
                            .unwrap(),
                    );
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn benchmark_list_available_work(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (coordinator, _) = setup(&rt, 200);

    c.bench_function("list_available_work_200_bundles", |b| {
        b.iter(|| {
            rt.block_on(async {
                let units = coordinator
                    .list_available_work(["single_needle"])
                    .await
                    .unwrap()
                    .count();
                black_box(units)
            })
        })
    });
}

fn benchmark_dependency_resolution(c: &mut Criterion) {
    let template = wide_template(32);
    let mut bundle = Bundle::from_template(&template, "BENCH", "ART", "RED", "M", 1, 1);
    for n in 1..=32 {
        let assignment = WorkAssignment::new(bundle.bundle_id.clone(), n, "bench", "Bench");
        StepStateMachine::transition(&mut bundle, n, StepEvent::Claim(assignment)).unwrap();
        if let Some(step) = bundle.step_mut(n) {
            step.completed_pieces = 1;
        }
    }
    for n in 1..32 {
        StepDependencyResolver::on_step_completed(&mut bundle, n).unwrap();
    }

    c.bench_function("resolve_wide_join", |b| {
        b.iter_batched(
            || bundle.clone(),
            |mut bundle| black_box(StepDependencyResolver::on_step_completed(&mut bundle, 32)),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    benchmark_claim_and_complete,
    benchmark_list_available_work,
    benchmark_dependency_resolution
);
criterion_main!(benches);
