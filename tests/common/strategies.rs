use garment_flow::models::{ProcessStepDefinition, ProcessTemplate};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::BTreeSet;

const MACHINES: [&str; 3] = ["single_needle", "overlock", "flatlock"];

/// Valid step graphs of 1-8 steps: every prerequisite points to a lower step
pub fn template_strategy() -> impl Strategy<Value = ProcessTemplate> {
    (1usize..=8)
        .prop_flat_map(|n| prop::collection::vec(prop::collection::btree_set(0u32..64, 0..3), n))
        .prop_map(|raw| {
            let steps = raw
                .into_iter()
                .enumerate()
                .map(|(idx, picks)| {
                    let step_number = idx as u32 + 1;
                    let prerequisites: BTreeSet<u32> = if step_number == 1 {
                        BTreeSet::new()
                    } else {
                        picks.iter().map(|p| 1 + p % (step_number - 1)).collect()
                    };
                    ProcessStepDefinition::new(
                        step_number,
                        format!("op{step_number}"),
                        MACHINES[idx % MACHINES.len()],
                    )
                    .with_price(0.5)
                    .with_prerequisites(prerequisites)
                })
                .collect();
            ProcessTemplate::new("generated", steps).unwrap()
        })
}

/// Raw step lists whose prerequisites may point anywhere, including forward,
/// at themselves, or at steps that do not exist
pub fn raw_steps_strategy() -> impl Strategy<Value = Vec<ProcessStepDefinition>> {
    (1u32..=6)
        .prop_flat_map(|n| {
            prop::collection::vec(prop::collection::btree_set(0u32..=n + 1, 0..3), n as usize)
        })
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(idx, prerequisites)| {
                    let step_number = idx as u32 + 1;
                    ProcessStepDefinition::new(step_number, format!("op{step_number}"), "overlock")
                        .with_prerequisites(prerequisites)
                })
                .collect()
        })
}

/// Which ready step to pick at each point of a randomized completion run
pub fn completion_choices_strategy() -> impl Strategy<Value = Vec<Index>> {
    prop::collection::vec(any::<Index>(), 8)
}

pub fn pieces_strategy() -> impl Strategy<Value = u32> {
    1u32..=200
}
