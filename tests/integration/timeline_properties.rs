//! Property tests for the timeline store and scope reconstruction

use proptest::prelude::*;
use retrace::protocol::{Diff, ExecutionStep, SequenceId, StepKind};
use retrace::timeline::{derive_scope, ReturnPolicy, TimelineStore};
use serde_json::json;

/// Deterministic step for an id: touches a handful of keys, deletes some, and
/// reports a return value (or an explicit null) every few steps.
fn step(id: SequenceId) -> ExecutionStep {
    let key = format!("k{}", id % 5);
    let globals = if id % 7 == 0 {
        Diff::new().delete(key)
    } else {
        Diff::new().set(key, id)
    };
    let locals = Diff::new().set("i", id);
    let kind = if id % 3 == 0 { StepKind::Return } else { StepKind::Line };
    let mut step = ExecutionStep::new(id, kind)
        .at_line((id % 11) as u32 + 1)
        .in_frame(format!("f{}", id % 2))
        .with_globals(globals)
        .with_locals(locals);
    if id % 3 == 0 {
        step = step.with_return(if id % 2 == 0 { None } else { Some(json!(id)) });
    }
    step
}

fn shuffled_ids() -> impl Strategy<Value = Vec<SequenceId>> {
    (1u64..40).prop_flat_map(|n| Just((1..=n).collect::<Vec<_>>()).prop_shuffle())
}

fn policy() -> impl Strategy<Value = ReturnPolicy> {
    prop_oneof![
        Just(ReturnPolicy::Sticky),
        Just(ReturnPolicy::ExplicitNullClears),
        Just(ReturnPolicy::FrameScoped),
    ]
}

fn ids(store: &TimelineStore) -> Vec<SequenceId> {
    store.iter().map(|s| s.sequence_id).collect()
}

proptest! {
    #[test]
    fn arrival_order_does_not_matter(order in shuffled_ids(), policy in policy()) {
        let mut shuffled = TimelineStore::new(1000, policy);
        for &id in &order {
            shuffled.upsert(step(id));
        }
        let mut sorted_ids = order.clone();
        sorted_ids.sort_unstable();
        let mut ordered = TimelineStore::new(1000, policy);
        for &id in &sorted_ids {
            ordered.upsert(step(id));
        }

        prop_assert_eq!(ids(&shuffled), sorted_ids.clone());
        for &id in &sorted_ids {
            prop_assert_eq!(shuffled.scope_at(id), ordered.scope_at(id));
        }
    }

    #[test]
    fn duplicate_delivery_is_idempotent(order in shuffled_ids()) {
        let mut once = TimelineStore::default();
        let mut twice = TimelineStore::default();
        for &id in &order {
            once.upsert(step(id));
            twice.upsert(step(id));
        }
        for &id in order.iter().rev() {
            twice.upsert(step(id));
        }
        prop_assert_eq!(ids(&once), ids(&twice));
        let last = *order.iter().max().unwrap();
        prop_assert_eq!(once.scope_at(last), twice.scope_at(last));
    }

    #[test]
    fn retention_is_bounded_and_reconstruction_exact(
        count in 1u64..60,
        capacity in 1usize..12,
        policy in policy(),
    ) {
        let all: Vec<_> = (1..=count).map(step).collect();
        let mut store = TimelineStore::new(capacity, policy);
        for s in all.iter().cloned() {
            store.upsert(s);
            prop_assert!(store.len() <= capacity);
        }
        let expected_first = if count > capacity as u64 { count - capacity as u64 + 1 } else { 1 };
        prop_assert_eq!(store.first_id(), Some(expected_first));
        prop_assert_eq!(
            store.scope_at(count),
            derive_scope(&all, Some(all.len() - 1), policy)
        );
    }

    #[test]
    fn reconstruction_is_deterministic(order in shuffled_ids(), policy in policy()) {
        let mut steps: Vec<_> = order.iter().copied().map(step).collect();
        steps.sort_by_key(|s| s.sequence_id);
        let position = Some(steps.len() / 2);
        let a = serde_json::to_vec(&derive_scope(&steps, position, policy)).unwrap();
        let b = serde_json::to_vec(&derive_scope(&steps, position, policy)).unwrap();
        prop_assert_eq!(a, b);
    }
}
