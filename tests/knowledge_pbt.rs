//! Property-Based Tests for knowledge tracing and the Q update
//!
//! Invariants:
//! - Mastery stays in [0, 1] for any answer sequence and any parameter set
//! - Q-values stay finite for rewards in [0, 1]
//! - Discretization always lands in exactly one bucket

use std::sync::Arc;

use proptest::prelude::*;

use adaptive_training_engine::training::config::{BktParams, PolicyParams};
use adaptive_training_engine::training::knowledge::{bkt_step, KnowledgeTracker};
use adaptive_training_engine::training::policy::{discretize, PolicyEngine};
use adaptive_training_engine::training::types::{AdaptiveAction, Level, PolicyState, ACTION_COUNT};
use adaptive_training_engine::training::LiveParams;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_unit() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_bkt_params() -> impl Strategy<Value = BktParams> {
    (arb_unit(), arb_unit(), arb_unit(), arb_unit()).prop_map(
        |(p_learn, p_slip, p_guess, p_forget)| BktParams {
            p_learn,
            p_slip,
            p_guess,
            p_forget,
        },
    )
}

fn arb_state() -> impl Strategy<Value = PolicyState> {
    (0usize..27).prop_map(|i| PolicyState::all()[i])
}

fn arb_action() -> impl Strategy<Value = AdaptiveAction> {
    (0usize..ACTION_COUNT).prop_map(|i| AdaptiveAction::from_index(i).unwrap())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn mastery_stays_in_unit_interval(
        params in arb_bkt_params(),
        answers in prop::collection::vec(any::<bool>(), 1..60),
    ) {
        let live = Arc::new(LiveParams::new(params, PolicyParams::default()));
        let tracker = KnowledgeTracker::in_memory(live);
        for correct in answers {
            let m = tracker
                .update_knowledge_state("learner", "PATIENT_ASSESSMENT", correct)
                .unwrap();
            prop_assert!((0.0..=1.0).contains(&m));
        }
    }

    #[test]
    fn bkt_step_handles_any_prior(
        prior in -2.0f64..3.0,
        correct in any::<bool>(),
        params in arb_bkt_params(),
    ) {
        let next = bkt_step(prior, correct, &params);
        prop_assert!(next.is_finite());
        prop_assert!((0.0..=1.0).contains(&next));
    }

    #[test]
    fn q_values_stay_finite(
        updates in prop::collection::vec((arb_state(), arb_action(), arb_state(), arb_unit()), 1..200),
    ) {
        let policy = PolicyEngine::in_memory(Arc::new(LiveParams::default()));
        for (s, a, s2, r) in updates {
            let q = policy.update_q_value(&s, &a, &s2, r).unwrap();
            prop_assert!(q.is_finite());
        }
        prop_assert!(policy.entries().iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn discretization_is_total(k in any::<f64>(), p in any::<f64>(), s in any::<f64>()) {
        let state = discretize(k, p, s);
        prop_assert!(Level::from_index(state.knowledge.index()).is_some());
        prop_assert!(PolicyState::all().contains(&state));
    }
}
