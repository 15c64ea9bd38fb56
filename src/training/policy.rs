use std::sync::Arc;

use rand::Rng;

use crate::error::EngineError;
use crate::training::config::PolicyParams;
use crate::training::params::LiveParams;
use crate::training::store::{cas_update, KeyValueStore, ShardedStore};
use crate::training::types::{AdaptiveAction, Level, PolicyState, Transition, ACTION_COUNT};

pub type QKey = (PolicyState, AdaptiveAction);

/// A Q-table cell. `seq` counts the swaps applied to this key and orders persisted copies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QEntry {
    pub value: f64,
    pub seq: u64,
}

pub fn discretize(knowledge: f64, performance: f64, stress: f64) -> PolicyState {
    PolicyState::new(
        Level::from_value(knowledge),
        Level::from_value(performance),
        Level::from_value(stress),
    )
}

pub struct PolicyEngine {
    store: Arc<dyn KeyValueStore<QKey, QEntry>>,
    params: Arc<LiveParams>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn KeyValueStore<QKey, QEntry>>, params: Arc<LiveParams>) -> Self {
        Self { store, params }
    }

    pub fn in_memory(params: Arc<LiveParams>) -> Self {
        Self::new(Arc::new(ShardedStore::new()), params)
    }

    pub fn q_value(&self, state: &PolicyState, action: &AdaptiveAction) -> f64 {
        self.store
            .get(&(*state, *action))
            .map(|entry| entry.value)
            .unwrap_or(0.0)
    }

    pub fn q_values(&self, state: &PolicyState) -> [f64; ACTION_COUNT] {
        let mut values = [0.0; ACTION_COUNT];
        for action in AdaptiveAction::all() {
            values[action.index()] = self.q_value(state, &action);
        }
        values
    }

    pub fn max_q(&self, state: &PolicyState) -> f64 {
        self.q_values(state)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Greedy choice; ties go to the earliest action in enumeration order.
    pub fn best_action(&self, state: &PolicyState) -> AdaptiveAction {
        let values = self.q_values(state);
        let mut best_idx = 0;
        for (idx, value) in values.iter().enumerate().skip(1) {
            if *value > values[best_idx] {
                best_idx = idx;
            }
        }
        AdaptiveAction::from_index(best_idx).unwrap_or_else(|| first_action())
    }

    pub fn select_action<R: Rng + ?Sized>(
        &self,
        state: &PolicyState,
        epsilon: f64,
        rng: &mut R,
    ) -> AdaptiveAction {
        if epsilon > 0.0 && rng.random::<f64>() < epsilon {
            let idx = rng.random_range(0..ACTION_COUNT);
            return AdaptiveAction::from_index(idx).unwrap_or_else(|| first_action());
        }
        self.best_action(state)
    }

    pub fn get_optimal_action(&self, state: &PolicyState) -> AdaptiveAction {
        let epsilon = self.params.snapshot().policy.epsilon;
        let mut rng = rand::rng();
        self.select_action(state, epsilon, &mut rng)
    }

    pub fn update_q_value(
        &self,
        state: &PolicyState,
        action: &AdaptiveAction,
        next_state: &PolicyState,
        reward: f64,
    ) -> Result<f64, EngineError> {
        let params = self.params.snapshot();
        self.apply_transition(
            &Transition {
                state: *state,
                action: *action,
                next_state: *next_state,
                reward,
            },
            &params.policy,
        )
        .map(|entry| entry.value)
    }

    /// Q(s,a) += alpha * (r + gamma * max Q(s',.) - Q(s,a)), atomic per (s,a).
    /// `max Q(s',.)` is re-read on every swap attempt; with s' == s it covers the updated cell.
    pub fn apply_transition(
        &self,
        transition: &Transition,
        params: &PolicyParams,
    ) -> Result<QEntry, EngineError> {
        if !transition.reward.is_finite() {
            return Err(EngineError::StateConsistency(
                "non-finite reward in transition".to_string(),
            ));
        }

        let key = (transition.state, transition.action);
        let updated = cas_update(self.store.as_ref(), &key, |current| {
            let (q, seq) = current.map(|e| (e.value, e.seq)).unwrap_or((0.0, 0));
            let next_max = self.max_q(&transition.next_state);
            let next = q + params.alpha * (transition.reward + params.gamma * next_max - q);
            next.is_finite().then_some(QEntry {
                value: next,
                seq: seq + 1,
            })
        });

        match updated {
            Some(entry) => {
                tracing::trace!(
                    state = %transition.state.key(),
                    action = %transition.action.key(),
                    reward = transition.reward,
                    seq = entry.seq,
                    "q value updated"
                );
                Ok(entry)
            }
            None => Err(EngineError::StateConsistency(format!(
                "q update for {} would leave a non-finite value",
                transition.state.key()
            ))),
        }
    }

    pub fn entries(&self) -> Vec<(QKey, f64)> {
        self.store
            .snapshot()
            .into_iter()
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }
}

fn first_action() -> AdaptiveAction {
    use crate::training::types::{ContentType, DifficultyDelta, SupportLevel};
    AdaptiveAction::new(
        DifficultyDelta::Decrease,
        ContentType::Theory,
        SupportLevel::Guided,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn engine(policy: PolicyParams) -> PolicyEngine {
        let params = Arc::new(LiveParams::new(Default::default(), policy));
        PolicyEngine::in_memory(params)
    }

    fn greedy() -> PolicyParams {
        PolicyParams {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.0,
        }
    }

    #[test]
    fn discretize_maps_each_value_to_one_bucket() {
        let state = discretize(0.1, 0.5, 0.9);
        assert_eq!(state.knowledge, Level::Low);
        assert_eq!(state.performance, Level::Medium);
        assert_eq!(state.stress, Level::High);
    }

    #[test]
    fn unseen_state_picks_first_action() {
        let policy = engine(greedy());
        let state = discretize(0.5, 0.5, 0.5);
        assert_eq!(policy.get_optimal_action(&state), first_action());
    }

    #[test]
    fn update_follows_q_learning_rule() {
        let policy = engine(greedy());
        let s = discretize(0.5, 0.5, 0.5);
        let s2 = discretize(0.9, 0.9, 0.1);
        let a = AdaptiveAction::from_index(4).unwrap();
        let b = AdaptiveAction::from_index(7).unwrap();

        policy.update_q_value(&s2, &b, &s2, 1.0).unwrap();
        let next_max = policy.max_q(&s2);
        assert!((next_max - 0.1).abs() < 1e-12);

        let q = policy.update_q_value(&s, &a, &s2, 0.5).unwrap();
        let expected = 0.1 * (0.5 + 0.9 * next_max);
        assert!((q - expected).abs() < 1e-12);
        assert_eq!(policy.best_action(&s), a);
    }

    #[test]
    fn non_finite_reward_is_rejected_without_mutation() {
        let policy = engine(greedy());
        let s = discretize(0.5, 0.5, 0.5);
        let a = AdaptiveAction::from_index(3).unwrap();
        let err = policy.update_q_value(&s, &a, &s, f64::NAN).unwrap_err();
        assert_eq!(err.kind(), "state_consistency");
        assert!(policy.entries().is_empty());
    }

    /// Commits a competing update to `key` just before the first swap attempt lands.
    struct InterleavingStore {
        inner: ShardedStore<QKey, QEntry>,
        key: QKey,
        competing: QEntry,
        fired: std::sync::atomic::AtomicBool,
    }

    impl KeyValueStore<QKey, QEntry> for InterleavingStore {
        fn get(&self, key: &QKey) -> Option<QEntry> {
            self.inner.get(key)
        }

        fn compare_and_swap(
            &self,
            key: &QKey,
            expected: Option<&QEntry>,
            new: QEntry,
        ) -> Result<(), Option<QEntry>> {
            if *key == self.key && !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner
                    .compare_and_swap(key, None, self.competing)
                    .unwrap();
            }
            self.inner.compare_and_swap(key, expected, new)
        }

        fn snapshot(&self) -> Vec<(QKey, QEntry)> {
            self.inner.snapshot()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn retry_rereads_next_state_maximum_on_self_transition() {
        let s = discretize(0.5, 0.5, 0.5);
        let a = AdaptiveAction::from_index(5).unwrap();
        let params = PolicyParams {
            alpha: 0.5,
            gamma: 0.9,
            epsilon: 0.0,
        };
        // The competing writer applied the same transition to an empty cell: 0.5 * 1.0.
        let store = Arc::new(InterleavingStore {
            inner: ShardedStore::new(),
            key: (s, a),
            competing: QEntry { value: 0.5, seq: 1 },
            fired: std::sync::atomic::AtomicBool::new(false),
        });
        let policy = PolicyEngine::new(store, Arc::new(LiveParams::new(Default::default(), params)));

        let entry = policy
            .apply_transition(
                &Transition {
                    state: s,
                    action: a,
                    next_state: s,
                    reward: 1.0,
                },
                &params,
            )
            .unwrap();

        // Either serial order of the two updates: 0.5 + 0.5 * (1 + 0.9 * 0.5 - 0.5).
        assert!((entry.value - 0.975).abs() < 1e-12, "got {}", entry.value);
        assert_eq!(entry.seq, 2);
    }

    #[test]
    fn exploration_draws_from_whole_action_space() {
        let policy = engine(greedy());
        let s = discretize(0.5, 0.5, 0.5);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2000 {
            seen.insert(policy.select_action(&s, 1.0, &mut rng).index());
        }
        assert_eq!(seen.len(), ACTION_COUNT);
    }

    #[test]
    fn converges_to_best_action_in_stationary_environment() {
        let policy = engine(PolicyParams {
            alpha: 0.5,
            gamma: 0.5,
            epsilon: 0.0,
        });
        let states = PolicyState::all();
        let best_for = |state: &PolicyState| {
            AdaptiveAction::from_index(
                (state.knowledge.index() * 9 + state.performance.index() * 3 + state.stress.index())
                    % ACTION_COUNT,
            )
            .unwrap()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);

        for _ in 0..200 {
            for state in &states {
                for action in AdaptiveAction::all() {
                    let reward = if action == best_for(state) { 1.0 } else { 0.0 };
                    let next = states[rng.random_range(0..states.len())];
                    policy.update_q_value(state, &action, &next, reward).unwrap();
                }
            }
        }

        for state in &states {
            assert_eq!(policy.get_optimal_action(state), best_for(state));
        }
    }
}
