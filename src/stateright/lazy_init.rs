//! Stateright Model for Lazy Client Initialization
//!
//! Exhaustively verifies the double-checked construction protocol of
//! `LazyClient` over every interleaving of concurrent first callers:
//! - SINGLE_CONSTRUCTION: the client is constructed at most once
//! - SAME_INSTANCE: every caller observes the instance that was constructed
//! - ALL_SERVED: some interleaving ends with every caller holding a client

use stateright::{Model, Property};

/// Program counter of one caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pc {
    /// Lock-free read of the cached client
    FastCheck,
    /// Waiting for the construction lock
    Acquire,
    /// Re-reading the cache under the lock
    Recheck,
    /// Building a new client under the lock
    Construct,
    /// Releasing the lock
    Release,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LazyInitState {
    pub pcs: Vec<Pc>,
    pub lock_holder: Option<usize>,
    /// Id of the cached client
    pub client: Option<u32>,
    pub constructions: u32,
    /// Client id each caller returned with
    pub observed: Vec<Option<u32>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LazyInitAction {
    Step(usize),
}

pub struct LazyInitModel {
    pub callers: usize,
    /// Model the broken variant that skips the re-check under the lock
    pub skip_recheck: bool,
}

impl LazyInitModel {
    pub fn new(callers: usize) -> Self {
        LazyInitModel {
            callers,
            skip_recheck: false,
        }
    }
}

impl Model for LazyInitModel {
    type State = LazyInitState;
    type Action = LazyInitAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![LazyInitState {
            pcs: vec![Pc::FastCheck; self.callers],
            lock_holder: None,
            client: None,
            constructions: 0,
            observed: vec![None; self.callers],
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, pc) in state.pcs.iter().enumerate() {
            match pc {
                Pc::Done => {}
                Pc::Acquire if state.lock_holder.is_some() => {}
                _ => actions.push(LazyInitAction::Step(i)),
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let LazyInitAction::Step(i) = action;
        let mut next = state.clone();

        match state.pcs[i] {
            Pc::FastCheck => match state.client {
                Some(id) => {
                    next.observed[i] = Some(id);
                    next.pcs[i] = Pc::Done;
                }
                None => next.pcs[i] = Pc::Acquire,
            },
            Pc::Acquire => {
                if state.lock_holder.is_some() {
                    return None;
                }
                next.lock_holder = Some(i);
                next.pcs[i] = if self.skip_recheck {
                    Pc::Construct
                } else {
                    Pc::Recheck
                };
            }
            Pc::Recheck => match state.client {
                Some(id) => {
                    next.observed[i] = Some(id);
                    next.pcs[i] = Pc::Release;
                }
                None => next.pcs[i] = Pc::Construct,
            },
            Pc::Construct => {
                next.constructions += 1;
                let id = next.constructions;
                next.client = Some(id);
                next.observed[i] = Some(id);
                next.pcs[i] = Pc::Release;
            }
            Pc::Release => {
                next.lock_holder = None;
                next.pcs[i] = Pc::Done;
            }
            Pc::Done => return None,
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("single_construction", single_construction),
            Property::always("same_instance", same_instance),
            Property::sometimes("all_served", all_served),
        ]
    }
}

fn single_construction(_model: &LazyInitModel, state: &LazyInitState) -> bool {
    state.constructions <= 1
}

fn same_instance(_model: &LazyInitModel, state: &LazyInitState) -> bool {
    state
        .observed
        .iter()
        .flatten()
        .all(|id| Some(*id) == state.client)
}

fn all_served(_model: &LazyInitModel, state: &LazyInitState) -> bool {
    state.pcs.iter().all(|pc| *pc == Pc::Done) && state.observed.iter().all(|o| o.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn test_second_caller_reuses_client() {
        let model = LazyInitModel::new(2);
        let mut state = model.init_states().remove(0);

        for action in [0, 1, 0, 0, 0, 0, 1, 1, 1] {
            let step = LazyInitAction::Step(action);
            state = model.next_state(&state, step).unwrap();
        }
        assert_eq!(state.constructions, 1);
        assert_eq!(state.observed, vec![Some(1), Some(1)]);
        assert!(state.pcs.iter().all(|pc| *pc == Pc::Done));
    }

    #[test]
    fn test_lock_blocks_second_acquire() {
        let model = LazyInitModel::new(2);
        let mut state = model.init_states().remove(0);
        state = model.next_state(&state, LazyInitAction::Step(0)).unwrap();
        state = model.next_state(&state, LazyInitAction::Step(1)).unwrap();
        state = model.next_state(&state, LazyInitAction::Step(0)).unwrap();

        let mut actions = Vec::new();
        model.actions(&state, &mut actions);
        assert_eq!(actions, vec![LazyInitAction::Step(0)]);
    }

    #[test]
    fn stateright_lazy_init_model_check() {
        let checker = LazyInitModel::new(3).checker().spawn_bfs().join();
        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
    }

    #[test]
    fn stateright_lazy_init_without_recheck_double_constructs() {
        let model = LazyInitModel {
            callers: 2,
            skip_recheck: true,
        };
        let checker = model.checker().spawn_bfs().join();
        assert!(checker.discovery("single_construction").is_some());
    }
}
