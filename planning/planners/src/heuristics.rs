//! Reward estimators for leaf states of the search.
//!
//! The default estimator is a temporal relaxed planning graph: delete
//! effects are ignored, durations become delays, and the estimate is the
//! discounted goal reward at the relaxed goal makespan. A random-rollout
//! estimator is kept for the pre-heuristic search mode.

use crate::mdp::Mdp;
use crate::{DEAD_END_PENALTY, GOAL_REWARD};
use rand::Rng;
use taurus::collections::ref_store::RefStore;
use taurus::{IntCst, INT_CST_MAX};
use taurus_planning::actions::{AId, ActionKind, Actions};
use taurus_planning::state::{Lit, State, SvId};

/// Estimate of the reward attainable from a state, given the time the plan
/// has already consumed.
pub trait Estimator<M: Mdp> {
    fn estimate(&mut self, mdp: &mut M, state: &M::State, clock: IntCst) -> f64;
}

/// Delay between the moment an action becomes applicable and the moment its
/// effects hold: the paired duration for the end half of a durative action
/// (its completion comes that long after its start), the full duration for
/// an unlowered durative action, and zero otherwise.
fn delay(actions: &Actions, a: AId) -> IntCst {
    match actions[a].kind {
        ActionKind::DurativeEnd { .. } | ActionKind::Durative { .. } => actions[a].duration(actions),
        _ => 0,
    }
}

/// Temporal relaxed planning graph.
///
/// Computes, for every literal, the earliest relative time at which it can
/// be made true when delete effects are ignored; the time of an action is
/// the max over its precondition times, and its effects appear after its
/// delay. The estimate is `discount^m · goal-reward` for the goal makespan
/// `m`, or the dead-end penalty when some goal is unreachable or the
/// makespan overruns the deadline.
pub struct TrpgEstimator;

impl TrpgEstimator {
    /// Relative time at which the last goal first appears, or `None` when
    /// some goal is unreachable in the relaxation.
    pub fn goal_makespan(actions: &Actions, goals: &[SvId], state: &State, num_atoms: usize) -> Option<IntCst> {
        let mut op_time: RefStore<AId, IntCst> = RefStore::initialized(actions.len(), INT_CST_MAX);
        let mut update: RefStore<AId, bool> = RefStore::initialized(actions.len(), false);
        let mut effects: RefStore<AId, Vec<Lit>> = RefStore::new();
        for a in actions.iter() {
            effects.push(actions[a].possible_effects());
            if actions[a].pos_pre.is_empty() && actions[a].neg_pre.is_empty() {
                update[a] = true;
            }
        }

        let mut lit_time: RefStore<Lit, IntCst> = RefStore::initialized(num_atoms * 2, INT_CST_MAX);
        for i in 0..num_atoms {
            let sv = SvId::from(i);
            let lit = Lit::new(sv, state.contains(sv));
            lit_time[lit] = 0;
            for &a in actions.dependent_on(lit) {
                update[a] = true;
            }
        }

        let mut again = true;
        while again {
            again = false;
            for a in actions.iter() {
                if !update[a] {
                    continue;
                }
                update[a] = false;
                let mut t = 0;
                let mut reachable = true;
                for lit in actions[a].preconditions() {
                    let lt = lit_time[lit];
                    if lt >= INT_CST_MAX {
                        reachable = false;
                        break;
                    }
                    t = t.max(lt);
                }
                if !reachable || t >= op_time[a] {
                    continue;
                }
                op_time[a] = t;
                let eff_time = t + delay(actions, a);
                for &lit in &effects[a] {
                    if eff_time < lit_time[lit] {
                        lit_time[lit] = eff_time;
                        for &dep in actions.dependent_on(lit) {
                            again = true;
                            update[dep] = true;
                        }
                    }
                }
            }
        }

        let mut makespan = 0;
        for &goal in goals {
            let t = lit_time[Lit::new(goal, true)];
            if t >= INT_CST_MAX {
                return None;
            }
            makespan = makespan.max(t);
        }
        Some(makespan)
    }
}

impl<M: Mdp> Estimator<M> for TrpgEstimator {
    fn estimate(&mut self, mdp: &mut M, state: &M::State, clock: IntCst) -> f64 {
        let flat = mdp.flat(state);
        let num_atoms = mdp.problem().world.num_atoms();
        match Self::goal_makespan(mdp.actions(), mdp.goals(), flat, num_atoms) {
            None => DEAD_END_PENALTY,
            Some(m) if clock + m > mdp.deadline() => DEAD_END_PENALTY,
            Some(m) => mdp.discount().powi(m) * GOAL_REWARD,
        }
    }
}

/// Depth-bounded random rollout: repeatedly applies a uniformly random legal
/// action and accumulates the discounted rewards, keeping a coarse clock
/// from the durations of the start actions it traverses.
pub struct RolloutEstimator {
    pub depth: u32,
}

impl<M: Mdp> Estimator<M> for RolloutEstimator {
    fn estimate(&mut self, mdp: &mut M, state: &M::State, clock: IntCst) -> f64 {
        let deadline = mdp.deadline();
        let mut cumulative = 0.0;
        let mut depth = 0;
        let mut time = clock;
        let mut pending_end: Option<AId> = None;
        let mut state = state.clone();

        while depth < self.depth {
            if time > deadline {
                break;
            }
            let legal = mdp.legal_actions(&state);
            if legal.is_empty() {
                break;
            }
            let action = legal[mdp.rng().random_range(0..legal.len())];
            if let ActionKind::DurativeStart { duration, end } = &mdp.actions()[action].kind {
                if pending_end.is_none() {
                    time += *duration;
                    pending_end = Some(*end);
                }
            }
            if pending_end == Some(action) {
                pending_end = None;
            }
            let step = mdp.step(&state, action);
            cumulative += mdp.discount().powi(depth as i32) * step.reward;
            depth += 1;
            if step.terminal {
                break;
            }
            time = time.max(mdp.clock(&step.state));
            state = step.state;
        }
        cumulative
    }
}
