//! Outer planning loop: search, commit one action, extend the temporal
//! network, repeat until the goals hold or the deadline is provably missed.

use crate::heuristics::{Estimator, RolloutEstimator, TrpgEstimator};
use crate::mdp::Mdp;
use crate::search::node::{SnId, Tree};
use crate::search::{Mcts, SearchParams, SelectionKind};
use crate::stn::{Stn, Timepoint};
use anyhow::{ensure, Result};
use std::time::Duration;
use taurus::IntCst;
use taurus_planning::actions::{AId, ActionKind};

/// Leaf estimator plugged into the search.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EstimatorKind {
    /// Temporal relaxed planning graph (the default).
    Trpg,
    /// Random rollouts, as in the pre-heuristic engine.
    Rollout,
}

/// Planner configuration.
///
/// `discount_factor` and `seed` parameterise the MDP and are consumed by
/// its constructor; the remaining knobs drive the search. `temporal`
/// selects the STN-filtered search; turning it off together with
/// [`EstimatorKind::Rollout`] reproduces the older, heuristic-free engine.
#[derive(Clone, Debug)]
pub struct PlanConfig {
    /// Wall-clock search budget per committed action.
    pub search_time: Duration,
    /// When set, overrides `search_time` with a fixed number of search
    /// trajectories per committed action. With a fixed seed this makes the
    /// whole planning run reproducible, which a wall-clock budget cannot
    /// guarantee.
    pub trajectories: Option<u64>,
    pub search_depth: u32,
    pub exploration_constant: f64,
    pub selection: SelectionKind,
    pub discount_factor: f64,
    pub seed: u64,
    pub temporal: bool,
    pub estimator: EstimatorKind,
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            search_time: Duration::from_secs(1),
            trajectories: None,
            search_depth: 20,
            exploration_constant: std::f64::consts::SQRT_2,
            selection: SelectionKind::Avg,
            discount_factor: 0.95,
            seed: 0,
            temporal: true,
            estimator: EstimatorKind::Trpg,
        }
    }
}

impl PlanConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.search_time.is_zero(), "Search budget must be positive");
        ensure!(
            self.trajectories.map_or(true, |n| n >= 1),
            "Trajectory budget must be positive"
        );
        ensure!(self.search_depth >= 1, "Search depth must be at least 1");
        ensure!(self.exploration_constant > 0.0, "Exploration constant must be positive");
        ensure!(
            0.0 < self.discount_factor && self.discount_factor <= 1.0,
            "Discount factor must lie in (0, 1]"
        );
        Ok(())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PlanStatus {
    Success,
    Failure,
}

/// One committed action with its scheduled times in the earliest schedule.
#[derive(Clone, Debug)]
pub struct PlanStep {
    pub action: AId,
    pub name: String,
    pub start: IntCst,
    pub end: IntCst,
}

/// Result of a planning run: the status, the plan makespan (partial on
/// failure) and the committed trace.
#[derive(Clone, Debug)]
pub struct PlanOutcome {
    pub status: PlanStatus,
    pub makespan: IntCst,
    pub trace: Vec<PlanStep>,
}

impl PlanOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == PlanStatus::Success
    }
}

/// Plans online over the MDP: at every step a fresh (or reused) search tree
/// picks the next action, the world state advances through the stochastic
/// `step`, and the temporal network records the commitment.
///
/// Failures (no applicable action at the root, deadline provably missed)
/// return a [`PlanStatus::Failure`] outcome with the partial trace. An
/// inconsistent network *after* a commitment is a bug in the mutex analysis
/// and aborts with an error instead.
pub fn plan<M: Mdp>(mdp: &mut M, config: &PlanConfig) -> Result<PlanOutcome> {
    config.validate()?;
    let params = SearchParams {
        search_depth: config.search_depth,
        exploration_constant: config.exploration_constant,
        selection: config.selection,
    };
    let mut estimator: Box<dyn Estimator<M>> = match config.estimator {
        EstimatorKind::Trpg => Box::new(TrpgEstimator),
        EstimatorKind::Rollout => Box::new(RolloutEstimator {
            depth: config.search_depth,
        }),
    };

    let deadline = mdp.deadline();
    let mut stn = Stn::new(deadline);
    let mut state = mdp.initial_state();
    let mut prev: Option<Timepoint> = None;
    let mut committed: Vec<(AId, Timepoint)> = Vec::new();
    let mut reuse: Option<(Tree<M::State>, SnId)> = None;

    if mdp.is_terminal(&state) {
        return Ok(PlanOutcome {
            status: PlanStatus::Success,
            makespan: 0,
            trace: Vec::new(),
        });
    }

    loop {
        if stn.current_end_time() > deadline || mdp.clock(&state) > deadline {
            tracing::warn!("deadline exceeded, planning failed");
            return Ok(failure(mdp, &stn, &committed));
        }

        let mut mcts = match reuse.take() {
            Some((tree, root)) => Mcts::resume(tree, root, estimator.as_mut(), params.clone()),
            None => Mcts::new(
                mdp,
                estimator.as_mut(),
                state.clone(),
                config.temporal.then(|| stn.clone()),
                prev,
                params.clone(),
            ),
        };
        let chosen = match config.trajectories {
            Some(n) => mcts.search_trajectories(mdp, n),
            None => mcts.search(mdp, config.search_time),
        };
        let Some(action) = chosen else {
            tracing::warn!("no applicable action at the root, planning failed");
            return Ok(failure(mdp, &stn, &committed));
        };

        let step = mdp.step(&state, action);
        reuse = if step.terminal {
            None
        } else {
            mcts.take_subtree(action, &step.state)
        };
        drop(mcts);

        let tp = stn.add_action(mdp.actions(), action, prev);
        let name = mdp.problem().world.table.format(mdp.actions()[action].name.iter());
        ensure!(
            stn.is_consistent(),
            "Temporal network inconsistent after committing {name}"
        );
        committed.push((action, tp));
        prev = Some(tp);
        tracing::debug!(
            action = %name,
            end_time = stn.current_end_time(),
            "committed action"
        );

        if step.terminal {
            return Ok(PlanOutcome {
                status: PlanStatus::Success,
                makespan: stn.current_end_time(),
                trace: trace(mdp, &stn, &committed),
            });
        }
        state = step.state;
    }
}

fn failure<M: Mdp>(mdp: &M, stn: &Stn, committed: &[(AId, Timepoint)]) -> PlanOutcome {
    PlanOutcome {
        status: PlanStatus::Failure,
        makespan: stn.current_end_time(),
        trace: trace(mdp, stn, committed),
    }
}

/// Extracts the earliest schedule of the committed actions. A durative
/// start spans to its paired completion; other events are instantaneous.
fn trace<M: Mdp>(mdp: &M, stn: &Stn, committed: &[(AId, Timepoint)]) -> Vec<PlanStep> {
    committed
        .iter()
        .map(|&(action, tp)| {
            let start = stn.earliest(tp);
            let end = match mdp.actions()[action].kind {
                ActionKind::DurativeStart { duration, .. } | ActionKind::Durative { duration, .. } => start + duration,
                ActionKind::Combination(ref parts) => {
                    let longest = parts
                        .iter()
                        .map(|&p| mdp.actions()[p].duration(mdp.actions()))
                        .max()
                        .unwrap_or(0);
                    start + longest
                }
                _ => start,
            };
            PlanStep {
                action,
                name: mdp.problem().world.table.format(mdp.actions()[action].name.iter()),
                start,
                end,
            }
        })
        .collect()
}
