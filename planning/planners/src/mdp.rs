use crate::GOAL_REWARD;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use taurus::IntCst;
use taurus_planning::actions::{AId, ActionKind, Actions, GroundAction, ProbabilisticEffect};
use taurus_planning::grounding::GroundProblem;
use taurus_planning::state::{CombinationState, Lit, QueueNode, State, SvId};

/// Result of applying one action to a state.
#[derive(Clone, Debug)]
pub struct Step<S> {
    pub terminal: bool,
    pub state: S,
    pub reward: f64,
}

/// A Markov decision process over a ground problem.
///
/// The associated state type is the seam between the flat process (built on
/// a compiled problem, where every action is instantaneous) and the
/// combination process (where durative actions execute over time).
///
/// `step` is only defined for actions returned by `legal_actions` on the
/// same state; it mutates nothing but the internal random generator, so the
/// process is deterministic under a fixed seed.
pub trait Mdp {
    type State: Clone + Eq + Hash + Debug;

    fn problem(&self) -> &GroundProblem;

    fn initial_state(&self) -> Self::State;

    fn is_terminal(&self, state: &Self::State) -> bool;

    fn legal_actions(&self, state: &Self::State) -> Vec<AId>;

    fn step(&mut self, state: &Self::State, action: AId) -> Step<Self::State>;

    fn discount(&self) -> f64;

    /// The generator driving probabilistic-effect sampling and the default
    /// rollout policy. A single seeded generator per process keeps runs
    /// reproducible.
    fn rng(&mut self) -> &mut SmallRng;

    /// The positive-atom view of a state, for goal tests and heuristics.
    fn flat<'a>(&self, state: &'a Self::State) -> &'a State;

    /// The clock carried by a state: 0 for flat states, the queue clock for
    /// combination states.
    fn clock(&self, state: &Self::State) -> IntCst;

    fn deadline(&self) -> IntCst {
        self.problem().deadline
    }

    fn actions(&self) -> &Actions {
        &self.problem().actions
    }

    fn goals(&self) -> &[SvId] {
        &self.problem().goals
    }
}

/// An action is applicable iff its positive preconditions all hold and its
/// negative preconditions all fail in the state.
fn applicable(action: &GroundAction, state: &State) -> bool {
    state.contains_all(&action.pos_pre) && state.disjoint(&action.neg_pre)
}

/// Draws one outcome of the effect, weighted by probability. Returns `None`
/// (a no-op, with a warning) when the distribution has no support at this
/// state.
fn sample_outcome(rng: &mut SmallRng, effect: &ProbabilisticEffect, state: &State) -> Option<Vec<Lit>> {
    let outcomes = effect.outcomes(state);
    if outcomes.is_empty() {
        tracing::warn!("probabilistic effect with empty support, treated as a no-op");
        return None;
    }
    let total: f64 = outcomes.iter().map(|o| o.weight).sum();
    let mut draw = rng.random::<f64>() * total;
    for outcome in &outcomes {
        draw -= outcome.weight;
        if draw <= 0.0 {
            return Some(outcome.effects.clone());
        }
    }
    // numerically possible when draw == total
    Some(outcomes.last().unwrap().effects.clone())
}

/// Applies the deterministic then the sampled probabilistic effects of the
/// action, each as an add-then-delete pass.
fn apply_effects(rng: &mut SmallRng, action: &GroundAction, state: &State) -> State {
    let mut next = state.apply(action.add_eff.iter().copied(), action.del_eff.iter().copied());
    for pe in &action.prob_eff {
        if let Some(effects) = sample_outcome(rng, pe, state) {
            let adds = effects.iter().filter(|l| l.val()).map(|l| l.var());
            let dels = effects.iter().filter(|l| !l.val()).map(|l| l.var());
            next = next.apply(adds, dels);
        }
    }
    next
}

/// MDP over a compiled problem: every action is instantaneous and states
/// are plain atom sets.
pub struct GroundMdp {
    problem: Arc<GroundProblem>,
    discount: f64,
    rng: SmallRng,
}

impl GroundMdp {
    pub fn new(problem: Arc<GroundProblem>, discount: f64, seed: u64) -> GroundMdp {
        assert!(
            problem.actions.iter().all(|a| matches!(
                problem.actions[a].kind,
                ActionKind::Instantaneous | ActionKind::DurativeStart { .. } | ActionKind::DurativeEnd { .. }
            )),
            "GroundMdp requires a compiled problem"
        );
        assert!(0.0 < discount && discount <= 1.0, "Discount factor out of (0, 1]");
        GroundMdp {
            problem,
            discount,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Mdp for GroundMdp {
    type State = State;

    fn problem(&self) -> &GroundProblem {
        &self.problem
    }

    fn initial_state(&self) -> State {
        self.problem.initial_state.clone()
    }

    fn is_terminal(&self, state: &State) -> bool {
        state.contains_all(&self.problem.goals)
    }

    fn legal_actions(&self, state: &State) -> Vec<AId> {
        self.problem
            .actions
            .iter()
            .filter(|&a| applicable(&self.problem.actions[a], state))
            .collect()
    }

    fn step(&mut self, state: &State, action: AId) -> Step<State> {
        debug_assert!(
            applicable(&self.problem.actions[action], state),
            "Stepping an illegal action"
        );
        let a = &self.problem.actions[action];
        let next = apply_effects(&mut self.rng, a, state);
        let terminal = self.is_terminal(&next);
        Step {
            terminal,
            state: next,
            reward: if terminal { GOAL_REWARD } else { 0.0 },
        }
    }

    fn discount(&self) -> f64 {
        self.discount
    }

    fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    fn flat<'a>(&self, state: &'a State) -> &'a State {
        state
    }

    fn clock(&self, _state: &State) -> IntCst {
        0
    }
}

/// MDP over a combination problem: durative actions are queued on start and
/// complete as time advances. Stepping a durative, combination or no-op
/// action drains the queue: the clock advances by the minimum remaining
/// duration, every action whose remaining duration reaches 0 applies its
/// completion effects, and the rest are decremented.
pub struct CombinationMdp {
    problem: Arc<GroundProblem>,
    discount: f64,
    rng: SmallRng,
}

impl CombinationMdp {
    pub fn new(problem: Arc<GroundProblem>, discount: f64, seed: u64) -> CombinationMdp {
        assert!(
            problem.actions.iter().all(|a| matches!(
                problem.actions[a].kind,
                ActionKind::Instantaneous | ActionKind::Durative { .. } | ActionKind::Combination(_) | ActionKind::NoOp
            )),
            "CombinationMdp requires a combination-compiled problem"
        );
        assert!(0.0 < discount && discount <= 1.0, "Discount factor out of (0, 1]");
        CombinationMdp {
            problem,
            discount,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Starts a durative action: enqueue it and set its sentinel atom.
    fn enqueue(&self, state: &mut CombinationState, action: AId) {
        let ActionKind::Durative { duration, ref spans } = self.problem.actions[action].kind else {
            unreachable!("enqueueing a non-durative action")
        };
        state.active.push(QueueNode {
            remaining: duration,
            action,
        });
        if let Some(in_exec) = spans.in_exec {
            state.state = state.state.apply([in_exec], []);
        }
    }

    /// Advances the clock to the next completion(s) and applies their
    /// effects.
    fn drain(&mut self, state: &mut CombinationState) {
        let (delta, completed) = state.active.drain_completed();
        state.time += delta;
        for action in completed {
            let a = &self.problem.actions[action];
            state.state = apply_effects(&mut self.rng, a, &state.state);
        }
    }
}

impl Mdp for CombinationMdp {
    type State = CombinationState;

    fn problem(&self) -> &GroundProblem {
        &self.problem
    }

    fn initial_state(&self) -> CombinationState {
        CombinationState::new(self.problem.initial_state.clone())
    }

    fn is_terminal(&self, state: &CombinationState) -> bool {
        state.state.contains_all(&self.problem.goals) && !state.has_active_actions()
    }

    fn legal_actions(&self, state: &CombinationState) -> Vec<AId> {
        self.problem
            .actions
            .iter()
            .filter(|&a| match self.problem.actions[a].kind {
                // waiting is only meaningful while something executes
                ActionKind::NoOp => state.has_active_actions(),
                _ => applicable(&self.problem.actions[a], &state.state),
            })
            .collect()
    }

    fn step(&mut self, state: &CombinationState, action: AId) -> Step<CombinationState> {
        let mut next = state.clone();
        let kind = self.problem.actions[action].kind.clone();
        match kind {
            ActionKind::Instantaneous => {
                debug_assert!(
                    applicable(&self.problem.actions[action], &state.state),
                    "Stepping an illegal action"
                );
                let a = &self.problem.actions[action];
                next.state = apply_effects(&mut self.rng, a, &state.state);
            }
            ActionKind::Durative { .. } => {
                debug_assert!(
                    applicable(&self.problem.actions[action], &state.state),
                    "Stepping an illegal action"
                );
                self.enqueue(&mut next, action);
                self.drain(&mut next);
            }
            ActionKind::Combination(parts) => {
                debug_assert!(
                    applicable(&self.problem.actions[action], &state.state),
                    "Stepping an illegal action"
                );
                for part in parts {
                    self.enqueue(&mut next, part);
                }
                self.drain(&mut next);
            }
            ActionKind::NoOp => {
                debug_assert!(state.has_active_actions(), "No-op with an empty queue");
                self.drain(&mut next);
            }
            _ => unreachable!("lowered action in a combination problem"),
        }
        let terminal = self.is_terminal(&next);
        Step {
            terminal,
            state: next,
            reward: if terminal { GOAL_REWARD } else { 0.0 },
        }
    }

    fn discount(&self) -> f64 {
        self.discount
    }

    fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    fn flat<'a>(&self, state: &'a CombinationState) -> &'a State {
        &state.state
    }

    fn clock(&self, state: &CombinationState) -> IntCst {
        state.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taurus_planning::compile::{compile, compile_for_combination};
    use taurus_planning::grounding::ground;
    use taurus_planning::problem::{
        DurativeSchema, InstantaneousSchema, OutcomeSpec, ParamLit, Problem, ProbabilisticSpec, Schema, TimingKind,
    };

    fn drive_problem() -> Problem {
        let mut pb = Problem::new(10);
        let at_a = pb.add_fluent("at_a", vec![]).unwrap();
        let at_b = pb.add_fluent("at_b", vec![]).unwrap();
        let (at_a, at_b) = (pb.fluent(at_a).clone(), pb.fluent(at_b).clone());
        let mut drive = DurativeSchema::new("drive", vec![], 3);
        drive.condition(TimingKind::Start, at_a.applied([]), true);
        drive.end_effect(at_b.applied([]), true);
        pb.add_schema(Schema::Durative(drive)).unwrap();
        pb.set_initial(at_a.ground([]), true);
        pb.add_goal(at_b.ground([]));
        pb
    }

    #[test]
    fn legal_actions_and_terminal_transition() {
        let compiled = Arc::new(compile(&ground(&drive_problem()).unwrap()).unwrap());
        let mut mdp = GroundMdp::new(compiled.clone(), 1.0, 0);
        let s0 = mdp.initial_state();
        assert!(!mdp.is_terminal(&s0));

        let legal = mdp.legal_actions(&s0);
        assert_eq!(legal.len(), 1); // only start_drive
        let start = legal[0];
        let step = mdp.step(&s0, start);
        assert!(!step.terminal);
        assert_eq!(step.reward, 0.0);

        let legal = mdp.legal_actions(&step.state);
        assert_eq!(legal.len(), 1); // only end_drive
        let end_step = mdp.step(&step.state, legal[0]);
        assert!(end_step.terminal);
        assert_eq!(end_step.reward, GOAL_REWARD);
    }

    fn flip_problem() -> Problem {
        let mut pb = Problem::new(10);
        let heads = pb.add_fluent("heads", vec![]).unwrap();
        let tails = pb.add_fluent("tails", vec![]).unwrap();
        let (heads, tails) = (pb.fluent(heads).clone(), pb.fluent(tails).clone());
        let mut flip = InstantaneousSchema::new("flip", vec![]);
        flip.probabilistic_effect(ProbabilisticSpec::new(vec![
            OutcomeSpec::new(0.5, vec![ParamLit::new(heads.applied([]), true)]),
            OutcomeSpec::new(0.5, vec![ParamLit::new(tails.applied([]), true)]),
        ]));
        pb.add_schema(Schema::Instantaneous(flip)).unwrap();
        pb.add_goal(heads.ground([]));
        pb
    }

    #[test]
    fn probabilistic_steps_are_deterministic_under_a_seed() {
        let compiled = Arc::new(compile(&ground(&flip_problem()).unwrap()).unwrap());
        let run = |seed: u64| {
            let mut mdp = GroundMdp::new(compiled.clone(), 1.0, seed);
            let s0 = mdp.initial_state();
            let flip = mdp.legal_actions(&s0)[0];
            (0..16).map(|_| mdp.step(&s0, flip).state).collect::<Vec<_>>()
        };
        assert_eq!(run(10), run(10));
        // different seeds eventually disagree
        assert_ne!(run(1), run(2));
    }

    fn two_durative_problem() -> Problem {
        let mut pb = Problem::new(10);
        let a_done = pb.add_fluent("a_done", vec![]).unwrap();
        let b_done = pb.add_fluent("b_done", vec![]).unwrap();
        let (a_done, b_done) = (pb.fluent(a_done).clone(), pb.fluent(b_done).clone());
        let mut a = DurativeSchema::new("a", vec![], 2);
        a.end_effect(a_done.applied([]), true);
        pb.add_schema(Schema::Durative(a)).unwrap();
        let mut b = DurativeSchema::new("b", vec![], 3);
        b.end_effect(b_done.applied([]), true);
        pb.add_schema(Schema::Durative(b)).unwrap();
        pb.add_goal(a_done.ground([]));
        pb.add_goal(b_done.ground([]));
        pb
    }

    #[test]
    fn combination_step_advances_to_next_completion() {
        let compiled = Arc::new(compile_for_combination(&ground(&two_durative_problem()).unwrap(), 2).unwrap());
        let mut mdp = CombinationMdp::new(compiled.clone(), 1.0, 0);
        let s0 = mdp.initial_state();
        assert_eq!(mdp.clock(&s0), 0);

        let comb = mdp
            .legal_actions(&s0)
            .into_iter()
            .find(|&a| matches!(compiled.actions[a].kind, ActionKind::Combination(_)))
            .unwrap();

        // starting both: the shorter one (duration 2) completes first
        let step = mdp.step(&s0, comb);
        assert!(!step.terminal);
        assert_eq!(step.state.time, 2);
        assert_eq!(step.state.active.len(), 1);

        // with one action in flight, the no-op is legal and runs it out
        let noop = mdp
            .legal_actions(&step.state)
            .into_iter()
            .find(|&a| matches!(compiled.actions[a].kind, ActionKind::NoOp))
            .unwrap();
        let done = mdp.step(&step.state, noop);
        assert!(done.terminal);
        assert_eq!(done.state.time, 3);
        assert!(!done.state.has_active_actions());
        assert_eq!(done.reward, GOAL_REWARD);
    }

    #[test]
    fn noop_is_illegal_when_nothing_executes() {
        let compiled = Arc::new(compile_for_combination(&ground(&two_durative_problem()).unwrap(), 2).unwrap());
        let mdp = CombinationMdp::new(compiled.clone(), 1.0, 0);
        let s0 = mdp.initial_state();
        assert!(!mdp
            .legal_actions(&s0)
            .into_iter()
            .any(|a| matches!(compiled.actions[a].kind, ActionKind::NoOp)));
    }
}
