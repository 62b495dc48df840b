use crate::state::{Lit, State, SvId};
use anyhow::{ensure, Result};
use smallvec::SmallVec;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use taurus::collections::ref_store::{RefStore, RefVec};
use taurus::create_ref_type;
use taurus::model::symbols::SymId;
use taurus::IntCst;

create_ref_type!(AId);

impl Debug for AId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", usize::from(*self))
    }
}

/// One possible result of a probabilistic effect: a weight and the literals
/// assigned when this outcome is drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub weight: f64,
    pub effects: Vec<Lit>,
}

impl Outcome {
    pub fn new(weight: f64, effects: Vec<Lit>) -> Outcome {
        Outcome { weight, effects }
    }
}

#[derive(Clone)]
enum OutcomeModel {
    /// State-independent distribution.
    Fixed(Vec<Outcome>),
    /// Distribution evaluated against the state in which the effect fires.
    /// May return an empty vector, in which case the effect is a no-op.
    Dynamic(Arc<dyn Fn(&State) -> Vec<Outcome> + Send + Sync>),
}

/// A discrete distribution over sets of literal assignments, attached to an
/// action. The atoms possibly touched by any outcome are known statically;
/// the distribution itself may depend on the state.
#[derive(Clone)]
pub struct ProbabilisticEffect {
    touched: Vec<SvId>,
    model: OutcomeModel,
}

impl ProbabilisticEffect {
    /// A state-independent distribution. Weights must be strictly positive
    /// (zero-mass outcomes are forbidden) and sum to 1.
    pub fn fixed(outcomes: Vec<Outcome>) -> Result<ProbabilisticEffect> {
        ensure!(!outcomes.is_empty(), "Empty probabilistic effect");
        ensure!(
            outcomes.iter().all(|o| o.weight > 0.0),
            "Zero-mass outcome in probabilistic effect"
        );
        let total: f64 = outcomes.iter().map(|o| o.weight).sum();
        ensure!(
            (total - 1.0).abs() < 1e-6,
            "Outcome probabilities sum to {total}, expected 1"
        );
        let mut touched: Vec<SvId> = outcomes
            .iter()
            .flat_map(|o| o.effects.iter().map(|l| l.var()))
            .collect();
        touched.sort_unstable();
        touched.dedup();
        Ok(ProbabilisticEffect {
            touched,
            model: OutcomeModel::Fixed(outcomes),
        })
    }

    /// A state-dependent distribution. `touched` must cover every atom that
    /// any returned outcome may assign.
    pub fn dynamic(
        touched: Vec<SvId>,
        f: impl Fn(&State) -> Vec<Outcome> + Send + Sync + 'static,
    ) -> ProbabilisticEffect {
        let mut touched = touched;
        touched.sort_unstable();
        touched.dedup();
        ProbabilisticEffect {
            touched,
            model: OutcomeModel::Dynamic(Arc::new(f)),
        }
    }

    /// Atoms that some outcome of this effect may assign (either polarity).
    pub fn touched(&self) -> &[SvId] {
        &self.touched
    }

    /// The distribution evaluated at `state`.
    pub fn outcomes(&self, state: &State) -> Vec<Outcome> {
        match &self.model {
            OutcomeModel::Fixed(outcomes) => outcomes.clone(),
            OutcomeModel::Dynamic(f) => f(state),
        }
    }

    /// Literals that some outcome may set, for relaxed reachability: the
    /// concrete outcome literals when the distribution is fixed, both
    /// polarities of every touched atom otherwise.
    pub fn possible_lits(&self) -> Vec<Lit> {
        match &self.model {
            OutcomeModel::Fixed(outcomes) => {
                let mut lits: Vec<Lit> = outcomes.iter().flat_map(|o| o.effects.iter().copied()).collect();
                lits.sort_unstable();
                lits.dedup();
                lits
            }
            OutcomeModel::Dynamic(_) => self
                .touched
                .iter()
                .flat_map(|&sv| [Lit::new(sv, true), Lit::new(sv, false)])
                .collect(),
        }
    }
}

impl Debug for ProbabilisticEffect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.model {
            OutcomeModel::Fixed(outcomes) => write!(f, "ProbabilisticEffect{outcomes:?}"),
            OutcomeModel::Dynamic(_) => write!(f, "ProbabilisticEffect[dynamic over {:?}]", self.touched),
        }
    }
}

/// Timed preconditions and start-phase effects of a ground durative action,
/// kept around until the compiler lowers the action to a start/end pair.
#[derive(Clone, Debug, Default)]
pub struct DurativeSpans {
    pub start_pos: Vec<SvId>,
    pub start_neg: Vec<SvId>,
    pub overall_pos: Vec<SvId>,
    pub overall_neg: Vec<SvId>,
    pub end_pos: Vec<SvId>,
    pub end_neg: Vec<SvId>,
    /// Effects applied when the action begins ("during" effects).
    pub during_add: Vec<SvId>,
    pub during_del: Vec<SvId>,
    /// The `inExecution` atom of this action, set by the compiler.
    pub in_exec: Option<SvId>,
}

/// Discriminant of a ground action.
#[derive(Clone, Debug)]
pub enum ActionKind {
    Instantaneous,
    /// A durative action that has not been lowered yet. Carries its duration,
    /// timed preconditions and start-phase effects. Retained by the
    /// combination compilation, where completions are not actions.
    Durative { duration: IntCst, spans: Box<DurativeSpans> },
    /// Start half of a lowered durative action.
    DurativeStart { duration: IntCst, end: AId },
    /// End half of a lowered durative action.
    DurativeEnd { start: AId },
    /// Simultaneous start of several compatible durative actions.
    Combination(SmallVec<[AId; 4]>),
    /// Lets time flow to the next completion without starting anything.
    NoOp,
}

/// A ground action: name, split positive/negative preconditions, add/delete
/// effects, probabilistic effects and the variant-specific payload.
///
/// An action is legal in a state iff its positive preconditions are all true
/// and its negative preconditions all false there. Effects are applied adds
/// first, deletes second, probabilistic outcomes last.
#[derive(Clone, Debug)]
pub struct GroundAction {
    /// S-expression giving the action symbol and its arguments, e.g.
    /// `(drive r1 l1 l2)`.
    pub name: Box<[SymId]>,
    pub pos_pre: Vec<SvId>,
    pub neg_pre: Vec<SvId>,
    pub add_eff: Vec<SvId>,
    pub del_eff: Vec<SvId>,
    pub prob_eff: Vec<ProbabilisticEffect>,
    pub kind: ActionKind,
}

impl GroundAction {
    /// Duration of this action: the fixed duration for durative actions and
    /// start halves, the paired duration for end halves, 0 otherwise.
    pub fn duration(&self, actions: &Actions) -> IntCst {
        match self.kind {
            ActionKind::Durative { duration, .. } | ActionKind::DurativeStart { duration, .. } => duration,
            ActionKind::DurativeEnd { start } => match actions[start].kind {
                ActionKind::DurativeStart { duration, .. } => duration,
                _ => unreachable!("end action not paired with a start action"),
            },
            _ => 0,
        }
    }

    /// Precondition literals of this action.
    pub fn preconditions(&self) -> impl Iterator<Item = Lit> + '_ {
        self.pos_pre
            .iter()
            .map(|&sv| Lit::new(sv, true))
            .chain(self.neg_pre.iter().map(|&sv| Lit::new(sv, false)))
    }

    /// Deterministic effect literals of this action.
    pub fn effects(&self) -> impl Iterator<Item = Lit> + '_ {
        self.add_eff
            .iter()
            .map(|&sv| Lit::new(sv, true))
            .chain(self.del_eff.iter().map(|&sv| Lit::new(sv, false)))
    }

    /// Effect literals some execution of this action may produce, including
    /// probabilistic outcomes. Used by relaxed reachability.
    pub fn possible_effects(&self) -> Vec<Lit> {
        let mut lits: Vec<Lit> = self.effects().collect();
        for pe in &self.prob_eff {
            lits.extend(pe.possible_lits());
        }
        lits.sort_unstable();
        lits.dedup();
        lits
    }

    /// Checks the structural invariants of a ground action: the positive and
    /// negative precondition sets are disjoint, and so are the add and
    /// delete effect sets.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.pos_pre.iter().all(|sv| !self.neg_pre.contains(sv)),
            "Atom required both true and false by the same action"
        );
        ensure!(
            self.add_eff.iter().all(|sv| !self.del_eff.contains(sv)),
            "Atom both added and deleted by the same action"
        );
        Ok(())
    }
}

/// Arena of the ground actions of a problem.
///
/// In addition to the actions themselves, maintains reverse indices from
/// literals to the actions watching them as preconditions and to the actions
/// possibly achieving them, which the relaxed-reachability heuristic relies
/// on.
#[derive(Default)]
pub struct Actions {
    all: RefVec<AId, GroundAction>,
    watchers: RefStore<Lit, Vec<AId>>,
    achievers: RefStore<Lit, Vec<AId>>,
}

impl Actions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&mut self, a: GroundAction) -> AId {
        let id = self.all.push(a);
        let action = &self.all[id];
        let pre: Vec<Lit> = action.preconditions().collect();
        let eff: Vec<Lit> = action.possible_effects();
        for lit in pre {
            // grow watchers until we have an entry for lit
            while self.watchers.last_key().filter(|&k| k >= lit).is_none() {
                self.watchers.push(Vec::new());
            }
            self.watchers[lit].push(id);
        }
        for lit in eff {
            // grow achievers until we have an entry for lit
            while self.achievers.last_key().filter(|&k| k >= lit).is_none() {
                self.achievers.push(Vec::new());
            }
            self.achievers[lit].push(id);
        }
        id
    }

    /// Returns all actions that have `lit` as a precondition.
    pub fn dependent_on(&self, lit: Lit) -> &[AId] {
        if usize::from(lit) < self.watchers.len() {
            self.watchers[lit].as_slice()
        } else {
            &[]
        }
    }

    /// Returns all actions that may produce `lit`.
    pub fn achievers_of(&self, lit: Lit) -> &[AId] {
        if usize::from(lit) < self.achievers.len() {
            self.achievers[lit].as_slice()
        } else {
            &[]
        }
    }

    /// An iterator on all action IDs in this arena.
    pub fn iter(&self) -> impl Iterator<Item = AId> {
        self.all.keys()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

impl std::ops::Index<AId> for Actions {
    type Output = GroundAction;

    fn index(&self, index: AId) -> &Self::Output {
        &self.all[index]
    }
}
