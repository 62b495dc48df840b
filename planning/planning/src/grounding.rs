use crate::actions::{ActionKind, Actions, DurativeSpans, GroundAction, Outcome, ProbabilisticEffect};
use crate::problem::{Fluent, ParamAtom, ParamLit, Problem, ProbabilisticSpec, Schema, Term};
use crate::state::{Lit, State, SvId, World};
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use taurus::model::symbols::SymId;
use taurus::model::types::TypeId;
use taurus::IntCst;

/// A fully ground problem: every schema has been instantiated over the typed
/// objects and every atom interned in the [`World`].
///
/// Before compilation the arena may contain [`ActionKind::Durative`]
/// entries; after compilation it only contains instantaneous variants.
pub struct GroundProblem {
    pub world: World,
    pub fluents: Vec<Fluent>,
    pub actions: Actions,
    pub initial_state: State,
    pub goals: Vec<SvId>,
    pub deadline: IntCst,
    /// Reserved type of fluent symbols, carried for the compiler.
    pub fluent_type: TypeId,
    /// Reserved type of action symbols, carried for the compiler.
    pub action_type: TypeId,
}

impl GroundProblem {
    /// True iff every goal atom holds in `state`.
    pub fn satisfies_goals(&self, state: &State) -> bool {
        state.contains_all(&self.goals)
    }
}

/// Instantiates every schema of the problem over the typed objects.
pub fn ground(problem: &Problem) -> Result<GroundProblem> {
    let mut table = problem.table.clone();
    let mut action_syms = Vec::with_capacity(problem.schemas().len());
    for schema in problem.schemas() {
        action_syms.push(table.add_symbol(schema.name().clone(), problem.action_type())?);
    }

    let fluents: Vec<Fluent> = problem.fluents().cloned().collect();
    let world = World::new(table, &fluents)?;

    let mut grounder = Grounder { world, actions: Actions::new() };

    for (schema, &sym) in problem.schemas().iter().zip(&action_syms) {
        grounder.ground_schema(schema, sym)?;
    }

    let Grounder { world, actions } = grounder;

    let mut initial = Vec::new();
    for (atom, value) in problem.initial_values() {
        let sv = world
            .sv_id(atom)
            .with_context(|| format!("Unknown atom in initial state: {}", world.table.format(atom.iter())))?;
        if *value {
            initial.push(sv);
        }
    }
    let initial_state = State::new(initial);

    let mut goals = Vec::new();
    for atom in problem.goals() {
        let sv = world
            .sv_id(atom)
            .with_context(|| format!("Unknown goal atom: {}", world.table.format(atom.iter())))?;
        goals.push(sv);
    }
    goals.sort_unstable();
    goals.dedup();

    tracing::debug!(
        atoms = world.num_atoms(),
        actions = actions.len(),
        "grounded problem"
    );

    Ok(GroundProblem {
        world,
        fluents,
        actions,
        initial_state,
        goals,
        deadline: problem.deadline,
        fluent_type: problem.fluent_type(),
        action_type: problem.action_type(),
    })
}

struct Grounder {
    world: World,
    actions: Actions,
}

impl Grounder {
    fn ground_schema(&mut self, schema: &Schema, sym: SymId) -> Result<()> {
        for binding in self.bindings_of(schema) {
            let mut name = Vec::with_capacity(binding.len() + 1);
            name.push(sym);
            name.extend(binding.iter().copied());
            let name = name.into_boxed_slice();

            let action = match schema {
                Schema::Instantaneous(s) => {
                    let (pos_pre, neg_pre) = self.bind_lits(&s.conditions, &binding)?;
                    // a binding with contradictory conditions is never applicable
                    if pos_pre.iter().any(|sv| neg_pre.contains(sv)) {
                        continue;
                    }
                    let (add_eff, del_eff) = self.bind_lits(&s.effects, &binding)?;
                    let prob_eff = self.bind_specs(&s.probabilistic, &binding)?;
                    GroundAction {
                        name,
                        pos_pre,
                        neg_pre,
                        add_eff,
                        del_eff,
                        prob_eff,
                        kind: ActionKind::Instantaneous,
                    }
                }
                Schema::Durative(s) => {
                    let (start_pos, start_neg) = self.bind_lits(&s.start_conditions, &binding)?;
                    let (overall_pos, overall_neg) = self.bind_lits(&s.overall_conditions, &binding)?;
                    let (end_pos, end_neg) = self.bind_lits(&s.end_conditions, &binding)?;
                    let (during_add, during_del) = self.bind_lits(&s.start_effects, &binding)?;
                    let (add_eff, del_eff) = self.bind_lits(&s.end_effects, &binding)?;
                    let prob_eff = self.bind_specs(&s.probabilistic, &binding)?;

                    // legality of a durative action is checked at its start
                    let pos_pre = union(&start_pos, &overall_pos);
                    let neg_pre = union(&start_neg, &overall_neg);
                    if pos_pre.iter().any(|sv| neg_pre.contains(sv)) {
                        continue;
                    }

                    let spans = DurativeSpans {
                        start_pos,
                        start_neg,
                        overall_pos,
                        overall_neg,
                        end_pos,
                        end_neg,
                        during_add,
                        during_del,
                        in_exec: None,
                    };
                    GroundAction {
                        name,
                        pos_pre,
                        neg_pre,
                        add_eff,
                        del_eff,
                        prob_eff,
                        kind: ActionKind::Durative {
                            duration: s.duration,
                            spans: Box::new(spans),
                        },
                    }
                }
            };
            action
                .validate()
                .with_context(|| format!("In ground action {}", self.world.table.format(action.name.iter())))?;
            self.actions.push(action);
        }
        Ok(())
    }

    /// All type-consistent assignments of objects to the schema's parameters.
    fn bindings_of(&self, schema: &Schema) -> Vec<Vec<SymId>> {
        if schema.params().is_empty() {
            return vec![Vec::new()];
        }
        schema
            .params()
            .iter()
            .map(|p| self.world.table.instances_of_type(p.tpe).to_vec())
            .multi_cartesian_product()
            .collect()
    }

    /// Splits bound literals into the atoms required/assigned true and false.
    fn bind_lits(&self, lits: &[ParamLit], binding: &[SymId]) -> Result<(Vec<SvId>, Vec<SvId>)> {
        let mut pos = Vec::new();
        let mut neg = Vec::new();
        for lit in lits {
            let sv = self.bind_atom(&lit.atom, binding)?;
            if lit.value {
                pos.push(sv);
            } else {
                neg.push(sv);
            }
        }
        pos.sort_unstable();
        pos.dedup();
        neg.sort_unstable();
        neg.dedup();
        Ok((pos, neg))
    }

    fn bind_atom(&self, atom: &ParamAtom, binding: &[SymId]) -> Result<SvId> {
        let mut sv = Vec::with_capacity(atom.args.len() + 1);
        sv.push(atom.fluent);
        for arg in &atom.args {
            sv.push(match arg {
                Term::Const(sym) => *sym,
                Term::Param(i) => binding[*i],
            });
        }
        self.world
            .sv_id(&sv)
            .with_context(|| format!("Unknown atom: {}", self.world.table.format(sv.iter())))
    }

    fn bind_specs(&self, specs: &[ProbabilisticSpec], binding: &[SymId]) -> Result<Vec<ProbabilisticEffect>> {
        let mut effects = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut outcomes = Vec::with_capacity(spec.outcomes.len());
            for outcome in &spec.outcomes {
                let mut lits = Vec::with_capacity(outcome.effects.len());
                for lit in &outcome.effects {
                    let sv = self.bind_atom(&lit.atom, binding)?;
                    let bound = Lit::new(sv, lit.value);
                    if lits.contains(&!bound) {
                        bail!(
                            "Atom {} assigned both values by a single outcome",
                            self.world.table.format(self.world.sv_of(sv).iter())
                        );
                    }
                    if !lits.contains(&bound) {
                        lits.push(bound);
                    }
                }
                outcomes.push(Outcome::new(outcome.weight, lits));
            }
            effects.push(ProbabilisticEffect::fixed(outcomes)?);
        }
        Ok(effects)
    }
}

fn union(a: &[SvId], b: &[SvId]) -> Vec<SvId> {
    let mut out: Vec<SvId> = a.iter().chain(b).copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}
