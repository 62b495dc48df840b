//! Lowering of durative actions to instantaneous start/end pairs.
//!
//! Each durative action is replaced by a cross-linked pair of instantaneous
//! actions guarded by an `inExecution` atom over a per-action sentinel
//! object. Pairs of actions whose parallel execution would be semantically
//! invalid receive additional `inExecution` preconditions (mutexes), so that
//! the legal sequences of the lowered problem correspond to the valid
//! interleavings of the original durative problem.

use crate::actions::{AId, ActionKind, Actions, GroundAction};
use crate::grounding::GroundProblem;
use crate::problem::Fluent;
use crate::state::{SvId, World};
use anyhow::{bail, Result};
use itertools::Itertools;
use smallvec::SmallVec;
use taurus::model::symbols::{SymId, SymbolTable};
use taurus::model::types::TypeId;

/// Name of the sentinel type introduced by the compiler.
pub const DURATIVE_OBJECT_TYPE: &str = "durative-action";
/// Name of the fluent tracking which durative actions are in flight.
pub const IN_EXECUTION: &str = "inExecution";

/// Position of an original action in the lowered arena.
#[derive(Copy, Clone, Debug)]
enum Lowered {
    /// Instantaneous action, copied as-is.
    Same(usize),
    /// Durative action, split into a start/end pair.
    Split { start: usize, end: usize },
}

/// Lowers every durative action of the problem into an instantaneous
/// start/end pair and injects mutex preconditions.
///
/// The sentinel type and the `inExecution` fluent are added even when the
/// problem has no durative action, so that compilation of a purely
/// instantaneous problem is the identity modulo those two additions.
pub fn compile(ground: &GroundProblem) -> Result<GroundProblem> {
    let mut world = ground.world.clone();
    let (sentinel_type, in_exec_sym) = add_in_execution(&mut world.table, ground.fluent_type)?;
    let mut fluents = ground.fluents.clone();
    fluents.push(Fluent {
        name: IN_EXECUTION.into(),
        sym: in_exec_sym,
        signature: vec![sentinel_type],
    });

    let mut out: Vec<GroundAction> = Vec::with_capacity(ground.actions.len() * 2);
    let mut lowered: Vec<Lowered> = Vec::with_capacity(ground.actions.len());
    // inExecution atom of each original durative action
    let mut in_exec: Vec<Option<SvId>> = Vec::with_capacity(ground.actions.len());

    for a in ground.actions.iter() {
        let action = &ground.actions[a];
        match &action.kind {
            ActionKind::Instantaneous => {
                lowered.push(Lowered::Same(out.len()));
                in_exec.push(None);
                out.push(action.clone());
            }
            ActionKind::Durative { duration, spans } => {
                let sv = intern_sentinel(&mut world, sentinel_type, in_exec_sym, &action.name)?;
                in_exec.push(Some(sv));

                let start_idx = out.len();
                let end_idx = start_idx + 1;
                lowered.push(Lowered::Split {
                    start: start_idx,
                    end: end_idx,
                });

                // overall conditions already established by a start effect
                // are not required at the start instant
                let mut pos_pre = spans.start_pos.clone();
                pos_pre.extend(
                    spans
                        .overall_pos
                        .iter()
                        .copied()
                        .filter(|sv| !spans.during_add.contains(sv)),
                );
                let mut neg_pre = spans.start_neg.clone();
                neg_pre.extend(
                    spans
                        .overall_neg
                        .iter()
                        .copied()
                        .filter(|sv| !spans.during_del.contains(sv)),
                );
                neg_pre.push(sv);

                let mut add_eff = spans.during_add.clone();
                add_eff.push(sv);

                out.push(GroundAction {
                    name: prefixed_name(&mut world.table, "start_", &action.name, ground.action_type)?,
                    pos_pre,
                    neg_pre,
                    add_eff,
                    del_eff: spans.during_del.clone(),
                    prob_eff: Vec::new(),
                    kind: ActionKind::DurativeStart {
                        duration: *duration,
                        end: end_idx.into(),
                    },
                });

                let mut pos_pre = spans.end_pos.clone();
                pos_pre.push(sv);
                let mut del_eff = action.del_eff.clone();
                del_eff.push(sv);

                out.push(GroundAction {
                    name: prefixed_name(&mut world.table, "end_", &action.name, ground.action_type)?,
                    pos_pre,
                    neg_pre: spans.end_neg.clone(),
                    add_eff: action.add_eff.clone(),
                    del_eff,
                    prob_eff: action.prob_eff.clone(),
                    kind: ActionKind::DurativeEnd {
                        start: start_idx.into(),
                    },
                });
            }
            _ => bail!("Cannot compile an already-lowered problem"),
        }
    }

    // mutex analysis over the original actions
    for a in ground.actions.iter() {
        let ai = usize::from(a);
        let action = &ground.actions[a];
        if !matches!(action.kind, ActionKind::Durative { .. }) {
            continue;
        }
        let sv_a = in_exec[ai].unwrap();
        for b in ground.actions.iter() {
            let bi = usize::from(b);
            if ai == bi {
                continue;
            }
            let other = &ground.actions[b];
            if check_mutex(action, other) {
                // the conflicting action may not start while `action` runs
                match lowered[bi] {
                    Lowered::Same(idx) => out[idx].neg_pre.push(sv_a),
                    Lowered::Split { start, .. } => {
                        out[start].neg_pre.push(sv_a);
                        // and conversely: both guards keep the pair apart
                        if let Lowered::Split { start: a_start, .. } = lowered[ai] {
                            out[a_start].neg_pre.push(in_exec[bi].unwrap());
                        }
                    }
                }
            }
            if check_soft_mutex(action, other) {
                // the conflicting action may not *end* while `action` runs
                if let Lowered::Split { end, .. } = lowered[bi] {
                    out[end].neg_pre.push(sv_a);
                    // a longer overall requirement cannot be interleaved
                    // with a shorter end-clobberer at all
                    if action.duration(&ground.actions) > other.duration(&ground.actions) {
                        if let Lowered::Split { start: a_start, .. } = lowered[ai] {
                            out[a_start].neg_pre.push(in_exec[bi].unwrap());
                        }
                        if let Lowered::Split { start: b_start, .. } = lowered[bi] {
                            out[b_start].neg_pre.push(sv_a);
                        }
                    }
                }
            }
        }
    }

    let mut actions = Actions::new();
    for mut action in out {
        normalise(&mut action);
        action.validate()?;
        actions.push(action);
    }
    tracing::debug!(actions = actions.len(), "lowered durative actions");

    Ok(GroundProblem {
        world,
        fluents,
        actions,
        initial_state: ground.initial_state.clone(),
        goals: ground.goals.clone(),
        deadline: ground.deadline,
        fluent_type: ground.fluent_type,
        action_type: ground.action_type,
    })
}

/// Prepares a ground problem for the combination search, where durative
/// actions are kept whole and completions happen as time advances.
///
/// Every durative action receives its sentinel atom (set on start, cleared
/// with its completion effects), mutex preconditions are applied to start
/// phases (a completion is not an action, so soft mutexes are approximated
/// by start-phase guards), a no-op is added to let time flow, and
/// combination actions are enumerated over pairwise-compatible durative
/// subsets of size 2 to `max_width`.
pub fn compile_for_combination(ground: &GroundProblem, max_width: usize) -> Result<GroundProblem> {
    let mut world = ground.world.clone();
    let (sentinel_type, in_exec_sym) = add_in_execution(&mut world.table, ground.fluent_type)?;
    let mut fluents = ground.fluents.clone();
    fluents.push(Fluent {
        name: IN_EXECUTION.into(),
        sym: in_exec_sym,
        signature: vec![sentinel_type],
    });

    let mut out: Vec<GroundAction> = Vec::with_capacity(ground.actions.len() + 2);
    let mut in_exec: Vec<Option<SvId>> = Vec::with_capacity(ground.actions.len());
    let mut durative_positions: Vec<usize> = Vec::new();

    for a in ground.actions.iter() {
        let action = &ground.actions[a];
        match &action.kind {
            ActionKind::Instantaneous => {
                in_exec.push(None);
                out.push(action.clone());
            }
            ActionKind::Durative { duration, spans } => {
                let sv = intern_sentinel(&mut world, sentinel_type, in_exec_sym, &action.name)?;
                in_exec.push(Some(sv));
                durative_positions.push(out.len());

                let mut copy = action.clone();
                copy.neg_pre.push(sv);
                copy.del_eff.push(sv);
                let mut spans = spans.clone();
                spans.in_exec = Some(sv);
                copy.kind = ActionKind::Durative {
                    duration: *duration,
                    spans,
                };
                out.push(copy);
            }
            _ => bail!("Cannot compile an already-lowered problem"),
        }
    }

    // mutex preconditions on start phases
    for a in ground.actions.iter() {
        let ai = usize::from(a);
        let action = &ground.actions[a];
        if !matches!(action.kind, ActionKind::Durative { .. }) {
            continue;
        }
        let sv_a = in_exec[ai].unwrap();
        for b in ground.actions.iter() {
            let bi = usize::from(b);
            if ai == bi {
                continue;
            }
            let other = &ground.actions[b];
            if check_mutex(action, other) || check_soft_mutex(action, other) {
                out[bi].neg_pre.push(sv_a);
                if matches!(other.kind, ActionKind::Durative { .. }) {
                    out[ai].neg_pre.push(in_exec[bi].unwrap());
                }
            }
        }
    }

    let noop_sym = world.table.add_symbol("noop", ground.action_type)?;
    out.push(GroundAction {
        name: Box::new([noop_sym]),
        pos_pre: Vec::new(),
        neg_pre: Vec::new(),
        add_eff: Vec::new(),
        del_eff: Vec::new(),
        prob_eff: Vec::new(),
        kind: ActionKind::NoOp,
    });

    if max_width >= 2 && durative_positions.len() >= 2 {
        let combination_sym = world.table.add_symbol("combination", ground.action_type)?;
        for width in 2..=max_width.min(durative_positions.len()) {
            for subset in durative_positions.iter().copied().combinations(width) {
                if !subset
                    .iter()
                    .tuple_combinations()
                    .all(|(&x, &y)| compatible(&out[x], &out[y]))
                {
                    continue;
                }
                let mut pos_pre = Vec::new();
                let mut neg_pre = Vec::new();
                let mut name = vec![combination_sym];
                for &idx in &subset {
                    pos_pre.extend(out[idx].pos_pre.iter().copied());
                    neg_pre.extend(out[idx].neg_pre.iter().copied());
                    name.extend(out[idx].name.iter().copied());
                }
                pos_pre.sort_unstable();
                pos_pre.dedup();
                neg_pre.sort_unstable();
                neg_pre.dedup();
                if pos_pre.iter().any(|sv| neg_pre.contains(sv)) {
                    continue;
                }
                let parts: SmallVec<[AId; 4]> = subset.iter().map(|&i| i.into()).collect();
                out.push(GroundAction {
                    name: name.into_boxed_slice(),
                    pos_pre,
                    neg_pre,
                    add_eff: Vec::new(),
                    del_eff: Vec::new(),
                    prob_eff: Vec::new(),
                    kind: ActionKind::Combination(parts),
                });
            }
        }
    }

    let mut actions = Actions::new();
    for mut action in out {
        normalise(&mut action);
        action.validate()?;
        actions.push(action);
    }

    Ok(GroundProblem {
        world,
        fluents,
        actions,
        initial_state: ground.initial_state.clone(),
        goals: ground.goals.clone(),
        deadline: ground.deadline,
        fluent_type: ground.fluent_type,
        action_type: ground.action_type,
    })
}

fn add_in_execution(table: &mut SymbolTable, fluent_type: TypeId) -> Result<(TypeId, SymId)> {
    let sentinel_type = table.add_type(DURATIVE_OBJECT_TYPE)?;
    let in_exec_sym = table.add_symbol(IN_EXECUTION, fluent_type)?;
    Ok((sentinel_type, in_exec_sym))
}

/// Creates the sentinel object of a durative action and interns its
/// `inExecution` atom.
fn intern_sentinel(
    world: &mut World,
    sentinel_type: TypeId,
    in_exec_sym: SymId,
    name: &[SymId],
) -> Result<SvId> {
    let label = format!("start-{}", name.iter().map(|s| world.table.symbol(*s)).join("_"));
    let sentinel = world.table.add_symbol(label, sentinel_type)?;
    Ok(world.intern(Box::new([in_exec_sym, sentinel])))
}

/// Name of a synthesised start/end action: the original action symbol with
/// a prefix, applied to the same arguments.
fn prefixed_name(
    table: &mut SymbolTable,
    prefix: &str,
    name: &[SymId],
    action_type: TypeId,
) -> Result<Box<[SymId]>> {
    let label = format!("{prefix}{}", table.symbol(name[0]));
    let sym = match table.id(label.as_str()) {
        Some(sym) => sym,
        None => table.add_symbol(label, action_type)?,
    };
    let mut out = vec![sym];
    out.extend(name.iter().skip(1).copied());
    Ok(out.into_boxed_slice())
}

/// Atoms `a` may set true / set false when it begins.
fn start_assignments(a: &GroundAction) -> (Vec<SvId>, Vec<SvId>) {
    match &a.kind {
        ActionKind::Durative { spans, .. } => (spans.during_add.clone(), spans.during_del.clone()),
        _ => {
            let touched: Vec<SvId> = a.prob_eff.iter().flat_map(|pe| pe.touched().iter().copied()).collect();
            let mut pos = a.add_eff.clone();
            pos.extend(touched.iter().copied());
            let mut neg = a.del_eff.clone();
            neg.extend(touched);
            (pos, neg)
        }
    }
}

/// Atoms `a` may set true / set false when it completes. Empty for
/// instantaneous actions, whose whole effect is part of their start phase.
fn end_assignments(a: &GroundAction) -> (Vec<SvId>, Vec<SvId>) {
    match &a.kind {
        ActionKind::Durative { .. } => {
            let touched: Vec<SvId> = a.prob_eff.iter().flat_map(|pe| pe.touched().iter().copied()).collect();
            let mut pos = a.add_eff.clone();
            pos.extend(touched.iter().copied());
            let mut neg = a.del_eff.clone();
            neg.extend(touched);
            (pos, neg)
        }
        _ => (Vec::new(), Vec::new()),
    }
}

fn all_assignments(a: &GroundAction) -> (Vec<SvId>, Vec<SvId>) {
    let (mut pos, mut neg) = start_assignments(a);
    let (end_pos, end_neg) = end_assignments(a);
    pos.extend(end_pos);
    neg.extend(end_neg);
    (pos, neg)
}

fn overall_conditions(a: &GroundAction) -> (&[SvId], &[SvId]) {
    match &a.kind {
        ActionKind::Durative { spans, .. } => (&spans.overall_pos, &spans.overall_neg),
        _ => (&[], &[]),
    }
}

fn intersects(a: &[SvId], b: &[SvId]) -> bool {
    a.iter().any(|sv| b.contains(sv))
}

/// Two actions are (hard) mutex if their outcomes conflict, or if the
/// start-phase assignments of `other` clobber an OVERALL condition of the
/// durative `action`.
fn check_mutex(action: &GroundAction, other: &GroundAction) -> bool {
    let (pos, neg) = all_assignments(action);
    let (other_pos, other_neg) = all_assignments(other);
    if intersects(&pos, &other_neg) || intersects(&neg, &other_pos) {
        return true;
    }
    let (overall_pos, overall_neg) = overall_conditions(action);
    let (start_pos, start_neg) = start_assignments(other);
    intersects(overall_pos, &start_neg) || intersects(overall_neg, &start_pos)
}

/// `action` is soft mutex with `other` if the end-phase assignments of
/// `other` (including probabilistic ones) clobber an OVERALL condition of
/// `action`: `other` may start during `action`, but must not end before it.
fn check_soft_mutex(action: &GroundAction, other: &GroundAction) -> bool {
    let (overall_pos, overall_neg) = overall_conditions(action);
    let (end_pos, end_neg) = end_assignments(other);
    intersects(overall_pos, &end_neg) || intersects(overall_neg, &end_pos)
}

/// Two durative actions may be combined if neither direction of the mutex
/// analysis separates them. Precondition conflicts are checked separately
/// on the merged sets.
fn compatible(a: &GroundAction, b: &GroundAction) -> bool {
    !check_mutex(a, b) && !check_mutex(b, a) && !check_soft_mutex(a, b) && !check_soft_mutex(b, a)
}

fn normalise(action: &mut GroundAction) {
    action.pos_pre.sort_unstable();
    action.pos_pre.dedup();
    action.neg_pre.sort_unstable();
    action.neg_pre.dedup();
    action.add_eff.sort_unstable();
    action.add_eff.dedup();
    action.del_eff.sort_unstable();
    action.del_eff.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::ground;
    use crate::problem::{DurativeSchema, InstantaneousSchema, Problem, Schema, TimingKind};
    use crate::state::Lit;

    /// Looks up an action by its formatted name.
    fn action_named<'a>(pb: &'a GroundProblem, name: &str) -> &'a GroundAction {
        let mut found = pb
            .actions
            .iter()
            .map(|a| &pb.actions[a])
            .filter(|a| pb.world.table.format(a.name.iter()) == name);
        let action = found.next().unwrap_or_else(|| panic!("No action named {name}"));
        assert!(found.next().is_none(), "Ambiguous name {name}");
        action
    }

    fn in_exec_atom(pb: &GroundProblem, sentinel: &str) -> SvId {
        let atom = [
            pb.world.table.id(IN_EXECUTION).unwrap(),
            pb.world.table.id(sentinel).unwrap(),
        ];
        pb.world.sv_id(&atom).unwrap()
    }

    /// One durative drive action with a start condition, a during effect
    /// and an end effect.
    fn drive_problem() -> Problem {
        let mut pb = Problem::new(10);
        let at_a = pb.add_fluent("at_a", vec![]).unwrap();
        let at_b = pb.add_fluent("at_b", vec![]).unwrap();
        let moving = pb.add_fluent("moving", vec![]).unwrap();
        let (at_a, at_b, moving) = (
            pb.fluent(at_a).clone(),
            pb.fluent(at_b).clone(),
            pb.fluent(moving).clone(),
        );

        let mut drive = DurativeSchema::new("drive", vec![], 3);
        drive.condition(TimingKind::Start, at_a.applied([]), true);
        drive.start_effect(moving.applied([]), true);
        drive.start_effect(at_a.applied([]), false);
        drive.end_effect(at_b.applied([]), true);
        drive.end_effect(moving.applied([]), false);
        pb.add_schema(Schema::Durative(drive)).unwrap();

        pb.set_initial(at_a.ground([]), true);
        pb.add_goal(at_b.ground([]));
        pb
    }

    #[test]
    fn split_shape() {
        let compiled = compile(&ground(&drive_problem()).unwrap()).unwrap();
        assert_eq!(compiled.actions.len(), 2);

        let start = action_named(&compiled, "(start_drive)");
        let end = action_named(&compiled, "(end_drive)");
        let in_exec = in_exec_atom(&compiled, "start-drive");

        // cross links
        let ActionKind::DurativeStart { duration, end: end_id } = start.kind else {
            panic!("expected a start half")
        };
        assert_eq!(duration, 3);
        let ActionKind::DurativeEnd { start: start_id } = end.kind else {
            panic!("expected an end half")
        };
        assert!(matches!(compiled.actions[end_id].kind, ActionKind::DurativeEnd { .. }));
        assert!(matches!(compiled.actions[start_id].kind, ActionKind::DurativeStart { .. }));

        // the start sets the sentinel and may not fire while already running
        assert!(start.add_eff.contains(&in_exec));
        assert!(start.neg_pre.contains(&in_exec));
        // the end requires and clears the sentinel
        assert!(end.pos_pre.contains(&in_exec));
        assert!(end.del_eff.contains(&in_exec));

        // the sentinel atom is initially false
        assert!(compiled.initial_state.entails(Lit::new(in_exec, false)));
    }

    #[test]
    fn overall_condition_established_by_start_effect_is_dropped() {
        let mut pb = Problem::new(10);
        let f = pb.add_fluent("f", vec![]).unwrap();
        let g = pb.add_fluent("g", vec![]).unwrap();
        let (f, g) = (pb.fluent(f).clone(), pb.fluent(g).clone());

        let mut act = DurativeSchema::new("act", vec![], 2);
        act.condition(TimingKind::OverAll, f.applied([]), true);
        act.condition(TimingKind::OverAll, g.applied([]), true);
        act.start_effect(f.applied([]), true);
        pb.add_schema(Schema::Durative(act)).unwrap();

        let compiled = compile(&ground(&pb).unwrap()).unwrap();
        let start = action_named(&compiled, "(start_act)");
        let f_sv = compiled.world.sv_id(&[compiled.world.table.id("f").unwrap()]).unwrap();
        let g_sv = compiled.world.sv_id(&[compiled.world.table.id("g").unwrap()]).unwrap();
        // f is established by the start effect, g must hold beforehand
        assert!(!start.pos_pre.contains(&f_sv));
        assert!(start.pos_pre.contains(&g_sv));
    }

    /// paint makes the piece wet while it runs; sand requires it dry
    /// throughout.
    fn paint_and_sand() -> Problem {
        let mut pb = Problem::new(10);
        let wet = pb.add_fluent("wet", vec![]).unwrap();
        let painted = pb.add_fluent("painted", vec![]).unwrap();
        let sanded = pb.add_fluent("sanded", vec![]).unwrap();
        let (wet, painted, sanded) = (
            pb.fluent(wet).clone(),
            pb.fluent(painted).clone(),
            pb.fluent(sanded).clone(),
        );

        let mut paint = DurativeSchema::new("paint", vec![], 2);
        paint.start_effect(wet.applied([]), true);
        paint.end_effect(painted.applied([]), true);
        pb.add_schema(Schema::Durative(paint)).unwrap();

        let mut sand = DurativeSchema::new("sand", vec![], 1);
        sand.condition(TimingKind::OverAll, wet.applied([]), false);
        sand.end_effect(sanded.applied([]), true);
        pb.add_schema(Schema::Durative(sand)).unwrap();

        pb.add_goal(painted.ground([]));
        pb.add_goal(sanded.ground([]));
        pb
    }

    #[test]
    fn hard_mutex_guards_both_starts() {
        let compiled = compile(&ground(&paint_and_sand()).unwrap()).unwrap();
        let start_paint = action_named(&compiled, "(start_paint)");
        let start_sand = action_named(&compiled, "(start_sand)");
        let in_paint = in_exec_atom(&compiled, "start-paint");
        let in_sand = in_exec_atom(&compiled, "start-sand");

        // sand's overall condition is clobbered by paint's start phase:
        // neither may begin while the other is in flight
        assert!(start_sand.neg_pre.contains(&in_paint));
        assert!(start_paint.neg_pre.contains(&in_sand));
    }

    /// A long action requiring f throughout, a short one clearing f when it
    /// completes.
    fn overall_vs_end_clobber() -> Problem {
        let mut pb = Problem::new(10);
        let f = pb.add_fluent("f", vec![]).unwrap();
        let done_a = pb.add_fluent("done_a", vec![]).unwrap();
        let (f, done_a) = (pb.fluent(f).clone(), pb.fluent(done_a).clone());

        let mut long = DurativeSchema::new("long", vec![], 3);
        long.condition(TimingKind::OverAll, f.applied([]), true);
        long.end_effect(done_a.applied([]), true);
        pb.add_schema(Schema::Durative(long)).unwrap();

        let mut short = DurativeSchema::new("short", vec![], 1);
        short.end_effect(f.applied([]), false);
        pb.add_schema(Schema::Durative(short)).unwrap();
        pb
    }

    #[test]
    fn soft_mutex_guards_end_and_orders_durations() {
        let compiled = compile(&ground(&overall_vs_end_clobber()).unwrap()).unwrap();
        let start_long = action_named(&compiled, "(start_long)");
        let start_short = action_named(&compiled, "(start_short)");
        let end_short = action_named(&compiled, "(end_short)");
        let end_long = action_named(&compiled, "(end_long)");
        let in_long = in_exec_atom(&compiled, "start-long");
        let in_short = in_exec_atom(&compiled, "start-short");

        // short may not complete while long is in flight
        assert!(end_short.neg_pre.contains(&in_long));
        // and, long being strictly longer, the pair cannot overlap at all
        assert!(start_long.neg_pre.contains(&in_short));
        assert!(start_short.neg_pre.contains(&in_long));
        // the soft mutex does not touch long's end
        assert!(!end_long.neg_pre.contains(&in_short));
    }

    #[test]
    fn instantaneous_only_problem_is_untouched_modulo_sentinels() {
        let mut pb = Problem::new(5);
        let f = pb.add_fluent("f", vec![]).unwrap();
        let f = pb.fluent(f).clone();
        let mut set = InstantaneousSchema::new("set", vec![]);
        set.effect(f.applied([]), true);
        pb.add_schema(Schema::Instantaneous(set)).unwrap();
        pb.add_goal(f.ground([]));

        let base = ground(&pb).unwrap();
        let compiled = compile(&base).unwrap();

        assert_eq!(compiled.actions.len(), base.actions.len());
        assert_eq!(compiled.world.num_atoms(), base.world.num_atoms());
        assert!(compiled.world.table.types.id_of(DURATIVE_OBJECT_TYPE).is_some());
        assert!(compiled.world.table.id(IN_EXECUTION).is_some());
        let set = action_named(&compiled, "(set)");
        assert!(set.neg_pre.is_empty());
        assert!(matches!(set.kind, ActionKind::Instantaneous));
    }

    #[test]
    fn conflicting_outcomes_guard_instantaneous_action() {
        let mut pb = Problem::new(10);
        let wet = pb.add_fluent("wet", vec![]).unwrap();
        let wet = pb.fluent(wet).clone();

        let mut paint = DurativeSchema::new("paint", vec![], 2);
        paint.start_effect(wet.applied([]), true);
        pb.add_schema(Schema::Durative(paint)).unwrap();

        let mut dry = InstantaneousSchema::new("dry", vec![]);
        dry.effect(wet.applied([]), false);
        pb.add_schema(Schema::Instantaneous(dry)).unwrap();

        let compiled = compile(&ground(&pb).unwrap()).unwrap();
        let dry = action_named(&compiled, "(dry)");
        let in_paint = in_exec_atom(&compiled, "start-paint");
        // dry deletes what paint adds: it may not fire while paint runs
        assert!(dry.neg_pre.contains(&in_paint));
    }

    #[test]
    fn combination_compilation() {
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

        let compiled = compile_for_combination(&ground(&pb).unwrap(), 2).unwrap();
        // a, b, noop and the (a, b) combination
        assert_eq!(compiled.actions.len(), 4);
        let comb = compiled
            .actions
            .iter()
            .find(|&id| matches!(compiled.actions[id].kind, ActionKind::Combination(_)))
            .unwrap();
        let ActionKind::Combination(ref parts) = compiled.actions[comb].kind else {
            unreachable!()
        };
        assert_eq!(parts.len(), 2);
        // each durative copy keeps its spans and knows its sentinel
        for &part in parts.iter() {
            let ActionKind::Durative { ref spans, .. } = compiled.actions[part].kind else {
                panic!("combination part is not durative")
            };
            let sv = spans.in_exec.unwrap();
            assert!(compiled.actions[part].neg_pre.contains(&sv));
            assert!(compiled.actions[part].del_eff.contains(&sv));
        }
        assert!(compiled
            .actions
            .iter()
            .any(|id| matches!(compiled.actions[id].kind, ActionKind::NoOp)));
    }

    #[test]
    fn mutex_pairs_are_not_combined() {
        let compiled = compile_for_combination(&ground(&paint_and_sand()).unwrap(), 2).unwrap();
        assert!(!compiled
            .actions
            .iter()
            .any(|id| matches!(compiled.actions[id].kind, ActionKind::Combination(_))));
    }
}
