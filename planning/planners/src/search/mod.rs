//! Monte-Carlo tree search over a planning MDP.
//!
//! The tree alternates state nodes and action nodes (see [`node`]). One
//! search trajectory runs selection (UCT), expansion (bootstrapped with the
//! estimator), and backup along the visited path; trajectories repeat until
//! the wall-clock budget is exhausted, and the budget is only checked
//! between trajectories. In temporal search every node carries a snapshot
//! of the temporal network, and actions whose extension is inconsistent are
//! pruned when a state node is built.

pub mod node;

use crate::heuristics::Estimator;
use crate::mdp::Mdp;
use crate::stn::{Stn, Timepoint};
use crate::DEAD_END_PENALTY;
use node::{ANode, AnId, SNode, SnId, Tree};
use std::time::{Duration, Instant};
use taurus::IntCst;
use taurus_planning::actions::AId;

/// How state-node values aggregate the rewards sampled below them.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SelectionKind {
    /// Accumulate every sampled reward (UCT averages them).
    Avg,
    /// Initialise each action with its one-step bootstrapped value and keep
    /// the state value at the max of the children's averages.
    Max,
}

/// Knobs of one search, extracted from the planner configuration.
#[derive(Clone, Debug)]
pub struct SearchParams {
    pub search_depth: u32,
    pub exploration_constant: f64,
    pub selection: SelectionKind,
}

/// One search, rooted at the state the planner is about to act from.
pub struct Mcts<'e, M: Mdp> {
    tree: Tree<M::State>,
    root: SnId,
    params: SearchParams,
    estimator: &'e mut dyn Estimator<M>,
}

impl<'e, M: Mdp> Mcts<'e, M> {
    /// Builds a search rooted at `state`. In temporal mode, `stn` is the
    /// driver's network up to this state and `prev` the time-point of the
    /// last committed event.
    pub fn new(
        mdp: &mut M,
        estimator: &'e mut dyn Estimator<M>,
        state: M::State,
        stn: Option<Stn>,
        prev: Option<Timepoint>,
        params: SearchParams,
    ) -> Mcts<'e, M> {
        let mut tree = Tree::new();
        let root = make_snode(&mut tree, mdp, estimator, &params, state, 0, stn, prev, None);
        Mcts {
            tree,
            root,
            params,
            estimator,
        }
    }

    /// Rebuilds a search from a subtree extracted by [`Mcts::take_subtree`]
    /// after the previous commitment.
    pub fn resume(
        tree: Tree<M::State>,
        root: SnId,
        estimator: &'e mut dyn Estimator<M>,
        params: SearchParams,
    ) -> Mcts<'e, M> {
        Mcts {
            tree,
            root,
            params,
            estimator,
        }
    }

    pub fn root_node(&self) -> &SNode<M::State> {
        &self.tree.snodes[self.root]
    }

    pub fn anode(&self, id: AnId) -> &ANode<M::State> {
        &self.tree.anodes[id]
    }

    /// Runs trajectories until the wall-clock budget is exhausted, then
    /// returns the root action with the highest accumulated value, or
    /// `None` when the root has no possible action. In-flight trajectories
    /// always complete: the budget is soft by up to one trajectory.
    pub fn search(&mut self, mdp: &mut M, budget: Duration) -> Option<AId> {
        if self.tree.snodes[self.root].possible.is_empty() {
            return None;
        }
        let start = Instant::now();
        let mut trajectories = 0u64;
        while start.elapsed() < budget {
            self.trajectory(mdp, self.root);
            trajectories += 1;
        }
        tracing::trace!(trajectories, "search budget exhausted");
        self.best_action()
    }

    /// Deterministic variant of [`Mcts::search`]: a fixed number of
    /// trajectories instead of a wall-clock budget, so that a fixed seed
    /// yields a fixed decision.
    pub fn search_trajectories(&mut self, mdp: &mut M, trajectories: u64) -> Option<AId> {
        if self.tree.snodes[self.root].possible.is_empty() {
            return None;
        }
        for _ in 0..trajectories {
            self.trajectory(mdp, self.root);
        }
        self.best_action()
    }

    /// The root action with the highest accumulated value (not average, not
    /// visit count); ties break on the first encountered.
    pub fn best_action(&self) -> Option<AId> {
        let root = &self.tree.snodes[self.root];
        let mut best: Option<AId> = None;
        let mut best_value = f64::NEG_INFINITY;
        for &(action, an) in &root.children {
            let value = self.tree.anodes[an].value;
            if value > best_value {
                best_value = value;
                best = Some(action);
            }
        }
        best
    }

    /// After committing `action` and observing `next`, extracts the
    /// matching child subtree to serve as the next root (depth rebased to
    /// 0). Returns `None` when the successor was never expanded; the rest
    /// of the tree is dropped either way.
    pub fn take_subtree(&self, action: AId, next: &M::State) -> Option<(Tree<M::State>, SnId)> {
        let an = self.tree.snodes[self.root].child(action)?;
        let child = *self.tree.anodes[an].children.get(next)?;
        Some(self.tree.extract(child))
    }

    /// Reference clock of a node: the end time of its temporal network, or
    /// the state clock in non-temporal search.
    fn clock_of(&self, mdp: &M, id: SnId) -> IntCst {
        let node = &self.tree.snodes[id];
        match &node.stn {
            Some(stn) => stn.current_end_time(),
            None => mdp.clock(&node.state),
        }
    }

    /// One selection/expansion/backup trajectory from `id`; returns the
    /// sampled discounted reward.
    fn trajectory(&mut self, mdp: &mut M, id: SnId) -> f64 {
        let clock = self.clock_of(mdp, id);
        if self.tree.snodes[id].possible.is_empty() || clock > mdp.deadline() {
            return DEAD_END_PENALTY;
        }
        if self.tree.snodes[id].depth > self.params.search_depth {
            let state = self.tree.snodes[id].state.clone();
            return self.estimator.estimate(mdp, &state, clock);
        }

        let action = self.uct(id);
        let an = self.tree.snodes[id].child(action).expect("child per possible action");
        let state = self.tree.snodes[id].state.clone();
        let step = mdp.step(&state, action);
        let mut reward = step.reward;

        if !step.terminal {
            if let Some(&child) = self.tree.anodes[an].children.get(&step.state) {
                reward += mdp.discount() * self.trajectory(mdp, child);
            } else {
                let stn = self.tree.anodes[an].stn.clone();
                let prev = self.tree.anodes[an].prev;
                let depth = self.tree.snodes[id].depth + 1;
                let child = make_snode(
                    &mut self.tree,
                    mdp,
                    self.estimator,
                    &self.params,
                    step.state.clone(),
                    depth,
                    stn,
                    prev,
                    Some(an),
                );
                self.tree.anodes[an].children.insert(step.state.clone(), child);
                let clock = self.clock_of(mdp, child);
                reward += mdp.discount() * self.estimator.estimate(mdp, &step.state, clock);
            }
        }

        match self.params.selection {
            SelectionKind::Avg => {
                self.tree.snodes[id].update(reward);
                self.tree.anodes[an].update(reward);
            }
            SelectionKind::Max => {
                self.tree.anodes[an].update(reward);
                self.tree.snodes[id].count += 1;
                self.max_update(id);
            }
        }
        reward
    }

    /// Sets a state node's value to the max of its children's averages.
    fn max_update(&mut self, id: SnId) {
        let best = self.tree.snodes[id]
            .children
            .iter()
            .map(|&(_, an)| {
                let child = &self.tree.anodes[an];
                child.value / child.count as f64
            })
            .fold(f64::NEG_INFINITY, f64::max);
        if best.is_finite() {
            self.tree.snodes[id].value = best;
        }
    }

    /// UCB1 selection over the node's possible actions; an unvisited child
    /// is taken immediately, ties break on the first encountered.
    fn uct(&self, id: SnId) -> AId {
        let node = &self.tree.snodes[id];
        let mut best: Option<AId> = None;
        let mut best_ub = f64::NEG_INFINITY;
        for &(action, an) in &node.children {
            let child = &self.tree.anodes[an];
            if child.count == 0 {
                return action;
            }
            let exploit = child.value / child.count as f64;
            let explore = ((node.count as f64).ln() / child.count as f64).sqrt();
            let ub = exploit + self.params.exploration_constant * explore;
            if ub > best_ub {
                best_ub = ub;
                best = Some(action);
            }
        }
        best.expect("UCT on a node without possible actions")
    }
}

/// Builds a state node and one action-node child per possible action.
///
/// In temporal search, each candidate action extends a clone of the node's
/// network; actions whose extension is inconsistent are dropped from the
/// possible set and never reconsidered at this node. With max selection,
/// every child is eagerly evaluated once and the node value starts at the
/// best of them.
#[allow(clippy::too_many_arguments)]
fn make_snode<M: Mdp>(
    tree: &mut Tree<M::State>,
    mdp: &mut M,
    estimator: &mut dyn Estimator<M>,
    params: &SearchParams,
    state: M::State,
    depth: u32,
    stn: Option<Stn>,
    prev: Option<Timepoint>,
    parent: Option<AnId>,
) -> SnId {
    let legal = mdp.legal_actions(&state);
    let mut possible = Vec::with_capacity(legal.len());
    let mut extensions = Vec::with_capacity(legal.len());
    for action in legal {
        match &stn {
            Some(base) => {
                let mut ext = base.clone();
                let tp = ext.add_action(mdp.actions(), action, prev);
                if ext.is_consistent() {
                    possible.push(action);
                    extensions.push((action, Some(ext), Some(tp)));
                }
            }
            None => {
                possible.push(action);
                extensions.push((action, None, None));
            }
        }
    }

    let id = tree.snodes.push(SNode {
        state,
        depth,
        parent,
        children: Vec::with_capacity(extensions.len()),
        possible,
        count: 1,
        value: 0.0,
        stn,
        prev,
    });
    for (action, ext, tp) in extensions {
        let an = tree.anodes.push(ANode {
            action,
            parent: id,
            children: hashbrown::HashMap::new(),
            count: 1,
            value: 0.0,
            stn: ext,
            prev: tp,
        });
        tree.snodes[id].children.push((action, an));
    }

    if params.selection == SelectionKind::Max {
        let children = tree.snodes[id].children.clone();
        let mut best = f64::NEG_INFINITY;
        for (action, an) in children {
            let state = tree.snodes[id].state.clone();
            let step = mdp.step(&state, action);
            let clock = match &tree.anodes[an].stn {
                Some(stn) => stn.current_end_time(),
                None => mdp.clock(&step.state),
            };
            let value = if step.terminal {
                step.reward
            } else {
                step.reward + mdp.discount() * estimator.estimate(mdp, &step.state, clock)
            };
            tree.anodes[an].value = value;
            best = best.max(value);
        }
        if best.is_finite() {
            tree.snodes[id].value = best;
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::TrpgEstimator;
    use crate::mdp::GroundMdp;
    use std::sync::Arc;
    use taurus_planning::compile::compile;
    use taurus_planning::grounding::ground;
    use taurus_planning::problem::{InstantaneousSchema, Problem, Schema};

    /// Three independent switches, one of which is the goal.
    fn switches_problem() -> Problem {
        let mut pb = Problem::new(10);
        let mut fluents = Vec::new();
        for name in ["s1", "s2", "s3"] {
            let f = pb.add_fluent(name, vec![]).unwrap();
            fluents.push(pb.fluent(f).clone());
        }
        for (i, f) in fluents.iter().enumerate() {
            let mut set = InstantaneousSchema::new(format!("set{}", i + 1), vec![]);
            set.effect(f.applied([]), true);
            pb.add_schema(Schema::Instantaneous(set)).unwrap();
        }
        pb.add_goal(fluents[2].ground([]));
        pb
    }

    fn params(selection: SelectionKind) -> SearchParams {
        SearchParams {
            search_depth: 5,
            exploration_constant: std::f64::consts::SQRT_2,
            selection,
        }
    }

    #[test]
    fn every_root_action_gets_sampled() {
        let compiled = Arc::new(compile(&ground(&switches_problem()).unwrap()).unwrap());
        let mut mdp = GroundMdp::new(compiled.clone(), 0.95, 3);
        let mut estimator = TrpgEstimator;
        let s0 = mdp.initial_state();
        let mut mcts = Mcts::new(&mut mdp, &mut estimator, s0, None, None, params(SelectionKind::Avg));
        let chosen = mcts.search(&mut mdp, Duration::from_millis(100));
        assert!(chosen.is_some());

        let root = mcts.root_node();
        assert_eq!(root.children.len(), root.possible.len());
        assert_eq!(root.children.len(), 3);
        for &(_, an) in &root.children {
            assert!(mcts.tree.anodes[an].count >= 1);
        }
        // count bookkeeping: the root counts its initial visit plus one per
        // trajectory through it
        let child_counts: u32 = root.children.iter().map(|&(_, an)| mcts.tree.anodes[an].count).sum();
        assert_eq!(root.count, 1 + child_counts - root.children.len() as u32);
    }

    #[test]
    fn search_prefers_the_goal_action() {
        let compiled = Arc::new(compile(&ground(&switches_problem()).unwrap()).unwrap());
        let mut mdp = GroundMdp::new(compiled.clone(), 0.95, 3);
        let mut estimator = TrpgEstimator;
        let s0 = mdp.initial_state();
        for selection in [SelectionKind::Avg, SelectionKind::Max] {
            let mut mcts = Mcts::new(
                &mut mdp,
                &mut estimator,
                s0.clone(),
                None,
                None,
                params(selection),
            );
            let chosen = mcts.search(&mut mdp, Duration::from_millis(100)).unwrap();
            let name = compiled.world.table.format(compiled.actions[chosen].name.iter());
            assert_eq!(name, "(set3)", "selection {selection:?}");
        }
    }

    #[test]
    fn root_reuse_extracts_the_observed_successor() {
        let compiled = Arc::new(compile(&ground(&switches_problem()).unwrap()).unwrap());
        let mut mdp = GroundMdp::new(compiled.clone(), 0.95, 3);
        let mut estimator = TrpgEstimator;
        let s0 = mdp.initial_state();
        let mut mcts = Mcts::new(&mut mdp, &mut estimator, s0.clone(), None, None, params(SelectionKind::Avg));
        mcts.search(&mut mdp, Duration::from_millis(50)).unwrap();
        // commit a non-goal action: its unique successor is not terminal, so
        // the search must have expanded it
        let set1 = compiled
            .actions
            .iter()
            .find(|&a| compiled.world.table.format(compiled.actions[a].name.iter()) == "(set1)")
            .unwrap();
        let step = mdp.step(&s0, set1);
        assert!(!step.terminal);
        if let Some((tree, root)) = mcts.take_subtree(set1, &step.state) {
            assert_eq!(tree.snodes[root].depth, 0);
            assert_eq!(tree.snodes[root].state, step.state);
        } else {
            panic!("deterministic successor should have been expanded");
        }
    }
}
