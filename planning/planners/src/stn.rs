//! Simple temporal network over the committed actions of a plan.
//!
//! [`TemporalGraph`] is the difference-constraint core: time-points with
//! `[lb, ub]` domains relative to an origin, weighted edges `t_target −
//! t_source ≤ w`, and incremental propagation of earliest/latest times on
//! every insertion. [`Stn`] layers plan bookkeeping on top: one time-point
//! per committed event, fixed-duration links between the two halves of a
//! durative action, ordering with the previously committed event, and the
//! deadline as the upper bound of every node.

use hashbrown::HashMap;
use std::collections::VecDeque;
use taurus::IntCst;
use taurus_planning::actions::{AId, ActionKind, Actions};

/// Identifier of a time-point in a [`TemporalGraph`].
pub type Timepoint = u32;

type Edge = u32;

#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Debug)]
pub enum NetworkStatus {
    Consistent,
    Inconsistent,
}

#[derive(Copy, Clone, Debug)]
struct Constraint {
    source: Timepoint,
    target: Timepoint,
    weight: IntCst,
}

#[derive(Copy, Clone, Debug)]
struct Distance {
    /// Shortest path from the origin: latest time of the node.
    forward: IntCst,
    forward_pending: bool,
    /// Shortest path to the origin, negated: earliest time of the node.
    backward: IntCst,
    backward_pending: bool,
}

/// Incremental difference-constraint network.
///
/// The graph initially contains a single time-point, the origin, fixed at
/// `[0, 0]`. Edges carry upper-bound constraints `t_target − t_source ≤ w`;
/// each insertion triggers a bidirectional propagation that either tightens
/// the node domains or detects a negative cycle.
///
/// Once inconsistent, the network stays inconsistent: further insertions
/// are accepted but ignored.
#[derive(Clone)]
pub struct TemporalGraph {
    constraints: Vec<Constraint>,
    forward_edges: Vec<Vec<Edge>>,
    backward_edges: Vec<Vec<Edge>>,
    distances: Vec<Distance>,
    consistent: bool,
}

impl TemporalGraph {
    pub fn new() -> TemporalGraph {
        let mut graph = TemporalGraph {
            constraints: Vec::new(),
            forward_edges: Vec::new(),
            backward_edges: Vec::new(),
            distances: Vec::new(),
            consistent: true,
        };
        let origin = graph.add_node(0, 0);
        debug_assert_eq!(origin, graph.origin());
        graph
    }

    pub fn origin(&self) -> Timepoint {
        0
    }

    pub fn num_nodes(&self) -> u32 {
        self.distances.len() as u32
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// Earliest time of the node in any solution schedule.
    pub fn earliest(&self, node: Timepoint) -> IntCst {
        -self.distances[node as usize].backward
    }

    /// Latest time of the node in any solution schedule.
    pub fn latest(&self, node: Timepoint) -> IntCst {
        self.distances[node as usize].forward
    }

    /// Adds a new time-point with domain `[lb, ub]` relative to the origin.
    /// The domain is enforced by two internal edges, which participate in
    /// propagation like any other.
    ///
    /// Panics if `lb > ub`, so that adding a node keeps the network
    /// consistent.
    pub fn add_node(&mut self, lb: IntCst, ub: IntCst) -> Timepoint {
        assert!(lb <= ub);
        let id = self.num_nodes();
        self.forward_edges.push(Vec::new());
        self.backward_edges.push(Vec::new());
        self.distances.push(Distance {
            forward: ub,
            forward_pending: false,
            backward: -lb,
            backward_pending: false,
        });
        if id != self.origin() {
            self.record_constraint(Constraint {
                source: self.origin(),
                target: id,
                weight: ub,
            });
            self.record_constraint(Constraint {
                source: id,
                target: self.origin(),
                weight: -lb,
            });
        }
        id
    }

    /// Adds the constraint `t_target − t_source ≤ weight` and propagates.
    pub fn add_edge(&mut self, source: Timepoint, target: Timepoint, weight: IntCst) -> NetworkStatus {
        let edge = self.record_constraint(Constraint { source, target, weight });
        if !self.consistent {
            return NetworkStatus::Inconsistent;
        }
        let status = self.propagate(edge);
        if status == NetworkStatus::Inconsistent {
            self.consistent = false;
        }
        status
    }

    fn record_constraint(&mut self, c: Constraint) -> Edge {
        assert!(
            c.source < self.num_nodes() && c.target < self.num_nodes(),
            "Unrecorded node"
        );
        let id = self.constraints.len() as Edge;
        self.forward_edges[c.source as usize].push(id);
        self.backward_edges[c.target as usize].push(id);
        self.constraints.push(c);
        id
    }

    fn fdist(&self, n: Timepoint) -> IntCst {
        self.distances[n as usize].forward
    }
    fn bdist(&self, n: Timepoint) -> IntCst {
        self.distances[n as usize].backward
    }

    /// Incremental propagation after the activation of `edge`, in the style
    /// of Cesta & Oddi: a work queue of nodes whose forward or backward
    /// distance may have improved, with a negative-cycle check on every
    /// tightening.
    fn propagate(&mut self, edge: Edge) -> NetworkStatus {
        let mut queue = VecDeque::new();
        let c = self.constraints[edge as usize];
        queue.push_back(c.source);
        queue.push_back(c.target);
        self.distances[c.source as usize].forward_pending = true;
        self.distances[c.source as usize].backward_pending = true;
        self.distances[c.target as usize].forward_pending = true;
        self.distances[c.target as usize].backward_pending = true;

        while let Some(u) = queue.pop_front() {
            if self.distances[u as usize].forward_pending {
                for i in 0..self.forward_edges[u as usize].len() {
                    let out_edge = self.forward_edges[u as usize][i];
                    let c = self.constraints[out_edge as usize];
                    let previous = self.fdist(c.target);
                    let candidate = self.fdist(c.source) + c.weight;
                    if candidate < previous {
                        if candidate + self.bdist(c.target) < 0 {
                            return NetworkStatus::Inconsistent;
                        }
                        self.distances[c.target as usize].forward = candidate;
                        self.distances[c.target as usize].forward_pending = true;
                        if !queue.contains(&c.target) {
                            queue.push_back(c.target);
                        }
                    }
                }
            }
            if self.distances[u as usize].backward_pending {
                for i in 0..self.backward_edges[u as usize].len() {
                    let in_edge = self.backward_edges[u as usize][i];
                    let c = self.constraints[in_edge as usize];
                    let previous = self.bdist(c.source);
                    let candidate = self.bdist(c.target) + c.weight;
                    if candidate < previous {
                        if candidate + self.fdist(c.source) < 0 {
                            return NetworkStatus::Inconsistent;
                        }
                        self.distances[c.source as usize].backward = candidate;
                        self.distances[c.source as usize].backward_pending = true;
                        if !queue.contains(&c.source) {
                            queue.push_back(c.source);
                        }
                    }
                }
            }
            self.distances[u as usize].forward_pending = false;
            self.distances[u as usize].backward_pending = false;
        }
        NetworkStatus::Consistent
    }
}

impl Default for TemporalGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Temporal network of a (partial) plan.
///
/// Every committed action contributes its time-points, ordered after the
/// previously committed event; the two halves of a durative action are kept
/// exactly its duration apart; every node is bounded by the deadline.
/// Cloning gives the search its snapshots.
#[derive(Clone)]
pub struct Stn {
    graph: TemporalGraph,
    deadline: IntCst,
    /// End time-point of each in-flight durative action, keyed by the ID of
    /// the end action that will commit it.
    pending_ends: HashMap<AId, Timepoint>,
    /// Time-points of the committed events.
    committed: Vec<(AId, Timepoint)>,
}

impl Stn {
    pub fn new(deadline: IntCst) -> Stn {
        assert!(deadline >= 0, "Negative deadline");
        Stn {
            graph: TemporalGraph::new(),
            deadline,
            pending_ends: HashMap::new(),
            committed: Vec::new(),
        }
    }

    pub fn deadline(&self) -> IntCst {
        self.deadline
    }

    pub fn is_consistent(&self) -> bool {
        self.graph.is_consistent()
    }

    /// Earliest time of a committed event.
    pub fn earliest(&self, tp: Timepoint) -> IntCst {
        self.graph.earliest(tp)
    }

    /// Latest committed event in the earliest schedule, i.e. the time the
    /// plan has consumed so far.
    pub fn current_end_time(&self) -> IntCst {
        self.committed
            .iter()
            .map(|&(_, tp)| self.graph.earliest(tp))
            .max()
            .unwrap_or(0)
    }

    /// Records the temporal footprint of a committed action and returns the
    /// time-point of its event, to be passed as `prev` for the next commit.
    /// Consistency must be checked afterwards with [`Stn::is_consistent`].
    pub fn add_action(&mut self, actions: &Actions, a: AId, prev: Option<Timepoint>) -> Timepoint {
        let prev = prev.unwrap_or_else(|| self.graph.origin());
        match actions[a].kind {
            ActionKind::Instantaneous => {
                let tp = self.graph.add_node(0, self.deadline);
                self.order(prev, tp);
                self.committed.push((a, tp));
                tp
            }
            ActionKind::DurativeStart { duration, end } => {
                let start = self.graph.add_node(0, self.deadline);
                let end_tp = self.graph.add_node(0, self.deadline);
                self.fix_duration(start, end_tp, duration);
                self.order(prev, start);
                self.pending_ends.insert(end, end_tp);
                self.committed.push((a, start));
                start
            }
            ActionKind::DurativeEnd { .. } => {
                let end_tp = self
                    .pending_ends
                    .remove(&a)
                    .expect("End action committed without its start");
                self.order(prev, end_tp);
                self.committed.push((a, end_tp));
                end_tp
            }
            ActionKind::Durative { duration, .. } => {
                // in the combination setting the completion is not a
                // separate commitment: both time-points are placed at once
                let start = self.graph.add_node(0, self.deadline);
                let end_tp = self.graph.add_node(0, self.deadline);
                self.fix_duration(start, end_tp, duration);
                self.order(prev, start);
                self.committed.push((a, start));
                self.committed.push((a, end_tp));
                start
            }
            ActionKind::Combination(ref parts) => {
                let start = self.graph.add_node(0, self.deadline);
                self.order(prev, start);
                for &part in parts {
                    let duration = actions[part].duration(actions);
                    let end_tp = self.graph.add_node(0, self.deadline);
                    self.fix_duration(start, end_tp, duration);
                    self.committed.push((part, end_tp));
                }
                self.committed.push((a, start));
                start
            }
            ActionKind::NoOp => prev,
        }
    }

    /// `tp` happens at or after `prev`.
    fn order(&mut self, prev: Timepoint, tp: Timepoint) {
        self.graph.add_edge(tp, prev, 0);
    }

    /// `end` happens exactly `duration` after `start`.
    fn fix_duration(&mut self, start: Timepoint, end: Timepoint, duration: IntCst) {
        self.graph.add_edge(start, end, duration);
        self.graph.add_edge(end, start, -duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taurus_planning::actions::GroundAction;
    use taurus::model::symbols::SymId;

    #[test]
    fn propagation_and_negative_cycle() {
        let mut g = TemporalGraph::new();
        let a = g.add_node(0, 10);
        let b = g.add_node(0, 10);
        assert_eq!((g.earliest(a), g.latest(a)), (0, 10));

        assert_eq!(g.add_edge(g.origin(), a, 1), NetworkStatus::Consistent);
        assert_eq!((g.earliest(a), g.latest(a)), (0, 1));

        // b at least 6 after a: t_a - t_b <= -6
        assert_eq!(g.add_edge(b, a, -6), NetworkStatus::Consistent);
        assert_eq!(g.earliest(b), 6);

        // b at most 2 after a: together with the previous edge, a cycle of
        // weight -6 + 2 < 0
        assert_eq!(g.add_edge(a, b, 2), NetworkStatus::Inconsistent);
        assert!(!g.is_consistent());
        // inconsistency is sticky
        assert_eq!(g.add_edge(g.origin(), b, 9), NetworkStatus::Inconsistent);
    }

    fn instantaneous(name: usize) -> GroundAction {
        GroundAction {
            name: Box::new([SymId::from(name)]),
            pos_pre: vec![],
            neg_pre: vec![],
            add_eff: vec![],
            del_eff: vec![],
            prob_eff: vec![],
            kind: ActionKind::Instantaneous,
        }
    }

    fn durative_pair(actions: &mut Actions, name: usize, duration: IntCst) -> (AId, AId) {
        let start_expected = AId::from(actions.len());
        let end_expected = AId::from(actions.len() + 1);
        let start_id = actions.push(GroundAction {
            name: Box::new([SymId::from(name)]),
            pos_pre: vec![],
            neg_pre: vec![],
            add_eff: vec![],
            del_eff: vec![],
            prob_eff: vec![],
            kind: ActionKind::DurativeStart {
                duration,
                end: end_expected,
            },
        });
        let end_id = actions.push(GroundAction {
            name: Box::new([SymId::from(name + 1)]),
            pos_pre: vec![],
            neg_pre: vec![],
            add_eff: vec![],
            del_eff: vec![],
            prob_eff: vec![],
            kind: ActionKind::DurativeEnd { start: start_id },
        });
        assert_eq!((start_id, end_id), (start_expected, end_expected));
        (start_id, end_id)
    }

    #[test]
    fn committed_durative_schedule() {
        let mut actions = Actions::new();
        let (start, end) = durative_pair(&mut actions, 0, 3);
        let mut stn = Stn::new(10);

        let start_tp = stn.add_action(&actions, start, None);
        assert!(stn.is_consistent());
        assert_eq!(stn.earliest(start_tp), 0);
        assert_eq!(stn.current_end_time(), 0);

        let end_tp = stn.add_action(&actions, end, Some(start_tp));
        assert!(stn.is_consistent());
        assert_eq!(stn.earliest(end_tp), 3);
        assert_eq!(stn.current_end_time(), 3);
    }

    #[test]
    fn deadline_makes_overlong_chain_inconsistent() {
        let mut actions = Actions::new();
        let (s1, e1) = durative_pair(&mut actions, 0, 6);
        let (s2, e2) = durative_pair(&mut actions, 2, 6);
        let mut stn = Stn::new(10);

        let tp = stn.add_action(&actions, s1, None);
        let tp = stn.add_action(&actions, e1, Some(tp));
        assert!(stn.is_consistent());
        assert_eq!(stn.current_end_time(), 6);

        // the second start must follow the first end (prev chain), so its
        // end lands at 12 > deadline
        let tp = stn.add_action(&actions, s2, Some(tp));
        assert!(!stn.is_consistent());
        let _ = (tp, e2);
    }

    #[test]
    fn instantaneous_chain_keeps_order() {
        let mut actions = Actions::new();
        let a = actions.push(instantaneous(0));
        let b = actions.push(instantaneous(1));
        let mut stn = Stn::new(5);
        let tp_a = stn.add_action(&actions, a, None);
        let tp_b = stn.add_action(&actions, b, Some(tp_a));
        assert!(stn.is_consistent());
        assert_eq!(stn.earliest(tp_a), 0);
        assert_eq!(stn.earliest(tp_b), 0);
        assert_eq!(stn.current_end_time(), 0);
    }
}
