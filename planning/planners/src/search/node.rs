//! Arena-allocated search tree.
//!
//! The tree alternates state nodes and action nodes. Parent/child and
//! cross references are integer handles into the arena, so the cyclic
//! structure needs no reference counting; extracting a subtree for root
//! reuse copies the reachable nodes into a fresh arena.

use crate::stn::{Stn, Timepoint};
use hashbrown::HashMap;
use std::hash::Hash;
use taurus::collections::ref_store::RefVec;
use taurus::create_ref_type;
use taurus_planning::actions::AId;

create_ref_type!(SnId);
create_ref_type!(AnId);

impl std::fmt::Debug for SnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sn{}", usize::from(*self))
    }
}
impl std::fmt::Debug for AnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "an{}", usize::from(*self))
    }
}

/// A state node: the visit statistics of a state at a given depth, with one
/// action-node child per possible action.
pub struct SNode<S> {
    pub state: S,
    pub depth: u32,
    pub parent: Option<AnId>,
    /// One child per entry of `possible`, in the same order.
    pub children: Vec<(AId, AnId)>,
    /// Applicable actions whose temporal extension is consistent. Actions
    /// filtered out here are never reconsidered at this node.
    pub possible: Vec<AId>,
    pub count: u32,
    pub value: f64,
    /// Snapshot of the temporal network up to this node, in temporal search.
    pub stn: Option<Stn>,
    /// Time-point of the last event on the path to this node.
    pub prev: Option<Timepoint>,
}

/// An action node: the visit statistics of an action at a state node, with
/// one state-node child per successor state observed so far.
pub struct ANode<S> {
    pub action: AId,
    pub parent: SnId,
    pub children: HashMap<S, SnId>,
    pub count: u32,
    pub value: f64,
    /// The parent's network extended by this action's footprint.
    pub stn: Option<Stn>,
    /// Time-point of this action's event.
    pub prev: Option<Timepoint>,
}

impl<S> SNode<S> {
    pub fn update(&mut self, reward: f64) {
        self.value += reward;
        self.count += 1;
    }

    pub fn child(&self, action: AId) -> Option<AnId> {
        self.children.iter().find(|&&(a, _)| a == action).map(|&(_, an)| an)
    }
}

impl<S> ANode<S> {
    pub fn update(&mut self, reward: f64) {
        self.value += reward;
        self.count += 1;
    }
}

pub struct Tree<S> {
    pub snodes: RefVec<SnId, SNode<S>>,
    pub anodes: RefVec<AnId, ANode<S>>,
}

impl<S: Clone + Eq + Hash> Tree<S> {
    pub fn new() -> Tree<S> {
        Tree {
            snodes: RefVec::new(),
            anodes: RefVec::new(),
        }
    }

    /// Copies the subtree rooted at `root` into a fresh arena, rebasing
    /// depths so that `root` becomes a depth-0 root. Everything outside the
    /// subtree is dropped.
    pub fn extract(&self, root: SnId) -> (Tree<S>, SnId) {
        let mut out = Tree::new();
        let base_depth = self.snodes[root].depth;
        let new_root = self.copy_snode(root, base_depth, None, &mut out);
        (out, new_root)
    }

    fn copy_snode(&self, id: SnId, base_depth: u32, parent: Option<AnId>, out: &mut Tree<S>) -> SnId {
        let node = &self.snodes[id];
        let new_id = out.snodes.push(SNode {
            state: node.state.clone(),
            depth: node.depth - base_depth,
            parent,
            children: Vec::with_capacity(node.children.len()),
            possible: node.possible.clone(),
            count: node.count,
            value: node.value,
            stn: node.stn.clone(),
            prev: node.prev,
        });
        for &(action, an) in &node.children {
            let new_an = self.copy_anode(an, base_depth, new_id, out);
            out.snodes[new_id].children.push((action, new_an));
        }
        new_id
    }

    fn copy_anode(&self, id: AnId, base_depth: u32, parent: SnId, out: &mut Tree<S>) -> AnId {
        let node = &self.anodes[id];
        let new_id = out.anodes.push(ANode {
            action: node.action,
            parent,
            children: HashMap::with_capacity(node.children.len()),
            count: node.count,
            value: node.value,
            stn: node.stn.clone(),
            prev: node.prev,
        });
        for (state, &child) in &node.children {
            let new_child = self.copy_snode(child, base_depth, Some(new_id), out);
            out.anodes[new_id].children.insert(state.clone(), new_child);
        }
        new_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(state: u32, depth: u32, parent: Option<AnId>) -> SNode<u32> {
        SNode {
            state,
            depth,
            parent,
            children: Vec::new(),
            possible: Vec::new(),
            count: 1,
            value: 0.0,
            stn: None,
            prev: None,
        }
    }

    #[test]
    fn extraction_rebases_depth() {
        let mut tree: Tree<u32> = Tree::new();
        let root = tree.snodes.push(leaf(0, 0, None));
        let an = tree.anodes.push(ANode {
            action: AId::from(0usize),
            parent: root,
            children: HashMap::new(),
            count: 3,
            value: 1.5,
            stn: None,
            prev: None,
        });
        tree.snodes[root].children.push((AId::from(0usize), an));
        tree.snodes[root].possible.push(AId::from(0usize));
        let child = tree.snodes.push(leaf(7, 1, Some(an)));
        tree.anodes[an].children.insert(7, child);
        let grandchild_an = tree.anodes.push(ANode {
            action: AId::from(1usize),
            parent: child,
            children: HashMap::new(),
            count: 1,
            value: 0.0,
            stn: None,
            prev: None,
        });
        tree.snodes[child].children.push((AId::from(1usize), grandchild_an));

        let (sub, new_root) = tree.extract(child);
        assert_eq!(sub.snodes[new_root].depth, 0);
        assert_eq!(sub.snodes[new_root].state, 7);
        assert_eq!(sub.snodes[new_root].parent, None);
        assert_eq!(sub.snodes[new_root].children.len(), 1);
        // the rest of the original tree is not carried over
        assert_eq!(sub.snodes.len(), 1);
        assert_eq!(sub.anodes.len(), 1);
    }
}
