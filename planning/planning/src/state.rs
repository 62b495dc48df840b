use crate::actions::AId;
use crate::problem::Fluent;
use anyhow::Result;
use itertools::Itertools;
use std::fmt::{Display, Error, Formatter};
use std::hash::{DefaultHasher, Hash, Hasher};
use taurus::collections::ref_store::RefPool;
use taurus::create_ref_type;
use taurus::model::symbols::{SymId, SymbolTable};
use taurus::IntCst;

create_ref_type!(SvId);

impl std::fmt::Debug for SvId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sv{}", usize::from(*self))
    }
}

/// Literal: association of a boolean state variable (i.e. a ground atom) to
/// a boolean value. The packing keeps the literal usable as a dense array
/// index: the two polarities of a state variable occupy adjacent slots.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Lit {
    inner: std::num::NonZeroU32,
}

impl Lit {
    /// Creates a new (boolean) literal by associating a state variable
    /// with a boolean value.
    pub fn new(sv: SvId, value: bool) -> Lit {
        let sv_usize: usize = sv.into();
        let sv_part: usize = (sv_usize + 1usize) << 1;
        let x = (sv_part as u32) + (value as u32);
        let nz = std::num::NonZeroU32::new(x).unwrap();
        Lit { inner: nz }
    }

    /// Returns the state-variable part of the literal.
    pub fn var(self) -> SvId {
        SvId::from((self.inner.get() as usize >> 1) - 1usize)
    }

    /// Returns the value taken by the literal.
    pub fn val(self) -> bool {
        (self.inner.get() & 1u32) != 0u32
    }
}

impl std::ops::Not for Lit {
    type Output = Lit;
    fn not(self) -> Self::Output {
        Lit::new(self.var(), !self.val())
    }
}

impl From<Lit> for usize {
    fn from(lit: Lit) -> Self {
        lit.inner.get() as usize - 2usize
    }
}
impl From<usize> for Lit {
    fn from(x: usize) -> Self {
        Lit {
            inner: std::num::NonZeroU32::new(x as u32 + 2u32).unwrap(),
        }
    }
}

/// Composition of a state-variable ID and its defining world, allowing
/// lookups in the world to implement Display.
pub struct DispSv<'a>(pub SvId, pub &'a World);

impl<'a> Display for DispSv<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "(")?;
        let mut it = self.1.sv_of(self.0).iter().peekable();
        while let Some(x) = it.next() {
            write!(f, "{}", self.1.table.symbol(*x))?;
            if it.peek().is_some() {
                write!(f, " ")?;
            }
        }
        write!(f, ")")?;
        Ok(())
    }
}

/// Keeps track of all ground atoms (state variables) that can appear in a
/// state.
///
/// A ground atom is an s-expression of symbols such as `(at bob kitchen)`
/// where `at` is a fluent and `bob` and `kitchen` are its two parameters.
/// Each atom is interned to a dense [`SvId`].
///
/// The world owns the symbol table and remains extensible: the compiler
/// interns the `inExecution` atoms of its sentinel objects after the
/// initial enumeration.
#[derive(Clone, Debug)]
pub struct World {
    pub table: SymbolTable,
    expressions: RefPool<SvId, Box<[SymId]>>,
}

impl World {
    /// Constructs a new World by enumerating all ground atoms that can be
    /// built from the given fluents and the instances in the symbol table.
    pub fn new(table: SymbolTable, fluents: &[Fluent]) -> Result<Self> {
        let mut world = World {
            table,
            expressions: Default::default(),
        };
        for fluent in fluents {
            world.enumerate_atoms_of(fluent);
        }
        Ok(world)
    }

    fn enumerate_atoms_of(&mut self, fluent: &Fluent) {
        if fluent.signature.is_empty() {
            self.intern(Box::new([fluent.sym]));
            return;
        }
        let instances: Vec<Vec<SymId>> = fluent
            .signature
            .iter()
            .map(|tpe| self.table.instances_of_type(*tpe).to_vec())
            .collect();
        let combinations: Vec<Vec<SymId>> = instances
            .into_iter()
            .multi_cartesian_product()
            .collect();
        for args in combinations {
            let mut sv = Vec::with_capacity(args.len() + 1);
            sv.push(fluent.sym);
            sv.extend(args);
            self.intern(sv.into_boxed_slice());
        }
    }

    /// Interns a ground atom, returning its ID. Returns the existing ID if
    /// the atom was already known.
    pub fn intern(&mut self, sv: Box<[SymId]>) -> SvId {
        match self.expressions.get_ref(&sv) {
            Some(id) => id,
            None => self.expressions.push(sv),
        }
    }

    /// Retrieves the ID of a given ground atom. Returns None if no such atom
    /// is known.
    pub fn sv_id(&self, sv: &[SymId]) -> Option<SvId> {
        self.expressions.get_ref(sv)
    }

    /// Returns the ground atom associated with the given ID.
    pub fn sv_of(&self, sv: SvId) -> &[SymId] {
        self.expressions.get(sv)
    }

    pub fn num_atoms(&self) -> usize {
        self.expressions.len()
    }

    pub fn atoms(&self) -> impl Iterator<Item = SvId> {
        self.expressions.keys()
    }
}

/// State: the set of ground atoms that are currently true. Any atom not in
/// the set is false (closed world).
///
/// Stored as a sorted slice of interned IDs with a cached hash: states are
/// used as keys in the successor maps of the search tree, so hashing must be
/// cheap and equality must be cheap to refute.
#[derive(Clone, Eq)]
pub struct State {
    svs: Box<[SvId]>,
    hash: u64,
}

impl State {
    pub fn new(svs: impl IntoIterator<Item = SvId>) -> State {
        let mut svs: Vec<SvId> = svs.into_iter().collect();
        svs.sort_unstable();
        svs.dedup();
        let svs = svs.into_boxed_slice();
        let hash = Self::hash_of(&svs);
        State { svs, hash }
    }

    fn hash_of(svs: &[SvId]) -> u64 {
        let mut hasher = DefaultHasher::new();
        svs.hash(&mut hasher);
        hasher.finish()
    }

    pub fn contains(&self, sv: SvId) -> bool {
        self.svs.binary_search(&sv).is_ok()
    }

    pub fn entails(&self, lit: Lit) -> bool {
        self.contains(lit.var()) == lit.val()
    }

    /// True iff every atom of `svs` is true in this state.
    pub fn contains_all(&self, svs: &[SvId]) -> bool {
        svs.iter().all(|&sv| self.contains(sv))
    }

    /// True iff no atom of `svs` is true in this state.
    pub fn disjoint(&self, svs: &[SvId]) -> bool {
        svs.iter().all(|&sv| !self.contains(sv))
    }

    /// Returns the state resulting from applying the given add and delete
    /// sets to this state. Deletes are applied after adds.
    pub fn apply(
        &self,
        adds: impl IntoIterator<Item = SvId>,
        dels: impl IntoIterator<Item = SvId>,
    ) -> State {
        let mut svs: Vec<SvId> = self.svs.to_vec();
        svs.extend(adds);
        svs.sort_unstable();
        svs.dedup();
        let dels: Vec<SvId> = dels.into_iter().collect();
        svs.retain(|sv| !dels.contains(sv));
        let svs = svs.into_boxed_slice();
        let hash = Self::hash_of(&svs);
        State { svs, hash }
    }

    /// Atoms that are true in this state, in increasing ID order.
    pub fn entailed(&self) -> impl Iterator<Item = SvId> + '_ {
        self.svs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.svs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.svs.is_empty()
    }

    pub fn displayable<'a>(&'a self, world: &'a World) -> impl Display + 'a {
        FullState(self, world)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.svs == other.svs
    }
}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.svs.iter().map(|sv| usize::from(*sv)).format(", "))
    }
}

struct FullState<'a>(&'a State, &'a World);

impl<'a> Display for FullState<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        for sv in self.0.entailed() {
            writeln!(f, "{}", DispSv(sv, self.1))?;
        }
        Ok(())
    }
}

/// An in-flight durative action: the action together with the time left
/// until its completion.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct QueueNode {
    pub remaining: IntCst,
    pub action: AId,
}

/// The executing actions of a [`CombinationState`], ordered by increasing
/// remaining duration.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ActiveQueue {
    entries: Vec<QueueNode>,
}

impl ActiveQueue {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, node: QueueNode) {
        let pos = self.entries.partition_point(|n| *n <= node);
        self.entries.insert(pos, node);
    }

    /// Smallest remaining duration among the executing actions.
    pub fn min_remaining(&self) -> Option<IntCst> {
        self.entries.first().map(|n| n.remaining)
    }

    /// Removes and returns all actions whose remaining duration is the
    /// minimum, and decrements the remaining duration of the others by that
    /// minimum.
    pub fn drain_completed(&mut self) -> (IntCst, Vec<AId>) {
        let Some(delta) = self.min_remaining() else {
            return (0, Vec::new());
        };
        let completed = self.entries.partition_point(|n| n.remaining == delta);
        let done: Vec<AId> = self.entries.drain(..completed).map(|n| n.action).collect();
        for node in &mut self.entries {
            node.remaining -= delta;
        }
        (delta, done)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueNode> {
        self.entries.iter()
    }
}

/// A [`State`] extended with the queue of currently executing durative
/// actions and a monotone clock, advanced whenever the queue is drained.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct CombinationState {
    pub state: State,
    pub active: ActiveQueue,
    pub time: IntCst,
}

impl CombinationState {
    pub fn new(state: State) -> Self {
        CombinationState {
            state,
            active: Default::default(),
            time: 0,
        }
    }

    pub fn has_active_actions(&self) -> bool {
        !self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(i: usize) -> SvId {
        SvId::from(i)
    }

    #[test]
    fn literal_packing() {
        let v = sv(3);
        let pos = Lit::new(v, true);
        let neg = Lit::new(v, false);
        assert_eq!(pos.var(), v);
        assert!(pos.val());
        assert_eq!(neg.var(), v);
        assert!(!neg.val());
        assert_eq!(!pos, neg);
        // usable as dense index, both polarities adjacent
        assert_eq!(usize::from(neg) + 1, usize::from(pos));
        assert_eq!(Lit::from(usize::from(pos)), pos);
    }

    #[test]
    fn state_algebra() {
        let s = State::new([sv(4), sv(1), sv(4)]);
        assert_eq!(s.len(), 2);
        assert!(s.contains(sv(1)));
        assert!(!s.contains(sv(2)));
        assert!(s.entails(Lit::new(sv(1), true)));
        assert!(s.entails(Lit::new(sv(2), false)));
        assert!(s.contains_all(&[sv(1), sv(4)]));
        assert!(s.disjoint(&[sv(0), sv(2)]));

        let s2 = s.apply([sv(2)], [sv(1)]);
        assert!(s2.contains(sv(2)));
        assert!(!s2.contains(sv(1)));
        // an atom both added and deleted ends up deleted
        let s3 = s.apply([sv(5)], [sv(5)]);
        assert!(!s3.contains(sv(5)));
    }

    #[test]
    fn state_identity() {
        let a = State::new([sv(1), sv(2)]);
        let b = State::new([sv(2), sv(1)]);
        let c = State::new([sv(1), sv(3)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn queue_drain() {
        let mut q = ActiveQueue::default();
        q.push(QueueNode {
            remaining: 3,
            action: AId::from(0usize),
        });
        q.push(QueueNode {
            remaining: 1,
            action: AId::from(1usize),
        });
        q.push(QueueNode {
            remaining: 1,
            action: AId::from(2usize),
        });
        let (delta, done) = q.drain_completed();
        assert_eq!(delta, 1);
        assert_eq!(done, vec![AId::from(1usize), AId::from(2usize)]);
        assert_eq!(q.min_remaining(), Some(2));
        let (delta, done) = q.drain_completed();
        assert_eq!((delta, done), (2, vec![AId::from(0usize)]));
        assert!(q.is_empty());
        assert_eq!(q.drain_completed(), (0, vec![]));
    }
}
