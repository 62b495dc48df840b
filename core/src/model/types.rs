use crate::model::symbols::Sym;
use anyhow::{ensure, Result};
use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};
use std::hash::Hash;

use crate::collections::ref_store::RefPool;

/// Unique numeric identifier of a user type.
#[derive(Copy, Clone, Eq, Ord, PartialOrd, PartialEq, Hash)]
pub struct TypeId(usize);

impl From<TypeId> for usize {
    fn from(t: TypeId) -> Self {
        t.0
    }
}
impl From<usize> for TypeId {
    fn from(id: usize) -> Self {
        TypeId(id)
    }
}

impl Debug for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tpe{}", self.0)
    }
}

/// Flat collection of the user types of a problem.
///
/// There is no subtyping: a symbol belongs to exactly one type. The table can
/// be extended after construction, which the durative-action compiler relies
/// on to append its sentinel type.
#[derive(Clone, Default)]
pub struct TypeTable {
    types: RefPool<TypeId, Sym>,
}

impl TypeTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Declares a new type. The name must not already denote a type.
    pub fn add(&mut self, name: impl Into<Sym>) -> Result<TypeId> {
        let name = name.into();
        ensure!(self.id_of(&name).is_none(), "Duplicated type: {name}");
        Ok(self.types.push(name))
    }

    pub fn id_of<T2>(&self, tpe: &T2) -> Option<TypeId>
    where
        T2: Eq + Hash + ?Sized,
        Sym: Eq + Hash + Borrow<T2>,
    {
        self.types.get_ref(tpe)
    }

    pub fn name(&self, tid: TypeId) -> &Sym {
        self.types.get(tid)
    }

    /// Iterator on all types by increasing numeric value.
    pub fn types(&self) -> impl Iterator<Item = TypeId> {
        self.types.keys()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Debug for TypeTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_and_lookup() {
        let mut table = TypeTable::new();
        let robot = table.add("robot").unwrap();
        let location = table.add("location").unwrap();
        assert_ne!(robot, location);
        assert_eq!(table.id_of("robot"), Some(robot));
        assert_eq!(table.id_of("crane"), None);
        assert_eq!(table.name(location).as_str(), "location");
        assert!(table.add("robot").is_err());
        assert_eq!(table.types().collect::<Vec<_>>(), vec![robot, location]);
    }
}
