use crate::collections::ref_store::{RefPool, RefStore, RefVec};
use crate::create_ref_type;
use crate::model::types::{TypeId, TypeTable};
use anyhow::{ensure, Context, Result};
use std::borrow::Borrow;
use std::fmt::{self, Debug, Display, Formatter, Write};
use std::hash::Hash;

/// Symbol in the model: the canonical (interned) name of a type, an object,
/// a fluent or an action.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sym(String);

impl Sym {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Sym {
    fn from(value: &str) -> Self {
        Sym(value.to_string())
    }
}
impl From<String> for Sym {
    fn from(value: String) -> Self {
        Sym(value)
    }
}
impl AsRef<str> for Sym {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl Borrow<str> for Sym {
    fn borrow(&self) -> &str {
        &self.0
    }
}
impl Borrow<String> for Sym {
    fn borrow(&self) -> &String {
        &self.0
    }
}
impl Debug for Sym {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Display for Sym {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

create_ref_type!(SymId);

impl Debug for SymId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "sym{}", usize::from(*self))
    }
}

/// Associates each symbol (of rust type [`Sym`]) to
///  - its type (a [`TypeId`] in the table's [`TypeTable`])
///  - a [`SymId`]: a unique numeric representation of the symbol aimed at
///    performance, with a low footprint, usable as array index and cheap to
///    compare.
///
/// Unlike the type table, instances are not required to be declared up
/// front: new types and new symbols may be appended at any time (the
/// durative-action compiler appends one sentinel object per durative
/// action).
#[derive(Clone, Default)]
pub struct SymbolTable {
    pub types: TypeTable,
    symbols: RefPool<SymId, Sym>,
    symbol_types: RefVec<SymId, TypeId>,
    instances_by_type: RefStore<TypeId, Vec<SymId>>,
}

impl SymbolTable {
    pub fn empty() -> Self {
        Default::default()
    }

    /// Constructs a new symbol table from a set of type names and of pairs
    /// `(symbol, type-name)`.
    pub fn with_symbols(
        types: impl IntoIterator<Item = Sym>,
        symbols: impl IntoIterator<Item = (Sym, Sym)>,
    ) -> Result<Self> {
        let mut table = SymbolTable::empty();
        for tpe in types {
            table.add_type(tpe)?;
        }
        for (sym, tpe) in symbols {
            let tpe_id = table
                .types
                .id_of(&tpe)
                .with_context(|| format!("Unknown type: {tpe}"))?;
            table.add_symbol(sym, tpe_id)?;
        }
        Ok(table)
    }

    /// Declares a new type and returns its identifier.
    pub fn add_type(&mut self, name: impl Into<Sym>) -> Result<TypeId> {
        let id = self.types.add(name)?;
        let alias = self.instances_by_type.push(Vec::new());
        debug_assert_eq!(id, alias, "Type table and instance index out of sync");
        Ok(id)
    }

    /// Declares a new symbol of the given type and returns its identifier.
    /// Symbol names are unique across all types.
    pub fn add_symbol(&mut self, name: impl Into<Sym>, tpe: TypeId) -> Result<SymId> {
        let name = name.into();
        ensure!(self.id(name.as_str()).is_none(), "Duplicated symbol: {name}");
        let id = self.symbols.push(name);
        let alias = self.symbol_types.push(tpe);
        debug_assert_eq!(id, alias, "Problem in the insertion order");
        self.instances_by_type[tpe].push(id);
        Ok(id)
    }

    /// Retrieves the ID of a given symbol. Returns None if the symbol doesn't
    /// appear in the symbol table.
    pub fn id<W>(&self, sym: &W) -> Option<SymId>
    where
        W: Eq + Hash + ?Sized,
        Sym: Eq + Hash + Borrow<W>,
    {
        self.symbols.get_ref(sym)
    }

    /// Returns the symbol associated to the given ID.
    pub fn symbol(&self, id: SymId) -> &Sym {
        self.symbols.get(id)
    }

    /// Returns the type of the symbol.
    pub fn type_of(&self, id: SymId) -> TypeId {
        self.symbol_types[id]
    }

    /// Returns an iterator on all symbols in the table.
    pub fn iter(&self) -> impl Iterator<Item = SymId> {
        self.symbols.keys()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All declared instances of the given type, in declaration order.
    pub fn instances_of_type(&self, tpe: TypeId) -> &[SymId] {
        &self.instances_by_type[tpe]
    }

    /// Returns a formatted view of an S-Expression.
    pub fn format<'a>(&self, sexpr: impl IntoIterator<Item = &'a SymId>) -> String {
        let mut s = String::from("(");
        for sym in sexpr {
            write!(s, "{} ", self.symbol(*sym)).unwrap();
        }
        if s.ends_with(' ') {
            s.pop();
        }
        s.push(')');
        s
    }
}

impl Debug for SymbolTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, x) in self.symbols.keys().enumerate() {
            writeln!(f, "{:?}\t<- {:?}", SymId::from(i), self.symbols.get(x))?;
        }
        std::fmt::Result::Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn table() -> SymbolTable {
        SymbolTable::with_symbols(
            vec!["robot".into(), "location".into()],
            vec![
                ("r1".into(), "robot".into()),
                ("l1".into(), "location".into()),
                ("l2".into(), "location".into()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn instances() {
        let symbols = table();
        let robot = symbols.types.id_of("robot").unwrap();
        let location = symbols.types.id_of("location").unwrap();
        assert_eq!(symbols.instances_of_type(robot).len(), 1);
        assert_eq!(symbols.instances_of_type(location).len(), 2);
    }

    #[test]
    fn extension() {
        let mut symbols = table();
        let sentinel = symbols.add_type("sentinel").unwrap();
        assert!(symbols.instances_of_type(sentinel).is_empty());
        let s = symbols.add_symbol("start-mark", sentinel).unwrap();
        assert_eq!(symbols.instances_of_type(sentinel), &[s]);
        assert_eq!(symbols.type_of(s), sentinel);
        // previously declared symbols are untouched
        let r1 = symbols.id("r1").unwrap();
        assert_eq!(symbols.symbol(r1).as_str(), "r1");
        assert!(symbols.add_symbol("r1", sentinel).is_err());
    }

    #[test]
    fn formatting() {
        let symbols = table();
        let r1 = symbols.id("r1").unwrap();
        let l2 = symbols.id("l2").unwrap();
        assert_eq!(symbols.format(&[r1, l2]), "(r1 l2)");
    }
}
