use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::ast::Atom;

/// An interned (symbol, arity) pair. The index is dense: the n-th distinct
/// functor handed to `FunctorTable::intern` has index n.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Functor(pub(crate) usize);

impl Functor {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Append-only interning table mapping (symbol, arity) to a dense index and
/// back. Both directions are constant time: forward through the hash part of
/// the map, backward through its insertion order.
#[derive(Debug, Default)]
pub struct FunctorTable {
    table: IndexMap<(Atom, usize), (), FxBuildHasher>,
}

impl FunctorTable {
    pub fn new() -> Self {
        FunctorTable {
            table: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    pub fn intern(&mut self, name: &str, arity: usize) -> Functor {
        if let Some(index) = self.table.get_index_of(&(name.to_owned(), arity)) {
            return Functor(index);
        }

        let (index, _) = self.table.insert_full((name.to_owned(), arity), ());
        Functor(index)
    }

    /// Forward lookup without interning.
    pub fn get(&self, name: &str, arity: usize) -> Option<Functor> {
        self.table
            .get_index_of(&(name.to_owned(), arity))
            .map(Functor)
    }

    pub fn name(&self, f: Functor) -> &str {
        let ((name, _), _) = self.table.get_index(f.0).expect("functor index in range");
        name
    }

    pub fn arity(&self, f: Functor) -> usize {
        let ((_, arity), _) = self.table.get_index(f.0).expect("functor index in range");
        *arity
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
