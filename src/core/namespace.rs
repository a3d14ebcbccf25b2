//! Namespaces: named maps from symbols to vars, plus the alias and refer
//! tables `require` wires up.

use std::sync::Arc;

use crate::collections::Set;
use crate::core::Var;
use crate::interner::{NsId, SymId};

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: NsId,
    /// Vars interned in this namespace.
    pub mappings: im::HashMap<SymId, Arc<Var>>,
    /// `:as` aliases to other namespaces.
    pub aliases: im::HashMap<SymId, NsId>,
    /// Symbols referred from other namespaces.
    pub refers: im::HashMap<SymId, Arc<Var>>,
    /// Per-source-namespace refer exclusions.
    pub refer_excludes: im::HashMap<NsId, Set<SymId>>,
}

impl Namespace {
    pub fn new(name: NsId) -> Self {
        Self {
            name,
            mappings: im::HashMap::new(),
            aliases: im::HashMap::new(),
            refers: im::HashMap::new(),
            refer_excludes: im::HashMap::new(),
        }
    }

    /// Finds the var for a symbol: own mappings first, then refers.
    pub fn get(&self, sym: SymId) -> Option<&Arc<Var>> {
        self.mappings.get(&sym).or_else(|| self.refers.get(&sym))
    }

    /// Finds or creates the var mapped to `sym` in this namespace.
    pub fn intern(&mut self, sym: SymId) -> Arc<Var> {
        if let Some(var) = self.mappings.get(&sym) {
            return var.clone();
        }
        let var = Arc::new(Var::unbound(self.name, sym));
        self.mappings.insert(sym, var.clone());
        var
    }

    pub fn add_alias(&mut self, alias: SymId, ns: NsId) {
        self.aliases.insert(alias, ns);
    }

    pub fn alias(&self, alias: SymId) -> Option<NsId> {
        self.aliases.get(&alias).copied()
    }

    pub fn add_refer(&mut self, sym: SymId, var: Arc<Var>) {
        self.refers.insert(sym, var);
    }

    /// Unions symbols into the exclusion set for a source namespace.
    pub fn add_refer_excludes<I>(&mut self, source: NsId, syms: I)
    where
        I: IntoIterator<Item = SymId>,
    {
        let mut set = self
            .refer_excludes
            .get(&source)
            .cloned()
            .unwrap_or_default();
        for sym in syms {
            set.insert(sym);
        }
        self.refer_excludes.insert(source, set);
    }

    pub fn is_excluded(&self, source: NsId, sym: SymId) -> bool {
        self.refer_excludes
            .get(&source)
            .map(|set| set.contains(&sym))
            .unwrap_or(false)
    }
}
