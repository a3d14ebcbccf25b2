//! The evaluation context: a lexical frame plus a shared handle to the
//! global namespace state and the sandbox options.
//!
//! Contexts are cheap to clone; extending a frame produces a new `Ctx`, so a
//! callee can never mutate its caller's bindings.

use std::fmt;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::core::{Namespace, Var};
use crate::host::{ClassAllowList, ClassId};
use crate::interner::{self, NsId, SymId};
use crate::value::{Bindings, Value};

/// The namespace the native library is installed into. Its public vars are
/// referred into every newly created namespace.
pub const CORE_NS_NAME: &str = "sable.core";

/// What a `load-fn` returns for a resolvable library.
#[derive(Debug, Clone)]
pub struct LoadedLib {
    pub file: Option<String>,
    pub source: String,
}

pub type LoadFn = Arc<dyn Fn(&str) -> Option<LoadedLib> + Send + Sync>;
pub type PublicClassFn = Arc<dyn Fn(&Value) -> Option<ClassId> + Send + Sync>;

/// Sandbox options shared by every context of an evaluation.
#[derive(Default)]
pub struct CtxOpts {
    pub classes: ClassAllowList,
    pub load_fn: Option<LoadFn>,
    pub realize_max: Option<usize>,
    pub dry_run: bool,
    pub public_class: Option<PublicClassFn>,
}

impl fmt::Debug for CtxOpts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CtxOpts")
            .field("classes", &self.classes)
            .field("load_fn", &self.load_fn.is_some())
            .field("realize_max", &self.realize_max)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

//===----------------------------------------------------------------------===//
// GlobalEnv
//===----------------------------------------------------------------------===//

/// The mutable global state: the namespace store and the current namespace.
/// Mutated only by `def`, `require`, `in-ns`, `refer` and `set!`.
#[derive(Debug)]
pub struct GlobalEnv {
    pub namespaces: FxHashMap<NsId, Namespace>,
    pub current_ns: NsId,
    /// The `*file*` dynamic var, bound by the require driver during loads.
    pub file_var: Arc<Var>,
}

impl GlobalEnv {
    pub fn new() -> Self {
        let core_ns = interner::intern_ns(CORE_NS_NAME);
        let file_sym = interner::intern_sym("*file*");
        let file_var = Arc::new(Var::unbound(core_ns, file_sym));
        file_var.set_dynamic(true);
        let mut env = Self {
            namespaces: FxHashMap::default(),
            current_ns: core_ns,
            file_var: file_var.clone(),
        };
        let mut core = Namespace::new(core_ns);
        core.mappings.insert(file_sym, file_var);
        env.namespaces.insert(core_ns, core);
        env
    }

    pub fn namespace(&self, id: NsId) -> Option<&Namespace> {
        self.namespaces.get(&id)
    }

    pub fn namespace_mut(&mut self, id: NsId) -> Option<&mut Namespace> {
        self.namespaces.get_mut(&id)
    }

    pub fn current(&self) -> &Namespace {
        &self.namespaces[&self.current_ns]
    }

    pub fn current_mut(&mut self) -> &mut Namespace {
        self.namespaces
            .get_mut(&self.current_ns)
            .expect("current namespace exists")
    }

    /// Finds or creates a namespace. A new namespace starts out with the
    /// core library's vars referred.
    pub fn find_or_create_ns(&mut self, id: NsId) -> &mut Namespace {
        if !self.namespaces.contains_key(&id) {
            let mut ns = Namespace::new(id);
            let core_id = interner::intern_ns(CORE_NS_NAME);
            if id != core_id {
                if let Some(core) = self.namespaces.get(&core_id) {
                    for (sym, var) in core.mappings.iter() {
                        ns.add_refer(*sym, var.clone());
                    }
                }
            }
            self.namespaces.insert(id, ns);
        }
        self.namespaces.get_mut(&id).expect("namespace just inserted")
    }

    /// Switches the current namespace, creating it when new.
    pub fn set_current_ns(&mut self, id: NsId) {
        self.find_or_create_ns(id);
        self.current_ns = id;
    }

    /// Resolves a bare symbol in a namespace: mappings first, then refers.
    pub fn resolve_bare(&self, in_ns: NsId, name: SymId) -> Option<Arc<Var>> {
        self.namespace(in_ns).and_then(|ns| ns.get(name).cloned())
    }

    /// Resolves the namespace part of a qualified symbol: an alias of the
    /// current namespace, or a loaded namespace's full name.
    pub fn resolve_ns_part(&self, in_ns: NsId, ns_text: &str) -> Option<NsId> {
        let alias_sym = interner::intern_sym(ns_text);
        if let Some(ns) = self.namespace(in_ns) {
            if let Some(target) = ns.alias(alias_sym) {
                return Some(target);
            }
        }
        let full = interner::intern_ns(ns_text);
        self.namespaces.contains_key(&full).then_some(full)
    }

    /// Resolves a qualified symbol. Qualified access reaches only the target
    /// namespace's own mappings, never its refers.
    pub fn resolve_qualified(
        &self,
        in_ns: NsId,
        ns_text: &str,
        name: SymId,
    ) -> Option<Arc<Var>> {
        let target = self.resolve_ns_part(in_ns, ns_text)?;
        self.namespace(target)
            .and_then(|ns| ns.mappings.get(&name).cloned())
    }
}

impl Default for GlobalEnv {
    fn default() -> Self {
        Self::new()
    }
}

//===----------------------------------------------------------------------===//
// Ctx
//===----------------------------------------------------------------------===//

/// Per-evaluation bundle: the lexical frame, the shared global state, the
/// sandbox options, and the in-try diagnostics flag.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub bindings: Bindings,
    pub env: Arc<RwLock<GlobalEnv>>,
    pub opts: Arc<CtxOpts>,
    pub in_try: bool,
}

impl Ctx {
    pub fn new(env: Arc<RwLock<GlobalEnv>>, opts: Arc<CtxOpts>) -> Self {
        Self { bindings: Bindings::new(), env, opts, in_try: false }
    }

    pub fn lookup(&self, sym: SymId) -> Option<&Value> {
        self.bindings.get(&sym)
    }

    /// A context whose frame is extended with one binding.
    pub fn bind(&self, sym: SymId, value: Value) -> Ctx {
        let mut bindings = self.bindings.clone();
        bindings.insert(sym, value);
        Ctx { bindings, ..self.clone() }
    }

    /// A context running on a replacement frame.
    pub fn with_bindings(&self, bindings: Bindings) -> Ctx {
        Ctx { bindings, ..self.clone() }
    }

    pub fn current_ns(&self) -> NsId {
        self.env.read().unwrap().current_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_leaves_parent_frame_untouched() {
        let env = Arc::new(RwLock::new(GlobalEnv::new()));
        let ctx = Ctx::new(env, Arc::new(CtxOpts::default()));
        let x = interner::intern_sym("x");

        let child = ctx.bind(x, Value::int(1));
        assert_eq!(child.lookup(x), Some(&Value::int(1)));
        assert_eq!(ctx.lookup(x), None);
    }

    #[test]
    fn new_namespace_refers_core() {
        let mut env = GlobalEnv::new();
        let core_id = interner::intern_ns(CORE_NS_NAME);
        let sym = interner::intern_sym("referred-fn");
        let var = env
            .namespaces
            .get_mut(&core_id)
            .unwrap()
            .intern(sym);
        var.bind_root(Value::int(7));

        let fresh = interner::intern_ns("env-test.fresh");
        env.find_or_create_ns(fresh);
        let resolved = env.resolve_bare(fresh, sym).expect("refer copied");
        assert_eq!(resolved.deref(), Some(Value::int(7)));
    }

    #[test]
    fn qualified_resolution_skips_refers() {
        let mut env = GlobalEnv::new();
        let lib = interner::intern_ns("env-test.lib");
        let sym = interner::intern_sym("g");
        env.find_or_create_ns(lib).intern(sym).bind_root(Value::int(7));

        let user = interner::intern_ns("env-test.user");
        env.find_or_create_ns(user);
        // full name works without an alias
        assert!(env.resolve_qualified(user, "env-test.lib", sym).is_some());
        // alias works
        env.namespace_mut(user)
            .unwrap()
            .add_alias(interner::intern_sym("l"), lib);
        assert!(env.resolve_qualified(user, "l", sym).is_some());
        // unknown prefix does not
        assert!(env.resolve_qualified(user, "nope", sym).is_none());
    }
}
