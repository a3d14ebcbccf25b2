//! Global string interner for symbol names, keyword names and namespace
//! names. Interned ids are small `Copy` handles, so values can carry them
//! without owning string data and identity checks are integer compares.
//!
//! Unlike qualified-text interners, symbol and keyword names are stored
//! without their namespace part; the namespace lives next to the name id in
//! the value itself.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeywId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NsId(pub u32);

struct Table {
    map: FxHashMap<String, u32>,
    rev: Vec<String>,
}

impl Table {
    fn new() -> Self {
        Self { map: FxHashMap::default(), rev: Vec::new() }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.map.get(s) {
            return id;
        }
        let id = self.rev.len() as u32;
        self.rev.push(s.to_owned());
        self.map.insert(s.to_owned(), id);
        id
    }

    fn resolve(&self, id: u32) -> &str {
        &self.rev[id as usize]
    }
}

struct Interner {
    syms: Table,
    kws: Table,
    namespaces: Table,
}

impl Interner {
    fn new() -> Self {
        Self { syms: Table::new(), kws: Table::new(), namespaces: Table::new() }
    }
}

static INTERNER: Lazy<Mutex<Interner>> = Lazy::new(|| Mutex::new(Interner::new()));

/// Interns a plain (unqualified) symbol name.
pub fn intern_sym(name: &str) -> SymId {
    SymId(INTERNER.lock().unwrap().syms.intern(name))
}

pub fn sym_name(id: SymId) -> String {
    INTERNER.lock().unwrap().syms.resolve(id.0).to_owned()
}

/// Interns a keyword name. A leading ':' is tolerated and stripped so both
/// ":doc" and "doc" intern to the same id.
pub fn intern_kw(name: &str) -> KeywId {
    let canon = name.strip_prefix(':').unwrap_or(name);
    KeywId(INTERNER.lock().unwrap().kws.intern(canon))
}

pub fn kw_name(id: KeywId) -> String {
    INTERNER.lock().unwrap().kws.resolve(id.0).to_owned()
}

pub fn intern_ns(name: &str) -> NsId {
    NsId(INTERNER.lock().unwrap().namespaces.intern(name))
}

pub fn ns_name(id: NsId) -> String {
    INTERNER.lock().unwrap().namespaces.resolve(id.0).to_owned()
}

/// Splits qualified text like "str/trim" into an optional namespace part and
/// a name part. A lone '/' (the division symbol) does not count as a
/// separator.
pub fn split_qualified(text: &str) -> (Option<&str>, &str) {
    match text.rfind('/') {
        Some(pos) if pos > 0 && pos + 1 < text.len() => {
            (Some(&text[..pos]), &text[pos + 1..])
        }
        _ => (None, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_symbol_same_id() {
        let a = intern_sym("foo");
        let b = intern_sym("foo");
        assert_eq!(a, b);
        assert_eq!(sym_name(a), "foo");
    }

    #[test]
    fn different_symbols_different_ids() {
        assert_ne!(intern_sym("foo"), intern_sym("bar"));
    }

    #[test]
    fn keyword_colon_is_stripped() {
        assert_eq!(intern_kw(":doc"), intern_kw("doc"));
        assert_eq!(kw_name(intern_kw(":doc")), "doc");
    }

    #[test]
    fn namespace_names_intern() {
        let a = intern_ns("user");
        assert_eq!(a, intern_ns("user"));
        assert_eq!(ns_name(a), "user");
    }

    #[test]
    fn split_qualified_text() {
        assert_eq!(split_qualified("str/trim"), (Some("str"), "trim"));
        assert_eq!(split_qualified("trim"), (None, "trim"));
        assert_eq!(split_qualified("/"), (None, "/"));
        assert_eq!(split_qualified("a.b/c"), (Some("a.b"), "c"));
    }
}
