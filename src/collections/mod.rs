//! Persistent collection types used throughout the interpreter.
//!
//! Vectors, maps and sets are the `im` crate's structures re-exported under
//! the names the rest of the crate uses; the cons list is in-crate because
//! list semantics (O(1) head/tail sharing) drive the evaluator's form
//! traversal.

pub mod list;

pub use list::List;

pub type Vector<T> = im::Vector<T>;
pub type Map<K, V> = im::OrdMap<K, V>;
pub type Set<T> = im::OrdSet<T>;
