//! Language-level entities: vars, namespaces, dynamic bindings, library
//! loading.

pub mod bindings;
pub mod libload;
pub mod namespace;
pub mod var;

pub use namespace::Namespace;
pub use var::Var;
