//! Entity graph fetcher: compiles a caller fetch tree into a single
//! lateral-joined PostgreSQL query, caches it as a stored function, and
//! hydrates the resulting JSON rows back into the caller's expected shape.

mod methods;

pub use methods::compiler::SqlCompiler;
pub use methods::hash::tree_hash;
pub use methods::hydrator::{Hydrator, ValueHydrator};
pub use methods::query_tree::{FetchTree, NodeCommon, QueryNode, TreeBuilder};
pub use methods::relations::{remove_relation, set_relation, RelationEndpoint};
pub use methods::store::{StoredFunctionCache, MAX_FN_ARGUMENTS, VERSION};
pub use methods::{fetch_entities, Conn};

pub use schema::error::{FetchError, FetchErrorKind, Result};
