//! Query tree builder: turns a caller-supplied [`FetchTree`] and a
//! [`Schema`] into a normalized, fully-aliased [`QueryNode`].

use std::sync::Arc;

use schema::{EntityMeta, Schema};

use crate::Result;

/// Caller-supplied input: rooted at an entity name, with an explicit list
/// of nested relations to return as data. Any relation not listed here is
/// fetched only as ids.
#[derive(Debug, Clone, Default)]
pub struct FetchTree {
    pub entity: String,
    pub nested: Vec<FetchTree>,
}

impl FetchTree {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            nested: Vec::new(),
        }
    }

    pub fn with(mut self, child: FetchTree) -> Self {
        self.nested.push(child);
        self
    }
}

/// Fields shared by both query-tree node kinds.
#[derive(Debug)]
pub struct NodeCommon {
    pub alias: String,
    pub meta: Arc<EntityMeta>,
}

/// `QueryNode = QueryDataNode | QueryIdNode`, modeled as a tagged sum.
/// Every relation of a `Data` node's `meta` produces exactly one child,
/// named by the relation's `property_name` that reaches it.
#[derive(Debug)]
pub enum QueryNode {
    Data {
        common: NodeCommon,
        children: Vec<(String, QueryNode)>,
    },
    Ids {
        common: NodeCommon,
    },
}

impl QueryNode {
    pub fn common(&self) -> &NodeCommon {
        match self {
            QueryNode::Data { common, .. } => common,
            QueryNode::Ids { common, .. } => common,
        }
    }

    pub fn alias(&self) -> &str {
        &self.common().alias
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.common().meta
    }
}

struct AliasGen {
    counter: usize,
}

impl AliasGen {
    fn next(&mut self) -> String {
        self.counter += 1;
        format!("rel_{}", self.counter)
    }
}

pub struct TreeBuilder<'a> {
    schema: &'a Schema,
    gen: AliasGen,
}

impl<'a> TreeBuilder<'a> {
    /// Builds a query tree for `fetch`, rooted with kind `data` as required.
    pub fn build(schema: &'a Schema, fetch: &FetchTree) -> Result<QueryNode> {
        let mut builder = TreeBuilder {
            schema,
            gen: AliasGen { counter: 0 },
        };
        builder.dfs(fetch)
    }

    fn dfs(&mut self, fetch: &FetchTree) -> Result<QueryNode> {
        let meta = self.schema.entity(&fetch.entity)?.clone();
        let alias = self.gen.next();

        let mut children = Vec::with_capacity(meta.relations.len());
        for rel in &meta.relations {
            let inverse = self.schema.relation_inverse(rel)?.clone();

            let matched = fetch
                .nested
                .iter()
                .find(|f| matches!(self.schema.entity(&f.entity), Ok(m) if m.table_path == inverse.table_path));

            let child = match matched {
                Some(child_fetch) => self.dfs(child_fetch)?,
                None => {
                    let child_alias = self.gen.next();
                    QueryNode::Ids {
                        common: NodeCommon {
                            alias: child_alias,
                            meta: inverse,
                        },
                    }
                }
            };
            children.push((rel.property_name.clone(), child));
        }

        Ok(QueryNode::Data {
            common: NodeCommon { alias, meta },
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{EntityDef, RelationDef, SqlType};

    fn test_schema() -> Schema {
        Schema::builder()
            .entity(
                EntityDef::new("Author", "public.authors", vec!["id".to_string()])
                    .column("name", SqlType::Text)
                    .relation(RelationDef::one_to_many("books", "Book", "author_id")),
            )
            .entity(
                EntityDef::new("Book", "public.books", vec!["id".to_string()])
                    .column("title", SqlType::Text)
                    .relation(RelationDef::many_to_one("author", "Author", "author_id")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn un_nested_relation_becomes_an_ids_leaf() {
        let schema = test_schema();
        let tree = TreeBuilder::build(&schema, &FetchTree::new("Author")).unwrap();
        let QueryNode::Data { common, children } = &tree else {
            panic!("root must be a data node")
        };
        assert_eq!(common.alias, "rel_1");
        assert_eq!(children.len(), 1);
        let (prop, child) = &children[0];
        assert_eq!(prop, "books");
        assert!(matches!(child, QueryNode::Ids { .. }));
    }

    #[test]
    fn nested_relation_becomes_a_data_child_with_fresh_alias() {
        let schema = test_schema();
        let tree = TreeBuilder::build(
            &schema,
            &FetchTree::new("Author").with(FetchTree::new("Book")),
        )
        .unwrap();
        let QueryNode::Data { children, .. } = &tree else {
            panic!("root must be a data node")
        };
        let (_, child) = &children[0];
        let QueryNode::Data { common, children } = child else {
            panic!("books must be a data node")
        };
        assert_eq!(common.alias, "rel_2");
        // Book -> Author backlink with no nesting becomes an ids leaf.
        assert_eq!(children.len(), 1);
        assert!(matches!(children[0].1, QueryNode::Ids { .. }));
    }
}
