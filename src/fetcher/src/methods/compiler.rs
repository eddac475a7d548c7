//! SQL compiler: walks a [`QueryNode`] and emits one lateral-joined
//! PostgreSQL query string.
//!
//! Assembled as text, then patched with a couple of small textual
//! post-processing passes, rather than through an expression builder:
//! `row_to_json`, `json_agg`, and lateral subqueries correlated against an
//! outer alias sit well outside what an expression-builder API expresses
//! cleanly, so the whole tree is compiled the same way instead of mixing
//! two techniques.

use schema::{RelationKind, ResolvedRelation, Schema};

use crate::methods::query_tree::{NodeCommon, QueryNode};
use crate::Result;

/// Name of the own-side junction helper column a many-to-many data child's
/// subquery exposes so its parent can `GROUP BY` it. The hydrator strips it
/// from every row it appears in.
fn junction_alias(parent_alias: &str, child_alias: &str) -> String {
    format!("{parent_alias}_{child_alias}_junction")
}

pub struct SqlCompiler;

impl SqlCompiler {
    /// Compiles `root` (which must be [`QueryNode::Data`]) into a single
    /// SELECT statement restricted to `root.id IN (:...ids)`, with the
    /// lateral-join rewrite already applied.
    pub fn compile(schema: &Schema, root: &QueryNode) -> Result<String> {
        let body = Self::compile_node(schema, root, None)?;
        Ok(body.replace("LEFT JOIN (SELECT", "LEFT JOIN LATERAL (SELECT"))
    }

    fn compile_node(
        schema: &Schema,
        node: &QueryNode,
        parent: Option<(&NodeCommon, &ResolvedRelation)>,
    ) -> Result<String> {
        let common = node.common();
        let alias = &common.alias;
        let meta = &common.meta;

        let mut select_exprs = vec![format!(r#""{alias}"."{}" AS "id""#, meta.primary_key)];
        for col in &meta.columns {
            select_exprs.push(format!(
                r#""{alias}"."{}" AS "{}""#,
                col.database_name, col.property_name
            ));
        }

        let mut join_clauses: Vec<String> = Vec::new();

        let where_clause = match parent {
            None => format!(r#""{alias}"."{}" IN (:...ids)"#, meta.primary_key),
            Some((p, rel)) => match rel.kind {
                RelationKind::ManyToOne | RelationKind::OwnerToOne => {
                    format!(
                        r#""{alias}"."{}" = "{}"."{}""#,
                        meta.primary_key, p.alias, rel.fk_column
                    )
                }
                RelationKind::OneToOwner | RelationKind::OneToMany => {
                    format!(
                        r#""{alias}"."{}" = "{}"."{}""#,
                        rel.fk_column, p.alias, p.meta.primary_key
                    )
                }
                RelationKind::ManyToMany => {
                    let junction = rel.junction.as_ref().expect("many-to-many has a junction");
                    let j_alias = junction_alias(&p.alias, alias);
                    join_clauses.push(format!(
                        r#"LEFT JOIN "{}" AS "{j_alias}" ON "{j_alias}"."{}" = "{alias}"."{}""#,
                        junction.table, junction.remote_key, meta.primary_key
                    ));
                    select_exprs.push(format!(
                        r#""{j_alias}"."{}" AS "{}""#,
                        junction.own_key, junction.own_key
                    ));
                    format!(r#""{j_alias}"."{}" = "{}"."{}""#, junction.own_key, p.alias, p.meta.primary_key)
                }
            },
        };

        if let QueryNode::Data { children, .. } = node {
            for (rel_name, child) in children {
                let rel = meta
                    .relation(rel_name)
                    .expect("tree builder only emits children for real relations");
                let inverse = schema.relation_inverse(rel)?;

                match child {
                    QueryNode::Ids { common: child_common } => {
                        let id_prop = schema.get_id_property_name(meta, rel_name)?;
                        Self::compile_id_child(
                            &mut select_exprs,
                            &mut join_clauses,
                            alias,
                            meta.primary_key.as_str(),
                            rel,
                            child_common,
                            id_prop,
                        );
                    }
                    QueryNode::Data { .. } => {
                        let child_sql = Self::compile_node(schema, child, Some((common, rel)))?;
                        Self::compile_data_child(
                            schema,
                            &mut select_exprs,
                            &mut join_clauses,
                            alias,
                            meta.table_path.as_str(),
                            rel_name,
                            rel,
                            child,
                            &child_sql,
                            inverse,
                        )?;
                    }
                }
            }
        }

        Ok(format!(
            r#"SELECT {} FROM "{}" AS "{alias}" {} WHERE {}"#,
            select_exprs.join(", "),
            meta.table_path,
            join_clauses.join(" "),
            where_clause
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_id_child(
        select_exprs: &mut Vec<String>,
        join_clauses: &mut Vec<String>,
        alias: &str,
        _node_pk: &str,
        rel: &ResolvedRelation,
        child_common: &NodeCommon,
        id_prop: &str,
    ) {
        let child_alias = &child_common.alias;
        let child_meta = &child_common.meta;
        let join_alias = format!("{child_alias}_join");

        match rel.kind {
            RelationKind::ManyToOne | RelationKind::OwnerToOne => {
                select_exprs.push(format!(r#""{alias}"."{}" AS "{id_prop}""#, rel.fk_column));
            }
            RelationKind::OneToOwner => {
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT "{}" AS remote_id, "{}" AS fk FROM "{}") AS "{join_alias}" ON "{join_alias}".fk = "{alias}"."id""#,
                    child_meta.primary_key, rel.fk_column, child_meta.table_path
                ));
                select_exprs.push(format!(r#""{join_alias}".remote_id AS "{id_prop}""#));
            }
            RelationKind::OneToMany => {
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT json_agg("{}") AS ids, "{}" AS fk FROM "{}" GROUP BY "{}") AS "{join_alias}" ON "{join_alias}".fk = "{alias}"."id""#,
                    child_meta.primary_key, rel.fk_column, child_meta.table_path, rel.fk_column
                ));
                select_exprs.push(format!(r#""{join_alias}".ids AS "{id_prop}""#));
            }
            RelationKind::ManyToMany => {
                let junction = rel.junction.as_ref().expect("many-to-many has a junction");
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT json_agg("{}") AS ids, "{}" AS fk FROM "{}" GROUP BY "{}") AS "{join_alias}" ON "{join_alias}".fk = "{alias}"."id""#,
                    junction.remote_key, junction.own_key, junction.table, junction.own_key
                ));
                select_exprs.push(format!(r#""{join_alias}".ids AS "{id_prop}""#));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_data_child(
        schema: &Schema,
        select_exprs: &mut Vec<String>,
        join_clauses: &mut Vec<String>,
        alias: &str,
        node_table_path: &str,
        rel_name: &str,
        rel: &ResolvedRelation,
        child: &QueryNode,
        child_sql: &str,
        inverse_meta: &std::sync::Arc<schema::EntityMeta>,
    ) -> Result<()> {
        let child_common = child.common();
        let child_alias = &child_common.alias;
        let j_alias = format!("{child_alias}_j");

        match rel.kind {
            RelationKind::ManyToOne | RelationKind::OwnerToOne => {
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT row_to_json(t) AS "{rel_name}", t."id" AS remote_id FROM ({child_sql}) t) AS "{j_alias}" ON "{j_alias}".remote_id = "{alias}"."{}""#,
                    rel.fk_column
                ));
                select_exprs.push(format!(r#""{j_alias}"."{rel_name}" AS "{rel_name}""#));
            }
            RelationKind::OneToOwner => {
                let backlink = schema.relation_to_table(inverse_meta, node_table_path)?;
                let backlink_id_prop = backlink
                    .and_then(|r| schema.get_id_property_name(inverse_meta, &r.property_name).ok())
                    .unwrap_or("id");
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT row_to_json(t) AS "{rel_name}", t."{backlink_id_prop}" AS backlink FROM ({child_sql}) t) AS "{j_alias}" ON "{j_alias}".backlink = "{alias}"."id""#,
                ));
                select_exprs.push(format!(r#""{j_alias}"."{rel_name}" AS "{rel_name}""#));
            }
            RelationKind::OneToMany => {
                let backlink = schema.relation_to_table(inverse_meta, node_table_path)?;
                let backlink_id_prop = backlink
                    .and_then(|r| schema.get_id_property_name(inverse_meta, &r.property_name).ok())
                    .unwrap_or("id");
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT json_agg(a."{rel_name}") AS "{rel_name}", a."{backlink_id_prop}" FROM (SELECT "{backlink_id_prop}", row_to_json(t) AS "{rel_name}" FROM ({child_sql}) t) a WHERE a."{backlink_id_prop}" = "{alias}"."id" GROUP BY a."{backlink_id_prop}") AS "{j_alias}" ON "{j_alias}"."{backlink_id_prop}" = "{alias}"."id""#,
                ));
                select_exprs.push(format!(r#""{j_alias}"."{rel_name}" AS "{rel_name}""#));
            }
            RelationKind::ManyToMany => {
                let junction = rel.junction.as_ref().expect("many-to-many has a junction");
                join_clauses.push(format!(
                    r#"LEFT JOIN (SELECT json_agg(row_to_json(a)) AS "{rel_name}", a."{}" FROM ({child_sql}) a GROUP BY a."{}") AS "{j_alias}" ON "{j_alias}"."{}" = "{alias}"."id""#,
                    junction.own_key, junction.own_key, junction.own_key
                ));
                select_exprs.push(format!(r#""{j_alias}"."{rel_name}" AS "{rel_name}""#));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::query_tree::{FetchTree, TreeBuilder};
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
                    .relation(RelationDef::many_to_one("author", "Author", "author_id"))
                    .with_relation_id("author", "authorId"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn root_restriction_uses_placeholder() {
        let schema = test_schema();
        let tree = TreeBuilder::build(&schema, &FetchTree::new("Author")).unwrap();
        let sql = SqlCompiler::compile(&schema, &tree).unwrap();
        assert!(sql.contains(r#""rel_1"."id" IN (:...ids)"#));
        assert!(sql.contains(r#""rel_1"."name" AS "name""#));
    }

    #[test]
    fn nested_data_child_is_lateral_joined_and_aggregated() {
        let schema = test_schema();
        let tree = TreeBuilder::build(
            &schema,
            &FetchTree::new("Author").with(FetchTree::new("Book")),
        )
        .unwrap();
        let sql = SqlCompiler::compile(&schema, &tree).unwrap();
        assert!(sql.contains("LEFT JOIN LATERAL (SELECT"));
        assert!(sql.contains(r#"json_agg(a."books") AS "books""#));
        assert!(sql.contains(r#""rel_2"."author_id" = "rel_1"."id""#));
    }
}
