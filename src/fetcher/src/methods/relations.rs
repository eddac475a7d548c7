//! `setRelation`/`removeRelation`: the two relation-mutation
//! operations external collaborators need, implemented in full even though
//! the read pipeline above is the core of this crate.

use std::collections::HashMap;

use schema::error::FetchErrorKind;
use schema::{fail, RelationKind, ResolvedRelation, Schema};

use crate::methods::Conn;
use crate::Result;

/// One side of a relation edge, identified by entity name and row id.
#[derive(Debug, Clone)]
pub struct RelationEndpoint {
    pub entity: String,
    pub id: i64,
}

impl RelationEndpoint {
    pub fn new(entity: impl Into<String>, id: i64) -> Self {
        Self { entity: entity.into(), id }
    }
}

fn find_direct_relation<'a>(
    schema: &'a Schema,
    from_entity: &str,
    to_entity: &str,
) -> Result<&'a ResolvedRelation> {
    let from_meta = schema.entity(from_entity)?;
    let to_meta = schema.entity(to_entity)?;
    match schema.relation_to_table(from_meta, &to_meta.table_path)? {
        Some(rel) => Ok(rel),
        None => fail!(
            FetchErrorKind::SchemaError,
            "no direct relation from '{from_entity}' to '{to_entity}'"
        ),
    }
}

async fn row_exists(conn: &mut Conn<'_>, table: &str, pk: &str, id: i64) -> Result<bool> {
    let sql = format!(r#"SELECT 1 FROM "{table}" WHERE "{pk}" = $1"#);
    let row: Option<i32> = match conn {
        Conn::Pool(pool) => sqlx::query_scalar(&sql).bind(id).fetch_optional(*pool).await?,
        Conn::Tx { conn, .. } => sqlx::query_scalar(&sql).bind(id).fetch_optional(&mut **conn).await?,
    };
    Ok(row.is_some())
}

async fn ensure_exists(conn: &mut Conn<'_>, schema: &Schema, endpoint: &RelationEndpoint) -> Result<()> {
    let meta = schema.entity(&endpoint.entity)?;
    if !row_exists(conn, &meta.table_path, &meta.primary_key, endpoint.id).await? {
        fail!(
            FetchErrorKind::NotFound,
            "{} with id {} does not exist",
            endpoint.entity,
            endpoint.id
        );
    }
    Ok(())
}

async fn exec(conn: &mut Conn<'_>, sql: &str, binds: &[i64]) -> Result<()> {
    let mut q = sqlx::query(sql);
    for b in binds {
        q = q.bind(b);
    }
    match conn {
        Conn::Pool(pool) => q.execute(*pool).await,
        Conn::Tx { conn, .. } => q.execute(&mut **conn).await,
    }?;
    Ok(())
}

/// Assigns a direct relation from `from` to `to`. Appends for many-to-many;
/// overwrites the owning FK otherwise.
pub async fn set_relation(
    conn: &mut Conn<'_>,
    schema: &Schema,
    from: &RelationEndpoint,
    to: &RelationEndpoint,
) -> Result<()> {
    let rel = find_direct_relation(schema, &from.entity, &to.entity)?.clone();
    ensure_exists(conn, schema, from).await?;
    ensure_exists(conn, schema, to).await?;

    let from_meta = schema.entity(&from.entity)?;
    let to_meta = schema.entity(&to.entity)?;

    match rel.kind {
        RelationKind::ManyToOne | RelationKind::OwnerToOne => {
            let sql = format!(
                r#"UPDATE "{}" SET "{}" = $1 WHERE "{}" = $2"#,
                from_meta.table_path, rel.fk_column, from_meta.primary_key
            );
            exec(conn, &sql, &[to.id, from.id]).await?;
        }
        RelationKind::OneToOwner | RelationKind::OneToMany => {
            let sql = format!(
                r#"UPDATE "{}" SET "{}" = $1 WHERE "{}" = $2"#,
                to_meta.table_path, rel.fk_column, to_meta.primary_key
            );
            exec(conn, &sql, &[from.id, to.id]).await?;
        }
        RelationKind::ManyToMany => {
            let junction = rel.junction.as_ref().expect("many-to-many has a junction");
            let sql = format!(
                r#"INSERT INTO "{}" ("{}", "{}") VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
                junction.table, junction.own_key, junction.remote_key
            );
            exec(conn, &sql, &[from.id, to.id]).await?;
        }
    }
    Ok(())
}

/// Severs each `(from, to)` edge: nulls the owning FK for local relations,
/// deletes the junction row for many-to-many.
pub async fn remove_relation(
    conn: &mut Conn<'_>,
    schema: &Schema,
    pairs: &[(RelationEndpoint, RelationEndpoint)],
) -> Result<()> {
    let mut to_check: HashMap<String, Vec<i64>> = HashMap::new();
    for (from, to) in pairs {
        to_check.entry(from.entity.clone()).or_default().push(from.id);
        to_check.entry(to.entity.clone()).or_default().push(to.id);
    }
    for (entity, ids) in &to_check {
        let meta = schema.entity(entity)?;
        for id in ids {
            if !row_exists(conn, &meta.table_path, &meta.primary_key, *id).await? {
                fail!(FetchErrorKind::NotFound, "{entity} with id {id} does not exist");
            }
        }
    }

    for (from, to) in pairs {
        let rel = find_direct_relation(schema, &from.entity, &to.entity)?.clone();
        let from_meta = schema.entity(&from.entity)?;
        let to_meta = schema.entity(&to.entity)?;

        match rel.kind {
            RelationKind::ManyToOne | RelationKind::OwnerToOne => {
                let sql = format!(
                    r#"UPDATE "{}" SET "{}" = NULL WHERE "{}" = $1"#,
                    from_meta.table_path, rel.fk_column, from_meta.primary_key
                );
                exec(conn, &sql, &[from.id]).await?;
            }
            RelationKind::OneToOwner | RelationKind::OneToMany => {
                let sql = format!(
                    r#"UPDATE "{}" SET "{}" = NULL WHERE "{}" = $1"#,
                    to_meta.table_path, rel.fk_column, to_meta.primary_key
                );
                exec(conn, &sql, &[to.id]).await?;
            }
            RelationKind::ManyToMany => {
                let junction = rel.junction.as_ref().expect("many-to-many has a junction");
                let sql = format!(
                    r#"DELETE FROM "{}" WHERE "{}" = $1 AND "{}" = $2"#,
                    junction.table, junction.own_key, junction.remote_key
                );
                exec(conn, &sql, &[from.id, to.id]).await?;
            }
        }
    }
    Ok(())
}
