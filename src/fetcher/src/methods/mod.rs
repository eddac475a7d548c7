pub mod compiler;
pub mod hash;
pub mod hydrator;
pub mod query_tree;
pub mod relations;
pub mod store;

use std::collections::HashMap;

use rustc_hash::FxHashSet;
use schema::error::FetchErrorKind;
use schema::{fail, Schema};

use compiler::SqlCompiler;
use hash::tree_hash;
use hydrator::Hydrator;
use query_tree::{FetchTree, TreeBuilder};
use store::{StoredFunctionCache, MAX_FN_ARGUMENTS};

use crate::Result;

/// Either a bare pool connection or a transaction. Holding
/// `&mut PgConnection` rather than `&mut Transaction<'_, Postgres>` lets both
/// variants share one lifetime without tying it to `Transaction`'s own
/// generic parameter; a `Transaction` derefs to `PgConnection` at call sites.
///
/// `Tx` distinguishes who opened the transaction: `caller_owned: true` for
/// one a caller passed in, `false` for one [`fetch_entities`] opened for
/// itself purely to batch a large fetch atomically. Only the former
/// suppresses stored-function creation — the executor's own transaction is
/// exactly the place function creation is meant to happen.
pub enum Conn<'a> {
    Pool(&'a sqlx::PgPool),
    Tx {
        conn: &'a mut sqlx::PgConnection,
        caller_owned: bool,
    },
}

impl<'a> Conn<'a> {
    pub fn suppresses_function_creation(&self) -> bool {
        matches!(self, Conn::Tx { caller_owned: true, .. })
    }
}

fn parse_ids(schema: &Schema, ids: &[String]) -> Result<Vec<i64>> {
    ids.iter()
        .map(|raw| {
            if schema.strict_ids() && raw.trim().is_empty() {
                fail!(FetchErrorKind::InvalidArgument, "empty id");
            }
            raw.parse::<i64>().map_err(|_| {
                FetchErrorKind::InvalidArgument
                    .to_error()
                    .with_context(format!("id '{raw}' is not a base-10 integer"))
            })
        })
        .collect()
}

async fn run_batches(
    conn: &mut Conn<'_>,
    root_table: &str,
    compiled_sql: &str,
    tree_hash_value: &str,
    unique_ids: &[i64],
    on_request: &mut Option<&mut dyn FnMut()>,
) -> Result<Vec<serde_json::Value>> {
    let mut rows = Vec::new();
    for batch in unique_ids.chunks(MAX_FN_ARGUMENTS) {
        if let Some(cb) = on_request.as_mut() {
            cb();
        }
        let fn_name = StoredFunctionCache::fn_name(root_table, tree_hash_value, batch.len())?;
        let batch_rows = StoredFunctionCache::invoke(conn, &fn_name, compiled_sql, batch).await?;
        rows.extend(batch_rows);
    }
    Ok(rows)
}

/// Entry point: compiles `fetch` once, executes it in batches of at
/// most [`MAX_FN_ARGUMENTS`], hydrates the rows, and returns them ordered by
/// `ids`' first-occurrence sequence.
#[tracing::instrument(skip(conn, schema, on_request), fields(entity = %fetch.entity))]
pub async fn fetch_entities(
    conn: Conn<'_>,
    schema: &Schema,
    fetch: &FetchTree,
    ids: &[String],
    mut on_request: Option<&mut dyn FnMut()>,
) -> Result<Vec<serde_json::Value>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let parsed = parse_ids(schema, ids)?;
    let mut seen: FxHashSet<i64> = FxHashSet::default();
    let mut unique_ids = Vec::new();
    for &id in &parsed {
        if seen.insert(id) {
            unique_ids.push(id);
        }
    }

    let tree = TreeBuilder::build(schema, fetch)?;
    let root_meta = tree.meta().clone();
    let compiled_sql = SqlCompiler::compile(schema, &tree)?;
    tracing::trace!(sql = %compiled_sql, "compiled query");
    let hash = tree_hash(&tree);

    let rows = match conn {
        Conn::Pool(pool) if unique_ids.len() > MAX_FN_ARGUMENTS => {
            let mut tx = pool.begin().await?;
            let mut tx_conn = Conn::Tx { conn: &mut tx, caller_owned: false };
            let rows = run_batches(
                &mut tx_conn,
                &root_meta.table_path,
                &compiled_sql,
                &hash,
                &unique_ids,
                &mut on_request,
            )
            .await?;
            tx.commit().await?;
            rows
        }
        mut other => {
            run_batches(
                &mut other,
                &root_meta.table_path,
                &compiled_sql,
                &hash,
                &unique_ids,
                &mut on_request,
            )
            .await?
        }
    };

    let hydrated = Hydrator::new(schema).hydrate_rows(&tree, rows)?;

    let mut by_id: HashMap<i64, serde_json::Value> = HashMap::new();
    for row in hydrated {
        if let Some(id) = row.get("id").and_then(|v| v.as_i64()) {
            by_id.insert(id, row);
        }
    }
    Ok(unique_ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
}
