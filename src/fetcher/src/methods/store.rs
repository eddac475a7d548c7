//! Stored-function cache: names, probes, and lazily materializes the
//! per-`(tree-shape, batch-size)` server-side function that wraps a
//! compiled query.

use schema::ensure;
use schema::error::FetchErrorKind;

use crate::methods::Conn;
use crate::Result;

/// Bumping this retires every previously cached function name; the old
/// functions remain in the catalog, unused, until dropped by ops.
pub const VERSION: u32 = 1;

/// Largest batch size any call site may request. Matches
/// `migrations::MAX_BATCH_SIZE`, the number of `execute_if_exists_n<N>`
/// helpers installed.
pub const MAX_FN_ARGUMENTS: usize = migrations::MAX_BATCH_SIZE;

/// PostgreSQL's identifier length limit.
const MAX_IDENTIFIER_BYTES: usize = 63;

pub struct StoredFunctionCache;

impl StoredFunctionCache {
    /// `builder_<VERSION>_<first 15 chars of root table>_<treeHash>_n<batchSize>`.
    pub fn fn_name(root_table: &str, tree_hash: &str, batch_size: usize) -> Result<String> {
        let prefix: String = root_table.chars().filter(|c| c.is_alphanumeric()).take(15).collect();
        let name = format!("builder_{VERSION}_{prefix}_{tree_hash}_n{batch_size}");
        ensure!(
            name.len() <= MAX_IDENTIFIER_BYTES,
            FetchErrorKind::DatabaseError,
            "generated function name '{name}' exceeds postgres' {MAX_IDENTIFIER_BYTES}-byte identifier limit"
        );
        Ok(name)
    }

    /// Runs the cached function for `ids` against `compiled_sql` (the
    /// `:...ids`-templated body produced by [`crate::SqlCompiler`]),
    /// creating it on a cache miss unless `conn` is a caller-supplied
    /// transaction (a transaction the executor opened for itself still
    /// allows creation).
    pub async fn invoke(
        conn: &mut Conn<'_>,
        fn_name: &str,
        compiled_sql: &str,
        ids: &[i64],
    ) -> Result<Vec<serde_json::Value>> {
        let batch_size = ids.len();
        ensure!(
            (1..=MAX_FN_ARGUMENTS).contains(&batch_size),
            FetchErrorKind::InvalidArgument,
            "batch size must be in 1..={MAX_FN_ARGUMENTS}, got {batch_size}"
        );

        let probe_fn = migrations::execute_if_exists_fn_name(batch_size);
        let placeholders: Vec<String> = (2..=batch_size + 1).map(|i| format!("${i}")).collect();
        let probe_sql = format!("SELECT * FROM {probe_fn}($1, {})", placeholders.join(", "));

        let probe_rows = fetch_nullable_json(conn, &probe_sql, fn_name, ids).await?;
        let is_miss = probe_rows.len() == 1 && probe_rows[0].is_none();

        if !is_miss {
            return Ok(probe_rows.into_iter().flatten().collect());
        }

        if !conn.suppresses_function_creation() {
            tracing::info!(fn_name, batch_size, "stored function cache miss, creating function");
            let body = Self::function_body_sql(fn_name, batch_size, compiled_sql);
            execute_ddl(conn, &body).await?;

            let args: Vec<String> = (1..=batch_size).map(|i| format!("${i}")).collect();
            let direct_sql = format!("SELECT res FROM {fn_name}({}) AS res", args.join(", "));
            fetch_json(conn, &direct_sql, ids).await
        } else {
            tracing::info!(fn_name, batch_size, "stored function cache miss inside a caller transaction, falling back to a raw query");
            let raw_body = substitute_ids_placeholder(compiled_sql, batch_size);
            let raw_sql = format!("SELECT row_to_json(rows) AS res FROM ({raw_body}) rows");
            fetch_json(conn, &raw_sql, ids).await
        }
    }

    fn function_body_sql(fn_name: &str, batch_size: usize, compiled_sql: &str) -> String {
        let args: Vec<String> = (1..=batch_size).map(|i| format!("a{i} int")).collect();
        let body = substitute_ids_placeholder(compiled_sql, batch_size);
        format!(
            r#"CREATE FUNCTION {fn_name}({args}) RETURNS SETOF JSON STABLE AS $$
BEGIN
    RETURN QUERY SELECT row_to_json(rows) AS res
                 FROM ({body}) rows;
END
$$ LANGUAGE plpgsql ROWS {batch_size}"#,
            args = args.join(", ")
        )
    }
}

/// Replaces the compiler's `:...ids` placeholder with `$1, $2, ..., $B`.
fn substitute_ids_placeholder(sql: &str, batch_size: usize) -> String {
    let list: Vec<String> = (1..=batch_size).map(|i| format!("${i}")).collect();
    sql.replace(":...ids", &list.join(", "))
}

async fn fetch_nullable_json(
    conn: &mut Conn<'_>,
    sql: &str,
    fn_name: &str,
    ids: &[i64],
) -> Result<Vec<Option<serde_json::Value>>> {
    let mut q = sqlx::query_scalar::<_, Option<serde_json::Value>>(sql).bind(fn_name);
    for id in ids {
        q = q.bind(id);
    }
    let rows = match conn {
        Conn::Pool(pool) => q.fetch_all(*pool).await,
        Conn::Tx { conn, .. } => q.fetch_all(&mut **conn).await,
    };
    Ok(rows?)
}

async fn fetch_json(conn: &mut Conn<'_>, sql: &str, ids: &[i64]) -> Result<Vec<serde_json::Value>> {
    let mut q = sqlx::query_scalar::<_, serde_json::Value>(sql);
    for id in ids {
        q = q.bind(id);
    }
    let rows = match conn {
        Conn::Pool(pool) => q.fetch_all(*pool).await,
        Conn::Tx { conn, .. } => q.fetch_all(&mut **conn).await,
    };
    Ok(rows?)
}

async fn execute_ddl(conn: &mut Conn<'_>, sql_text: &str) -> Result<()> {
    let q = sqlx::query("SELECT safe_create_fn($1)").bind(sql_text);
    match conn {
        Conn::Pool(pool) => q.execute(*pool).await,
        Conn::Tx { conn, .. } => q.execute(&mut **conn).await,
    }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_name_truncates_table_prefix() {
        let name = StoredFunctionCache::fn_name("public.a_very_long_table_name_here", "12345", 3).unwrap();
        assert!(name.starts_with("builder_1_publicaverylong_12345"));
        assert!(name.ends_with("_n3"));
    }

    #[test]
    fn fn_name_rejects_names_over_the_identifier_limit() {
        let err = StoredFunctionCache::fn_name(
            "public.t",
            &"9".repeat(60),
            99,
        )
        .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::DatabaseError);
    }

    #[test]
    fn ids_placeholder_expands_to_positional_params() {
        let sql = r#"SELECT * FROM "t" WHERE "t"."id" IN (:...ids)"#;
        assert_eq!(
            substitute_ids_placeholder(sql, 3),
            r#"SELECT * FROM "t" WHERE "t"."id" IN ($1, $2, $3)"#
        );
    }
}
