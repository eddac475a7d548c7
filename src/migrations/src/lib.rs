//! SQL text for the two helper functions the stored-function cache depends
//! on. This crate only produces SQL text; applying it is left to the
//! caller's own migration runner.

/// Largest batch size the stored-function cache will ever call with. One
/// `execute_if_exists_n<N>` helper is generated for every `N` in `1..=MAX_BATCH_SIZE`.
pub const MAX_BATCH_SIZE: usize = 99;

/// `safe_create_fn(sql text) RETURNS void`: executes arbitrary DDL, trapping
/// `unique_violation` and `duplicate_function` so concurrent `CREATE FUNCTION`
/// attempts are idempotent.
fn safe_create_fn_sql() -> String {
    r#"
CREATE OR REPLACE FUNCTION safe_create_fn(sql text) RETURNS void AS $$
BEGIN
    EXECUTE sql;
EXCEPTION
    WHEN unique_violation OR duplicate_function THEN
        RETURN;
END;
$$ LANGUAGE plpgsql;
"#
    .to_string()
}

/// `execute_if_exists_n<N>(fn text, a1 int, ..., aN int) RETURNS SETOF JSON`:
/// probes whether `fn` exists by calling it, returning a single NULL row if
/// it traps `undefined_function` instead.
fn execute_if_exists_n_sql(n: usize) -> String {
    let args: Vec<String> = (1..=n).map(|i| format!("a{i} int")).collect();
    let call_args: Vec<String> = (1..=n).map(|i| format!("${}", i + 1)).collect();

    format!(
        r#"
CREATE OR REPLACE FUNCTION execute_if_exists_n{n}(fn text, {args}) RETURNS SETOF JSON STABLE AS $$
BEGIN
    RETURN QUERY EXECUTE 'select res from ' || fn || '({placeholders}) res' USING {call_args};
EXCEPTION
    WHEN undefined_function THEN
        RETURN NEXT NULL;
        RETURN;
END;
$$ LANGUAGE plpgsql ROWS {n};
"#,
        args = args.join(", "),
        placeholders = (1..=n)
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", "),
        call_args = call_args.join(", "),
    )
}

/// One multi-statement script installing `safe_create_fn` and every
/// `execute_if_exists_n<N>` for `N` in `1..=`[`MAX_BATCH_SIZE`].
pub fn install_sql() -> String {
    let mut stmts = vec![safe_create_fn_sql()];
    stmts.extend((1..=MAX_BATCH_SIZE).map(execute_if_exists_n_sql));

    let joined = stmts.join("\n");
    sqlformat::format(
        &joined,
        &sqlformat::QueryParams::None,
        &sqlformat::FormatOptions::default(),
    )
}

/// Name of the `execute_if_exists_n<N>` helper for a given batch size.
pub fn execute_if_exists_fn_name(batch_size: usize) -> String {
    format!("execute_if_exists_n{batch_size}")
}
