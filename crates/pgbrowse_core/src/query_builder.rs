//! Parameterized SQL for table browsing.
//!
//! Turns a (schema, table, filters, sort, pagination) tuple into a
//! [`Statement`]. Identifiers are always quoted through [`quote_identifier`];
//! values are always bound as parameters. Placeholders are numbered in the
//! order their values appear in `Statement::params`, so `$k` is bound to
//! `params[k - 1]`.
//!
//! Page and count statements share [`render_filters`], so for the same filter
//! list they filter on a textually identical predicate.
//!
//! Without a sort list, and after the last sort key, row order is whatever the
//! database returns and may differ between calls.
//!
//! Column names are not checked against the table. An unknown column surfaces
//! as a query execution error from the server.

use crate::error::{BrowseError, BrowseResult};
use crate::models::{
    FilterCondition, FilterOperator, FilterValue, PaginationOptions, PrimaryKey, SortColumn,
    SqlValue, Statement,
};

/// Predicate rendered for an `IN` filter with an empty list.
const ALWAYS_FALSE: &str = "FALSE";

/// Quote a schema, table, or column name as a PostgreSQL identifier.
///
/// Embedded double quotes are doubled. Empty names and names containing NUL
/// are rejected.
pub fn quote_identifier(name: &str) -> BrowseResult<String> {
    if name.is_empty() {
        return Err(BrowseError::validation("Identifier must not be empty."));
    }
    if name.contains('\0') {
        return Err(BrowseError::validation("Identifier must not contain NUL characters."));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// `"schema"."table"`
pub fn qualified_table(schema: &str, table: &str) -> BrowseResult<String> {
    Ok(format!("{}.{}", quote_identifier(schema)?, quote_identifier(table)?))
}

/// A rendered WHERE body and the values it binds, numbered from `$1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Boolean expression, without the `WHERE` keyword
    pub sql: String,
    /// Values bound by the expression
    pub params: Vec<SqlValue>,
}

/// Accumulates bound values and hands out their placeholders.
#[derive(Debug, Default)]
struct Params {
    values: Vec<SqlValue>,
}

impl Params {
    fn bind(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }
}

/// Render a filter list as an AND-joined predicate.
///
/// Returns `None` for an empty list, which matches every row.
pub fn render_filters(filters: &[FilterCondition]) -> BrowseResult<Option<Predicate>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let mut params = Params::default();
    let clauses = filters
        .iter()
        .map(|filter| render_filter(filter, &mut params))
        .collect::<BrowseResult<Vec<_>>>()?;

    Ok(Some(Predicate { sql: clauses.join(" AND "), params: params.values }))
}

fn render_filter(filter: &FilterCondition, params: &mut Params) -> BrowseResult<String> {
    let column = quote_identifier(&filter.column)?;

    match (filter.operator, &filter.value) {
        (FilterOperator::In, FilterValue::List(values)) if values.is_empty() => {
            Ok(ALWAYS_FALSE.to_string())
        }
        (FilterOperator::In, FilterValue::List(values)) => {
            let placeholders: Vec<String> =
                values.iter().map(|value| params.bind(value.clone())).collect();
            Ok(format!("{column} IN ({})", placeholders.join(", ")))
        }
        (FilterOperator::In, FilterValue::Scalar(_)) => Err(BrowseError::validation(format!(
            "Filter on {} uses IN and needs a list of values.",
            filter.column
        ))),
        (op, FilterValue::List(_)) => Err(BrowseError::validation(format!(
            "Filter on {} uses {} and needs a single value.",
            filter.column,
            op.as_sql()
        ))),
        (FilterOperator::Like, FilterValue::Scalar(value)) => {
            if value.is_null() {
                return Err(BrowseError::validation(format!(
                    "Filter on {} uses LIKE and needs a non-null value.",
                    filter.column
                )));
            }
            let placeholder = params.bind(SqlValue::Text(format!("%{}%", value.as_text())));
            Ok(format!("{column} LIKE {placeholder}"))
        }
        (op, FilterValue::Scalar(value)) => {
            let placeholder = params.bind(value.clone());
            Ok(format!("{column} {} {placeholder}", op.as_sql()))
        }
    }
}

fn render_order_by(sort: &[SortColumn]) -> BrowseResult<Option<String>> {
    if sort.is_empty() {
        return Ok(None);
    }
    let keys = sort
        .iter()
        .map(|key| -> BrowseResult<String> {
            Ok(format!("{} {}", quote_identifier(&key.column)?, key.direction.as_sql()))
        })
        .collect::<BrowseResult<Vec<_>>>()?;
    Ok(Some(keys.join(", ")))
}

/// Append ORDER BY and the bound LIMIT/OFFSET pair to a statement prefix.
fn finish_page(
    mut sql: String,
    mut params: Params,
    sort: &[SortColumn],
    pagination: &PaginationOptions,
) -> BrowseResult<Statement> {
    let (limit, offset) = pagination.bind_values()?;

    if let Some(order_by) = render_order_by(sort)? {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by);
    }

    let limit = params.bind(limit);
    let offset = params.bind(offset);
    sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));

    Ok(Statement::new(sql, params.values))
}

/// Fetch one page of rows matching `filters`, ordered by `sort`.
pub fn build_page_query(
    schema: &str,
    table: &str,
    filters: &[FilterCondition],
    sort: &[SortColumn],
    pagination: &PaginationOptions,
) -> BrowseResult<Statement> {
    let mut sql = format!("SELECT * FROM {}", qualified_table(schema, table)?);
    let mut params = Params::default();

    if let Some(predicate) = render_filters(filters)? {
        sql.push_str(" WHERE ");
        sql.push_str(&predicate.sql);
        params.values = predicate.params;
    }

    finish_page(sql, params, sort, pagination)
}

/// Count rows matching `filters`. Pagination does not apply.
pub fn build_count_query(
    schema: &str,
    table: &str,
    filters: &[FilterCondition],
) -> BrowseResult<Statement> {
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", qualified_table(schema, table)?);

    let params = match render_filters(filters)? {
        Some(predicate) => {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate.sql);
            predicate.params
        }
        None => Vec::new(),
    };

    Ok(Statement::new(sql, params))
}

// ============================================================================
// Free-text predicates
// ============================================================================
//
// The predicate text is caller-supplied SQL and is inserted verbatim. Only
// trusted input from the local user may reach these builders. Schema, table,
// and sort names are still quoted, and LIMIT/OFFSET are still bound.

/// Check a raw predicate; blank input means "no filter".
fn free_text_predicate(raw: &str) -> BrowseResult<Option<&str>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.contains(';') {
        return Err(BrowseError::validation(
            "Filter must be a single boolean expression without ';'.",
        ));
    }
    if trimmed.contains('\0') {
        return Err(BrowseError::validation("Filter must not contain NUL characters."));
    }
    Ok(Some(trimmed))
}

/// Fetch one page of rows matching a raw SQL predicate.
///
/// The predicate is executed as written. Do not pass untrusted input.
pub fn build_free_text_filter_query(
    schema: &str,
    table: &str,
    raw_predicate: &str,
    sort: &[SortColumn],
    pagination: &PaginationOptions,
) -> BrowseResult<Statement> {
    let mut sql = format!("SELECT * FROM {}", qualified_table(schema, table)?);
    if let Some(predicate) = free_text_predicate(raw_predicate)? {
        sql.push_str(&format!(" WHERE ({predicate})"));
    }
    finish_page(sql, Params::default(), sort, pagination)
}

/// Count rows matching a raw SQL predicate.
///
/// The predicate is executed as written. Do not pass untrusted input.
pub fn build_free_text_count_query(
    schema: &str,
    table: &str,
    raw_predicate: &str,
) -> BrowseResult<Statement> {
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", qualified_table(schema, table)?);
    if let Some(predicate) = free_text_predicate(raw_predicate)? {
        sql.push_str(&format!(" WHERE ({predicate})"));
    }
    Ok(Statement::new(sql, Vec::new()))
}

// ============================================================================
// Row edits
// ============================================================================

/// Set one cell of the row identified by `primary_key`.
pub fn build_update_cell(
    schema: &str,
    table: &str,
    column: &str,
    value: SqlValue,
    primary_key: &PrimaryKey,
) -> BrowseResult<Statement> {
    let sql = format!(
        "UPDATE {} SET {} = $1 WHERE {} = $2",
        qualified_table(schema, table)?,
        quote_identifier(column)?,
        quote_identifier(&primary_key.column)?
    );
    Ok(Statement::new(sql, vec![value, primary_key.value.clone()]))
}

/// Insert one row and return it.
pub fn build_insert_row(
    schema: &str,
    table: &str,
    values: &[(String, SqlValue)],
) -> BrowseResult<Statement> {
    if values.is_empty() {
        return Err(BrowseError::validation("No data provided for insert operation."));
    }

    let mut params = Params::default();
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        columns.push(quote_identifier(column)?);
        placeholders.push(params.bind(value.clone()));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        qualified_table(schema, table)?,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(Statement::new(sql, params.values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortDirection;

    /// Placeholder numbers in order of appearance.
    fn placeholders(sql: &str) -> Vec<usize> {
        let bytes = sql.as_bytes();
        let mut found = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    found.push(sql[start..end].parse().unwrap());
                }
                i = end;
            } else {
                i += 1;
            }
        }
        found
    }

    /// Every placeholder is used once, in order, and matches a parameter.
    fn assert_placeholders_match(stmt: &Statement) {
        let found = placeholders(&stmt.sql);
        let expected: Vec<usize> = (1..=stmt.params.len()).collect();
        assert_eq!(found, expected, "placeholders in {:?}", stmt.sql);
    }

    /// Replace `$k` with a literal rendering of `params[k - 1]`.
    fn substitute(stmt: &Statement) -> String {
        let mut sql = stmt.sql.clone();
        for (idx, value) in stmt.params.iter().enumerate().rev() {
            let literal = match value {
                SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
                SqlValue::Null => "NULL".to_string(),
                other => other.as_text(),
            };
            sql = sql.replace(&format!("${}", idx + 1), &literal);
        }
        sql
    }

    fn where_body(sql: &str) -> Option<&str> {
        let start = sql.find(" WHERE ")? + " WHERE ".len();
        let rest = &sql[start..];
        let end = [" ORDER BY ", " LIMIT "]
            .iter()
            .filter_map(|marker| rest.find(marker))
            .min()
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    fn filter_sets() -> Vec<Vec<FilterCondition>> {
        let ops = [
            FilterOperator::Eq,
            FilterOperator::NotEq,
            FilterOperator::Gt,
            FilterOperator::Lt,
            FilterOperator::Gte,
            FilterOperator::Lte,
        ];
        let mut sets = vec![Vec::new()];
        for (i, op) in ops.iter().enumerate() {
            sets.push(vec![FilterCondition::new("a", *op, SqlValue::Int(i as i64))]);
        }
        for list_len in 0..12 {
            let values: Vec<SqlValue> = (0..list_len).map(SqlValue::Int).collect();
            sets.push(vec![
                FilterCondition::eq("a", 1),
                FilterCondition::in_list("b", values.clone()),
                FilterCondition::like("c", "x"),
                FilterCondition::in_list("d", values),
                FilterCondition::new("e", FilterOperator::Gte, SqlValue::Float(2.5)),
            ]);
        }
        sets.push(vec![
            FilterCondition::in_list("x", Vec::new()),
            FilterCondition::in_list("y", Vec::new()),
        ]);
        sets
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
        assert_eq!(quote_identifier("Mixed Case").unwrap(), "\"Mixed Case\"");
        assert_eq!(quote_identifier("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert_eq!(
            quote_identifier("x\"; DROP TABLE t; --").unwrap(),
            "\"x\"\"; DROP TABLE t; --\""
        );
        assert!(quote_identifier("").unwrap_err().is_validation());
        assert!(quote_identifier("a\0b").unwrap_err().is_validation());
    }

    #[test]
    fn test_page_query_without_filters_or_sort() {
        let stmt =
            build_page_query("public", "users", &[], &[], &PaginationOptions::default()).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"public\".\"users\" LIMIT $1 OFFSET $2");
        assert_eq!(stmt.params, vec![SqlValue::Int(100), SqlValue::Int(0)]);
    }

    #[test]
    fn test_page_query_full_shape() {
        let filters = vec![
            FilterCondition::new("age", FilterOperator::Gt, SqlValue::Int(30)),
            FilterCondition::like("name", "ann"),
            FilterCondition::in_list("role", vec!["admin".into(), "owner".into()]),
        ];
        let sort = vec![SortColumn::asc("id"), SortColumn::desc("name")];
        let stmt = build_page_query(
            "public",
            "users",
            &filters,
            &sort,
            &PaginationOptions::new(10, 20),
        )
        .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"public\".\"users\" WHERE \"age\" > $1 AND \"name\" LIKE $2 \
             AND \"role\" IN ($3, $4) ORDER BY \"id\" ASC, \"name\" DESC LIMIT $5 OFFSET $6"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Int(30),
                SqlValue::Text("%ann%".into()),
                SqlValue::Text("admin".into()),
                SqlValue::Text("owner".into()),
                SqlValue::Int(10),
                SqlValue::Int(20),
            ]
        );
    }

    #[test]
    fn test_placeholders_match_params_for_all_filter_sets() {
        let sort = vec![SortColumn::asc("id")];
        for filters in filter_sets() {
            let page = build_page_query(
                "s",
                "t",
                &filters,
                &sort,
                &PaginationOptions::new(7, 14),
            )
            .unwrap();
            assert_placeholders_match(&page);
            let n = page.params.len();
            assert_eq!(page.params[n - 2], SqlValue::Int(7));
            assert_eq!(page.params[n - 1], SqlValue::Int(14));

            let count = build_count_query("s", "t", &filters).unwrap();
            assert_placeholders_match(&count);
            assert_eq!(count.params.len(), n - 2);
        }
    }

    #[test]
    fn test_count_and_page_share_predicate() {
        for filters in filter_sets() {
            for sort in [vec![], vec![SortColumn::desc("z"), SortColumn::asc("y")]] {
                let page =
                    build_page_query("s", "t", &filters, &sort, &PaginationOptions::default())
                        .unwrap();
                let count = build_count_query("s", "t", &filters).unwrap();
                assert_eq!(where_body(&page.sql), where_body(&count.sql));
                assert_eq!(&page.params[..count.params.len()], &count.params[..]);
            }
        }
    }

    #[test]
    fn test_substitution_reconstructs_predicate() {
        let filters = vec![
            FilterCondition::eq("id", 5),
            FilterCondition::in_list("k", (1..=11).map(SqlValue::Int).collect()),
            FilterCondition::like("name", "o'brien"),
        ];
        let stmt = build_count_query("public", "people", &filters).unwrap();
        assert_eq!(
            substitute(&stmt),
            "SELECT COUNT(*) AS count FROM \"public\".\"people\" WHERE \"id\" = 5 AND \
             \"k\" IN (1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11) AND \"name\" LIKE '%o''brien%'"
        );
    }

    #[test]
    fn test_empty_in_renders_false_without_params() {
        let filters = vec![FilterCondition::in_list("id", Vec::new())];
        let page =
            build_page_query("public", "users", &filters, &[], &PaginationOptions::new(10, 0))
                .unwrap();
        assert_eq!(page.sql, "SELECT * FROM \"public\".\"users\" WHERE FALSE LIMIT $1 OFFSET $2");
        assert_eq!(page.params, vec![SqlValue::Int(10), SqlValue::Int(0)]);

        let count = build_count_query("public", "users", &filters).unwrap();
        assert_eq!(count.sql, "SELECT COUNT(*) AS count FROM \"public\".\"users\" WHERE FALSE");
        assert!(count.params.is_empty());
    }

    #[test]
    fn test_empty_in_between_other_filters_keeps_numbering() {
        let filters = vec![
            FilterCondition::eq("a", 1),
            FilterCondition::in_list("b", Vec::new()),
            FilterCondition::eq("c", 2),
        ];
        let stmt = build_count_query("s", "t", &filters).unwrap();
        assert_eq!(where_body(&stmt.sql), Some("\"a\" = $1 AND FALSE AND \"c\" = $2"));
        assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_like_value_is_bound_not_inlined() {
        for tricky in ["50%", "a_b", "it's", "'; DROP TABLE users; --", "\"x\""] {
            let filters = vec![FilterCondition::like("name", tricky)];
            let stmt = build_count_query("public", "users", &filters).unwrap();
            assert_eq!(
                stmt.sql,
                "SELECT COUNT(*) AS count FROM \"public\".\"users\" WHERE \"name\" LIKE $1"
            );
            assert_eq!(stmt.params, vec![SqlValue::Text(format!("%{tricky}%"))]);
        }
    }

    #[test]
    fn test_like_formats_non_text_scalars() {
        let filters = vec![FilterCondition::like("code", 42)];
        let stmt = build_count_query("s", "t", &filters).unwrap();
        assert_eq!(stmt.params, vec![SqlValue::Text("%42%".into())]);
    }

    #[test]
    fn test_malformed_filters_are_rejected() {
        let in_scalar = vec![FilterCondition::new("id", FilterOperator::In, SqlValue::Int(1))];
        assert!(build_count_query("s", "t", &in_scalar).unwrap_err().is_validation());

        let eq_list = vec![FilterCondition::new("id", FilterOperator::Eq, vec![SqlValue::Int(1)])];
        assert!(build_count_query("s", "t", &eq_list).unwrap_err().is_validation());

        let like_null = vec![FilterCondition::like("name", SqlValue::Null)];
        assert!(build_count_query("s", "t", &like_null).unwrap_err().is_validation());

        let empty_column = vec![FilterCondition::eq("", 1)];
        assert!(build_count_query("s", "t", &empty_column).unwrap_err().is_validation());
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let err = build_page_query("s", "t", &[], &[], &PaginationOptions::new(0, 0)).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_sort_identifiers_are_quoted() {
        let sort = vec![SortColumn {
            column: "name\" DESC, (SELECT 1)".into(),
            direction: SortDirection::Asc,
        }];
        let stmt = build_page_query("s", "t", &[], &sort, &PaginationOptions::default()).unwrap();
        assert!(stmt.sql.contains("ORDER BY \"name\"\" DESC, (SELECT 1)\" ASC"));
    }

    #[test]
    fn test_identifier_injection_in_table_name_is_quoted() {
        let stmt = build_count_query("public", "users\"; DELETE FROM x; --", &[]).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM \"public\".\"users\"\"; DELETE FROM x; --\""
        );
    }

    #[test]
    fn test_free_text_filter_query() {
        let stmt = build_free_text_filter_query(
            "public",
            "users",
            " id > 5 AND name LIKE 'x%' ",
            &[SortColumn::desc("id")],
            &PaginationOptions::new(25, 50),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"public\".\"users\" WHERE (id > 5 AND name LIKE 'x%') \
             ORDER BY \"id\" DESC LIMIT $1 OFFSET $2"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(25), SqlValue::Int(50)]);

        let count = build_free_text_count_query("public", "users", "id > 5").unwrap();
        assert_eq!(count.sql, "SELECT COUNT(*) AS count FROM \"public\".\"users\" WHERE (id > 5)");
        assert!(count.params.is_empty());
    }

    #[test]
    fn test_free_text_blank_means_no_filter() {
        let stmt =
            build_free_text_filter_query("s", "t", "   ", &[], &PaginationOptions::default())
                .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"s\".\"t\" LIMIT $1 OFFSET $2");
    }

    #[test]
    fn test_free_text_rejects_statement_separator() {
        let err = build_free_text_count_query("s", "t", "1=1; DROP TABLE t").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_update_cell() {
        let stmt = build_update_cell(
            "public",
            "users",
            "email",
            "a@b.c".into(),
            &PrimaryKey::new("id", 7),
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE \"public\".\"users\" SET \"email\" = $1 WHERE \"id\" = $2");
        assert_eq!(stmt.params, vec![SqlValue::Text("a@b.c".into()), SqlValue::Int(7)]);
    }

    #[test]
    fn test_insert_row() {
        let stmt = build_insert_row(
            "public",
            "users",
            &[("name".into(), "ann".into()), ("age".into(), SqlValue::Int(31))],
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"public\".\"users\" (\"name\", \"age\") VALUES ($1, $2) RETURNING *"
        );
        assert_placeholders_match(&stmt);
        assert!(build_insert_row("s", "t", &[]).unwrap_err().is_validation());
    }
}
