//! Table browsing and row edits.
//!
//! Page and count statements come from [`crate::query_builder`], so both are
//! always filtered by the same predicate. They run concurrently and are not
//! wrapped in a transaction: under concurrent writes the total may disagree
//! with the page by the rows written in between.

use crate::error::{BrowseError, BrowseResult};
use crate::models::{
    ColumnInfo, PaginationOptions, PrimaryKey, Row, SqlValue, TableData, TableDataRequest,
};
use crate::query_builder;
use crate::services::session::Session;

/// Table browsing service.
pub struct TableService;

impl TableService {
    /// Column metadata for a table, in ordinal order.
    pub async fn table_columns(
        session: &Session,
        schema: &str,
        table: &str,
    ) -> BrowseResult<Vec<ColumnInfo>> {
        let output = session
            .execute_query(
                r#"
                SELECT
                    column_name::text AS column_name,
                    data_type::text AS data_type,
                    is_nullable::text AS is_nullable,
                    column_default::text AS column_default,
                    ordinal_position::int4 AS ordinal_position
                FROM information_schema.columns
                WHERE table_schema = $1::text
                  AND table_name = $2::text
                ORDER BY ordinal_position
                "#,
                &[SqlValue::from(schema), SqlValue::from(table)],
            )
            .await?;

        output.decode_rows()
    }

    /// Fetch one page of a table with its columns and total matching count.
    ///
    /// A non-blank `search_filter` replaces `filters` and is executed as
    /// written.
    pub async fn table_data(session: &Session, request: &TableDataRequest) -> BrowseResult<TableData> {
        let offset = request.page.checked_mul(request.page_size).ok_or_else(|| {
            BrowseError::validation("Requested page is out of range.")
        })?;
        let pagination = PaginationOptions::new(request.page_size, offset);

        let (page, count) = match request.search_predicate() {
            Some(predicate) => (
                query_builder::build_free_text_filter_query(
                    &request.schema,
                    &request.table,
                    predicate,
                    &request.sort,
                    &pagination,
                )?,
                query_builder::build_free_text_count_query(&request.schema, &request.table, predicate)?,
            ),
            None => (
                query_builder::build_page_query(
                    &request.schema,
                    &request.table,
                    &request.filters,
                    &request.sort,
                    &pagination,
                )?,
                query_builder::build_count_query(&request.schema, &request.table, &request.filters)?,
            ),
        };

        tracing::debug!(
            schema = %request.schema,
            table = %request.table,
            page = request.page,
            page_size = request.page_size,
            filters = request.filters.len(),
            free_text = request.search_predicate().is_some(),
            "Loading table data"
        );

        let (columns, rows, count) = tokio::try_join!(
            Self::table_columns(session, &request.schema, &request.table),
            session.execute(&page),
            session.execute(&count),
        )?;

        Ok(TableData { rows: rows.rows, columns, total_count: count.first_count("count") })
    }

    /// Set one cell of the row identified by `primary_key`.
    ///
    /// Fails when no row matched the key.
    pub async fn update_cell(
        session: &Session,
        schema: &str,
        table: &str,
        column: &str,
        value: SqlValue,
        primary_key: &PrimaryKey,
    ) -> BrowseResult<u64> {
        let statement = query_builder::build_update_cell(schema, table, column, value, primary_key)?;
        let affected = session.execute_command(&statement.sql, &statement.params).await?;

        if affected == 0 {
            return Err(BrowseError::query(
                "No row matched the primary key",
                Some(format!("{} = {}", primary_key.column, primary_key.value.as_text())),
                Some("Refresh the table; the row may have been changed or deleted".to_string()),
                None,
                None,
            ));
        }

        tracing::debug!(schema, table, column, affected, "Cell updated");
        Ok(affected)
    }

    /// Insert a row and return it as stored.
    pub async fn insert_row(
        session: &Session,
        schema: &str,
        table: &str,
        values: &[(String, SqlValue)],
    ) -> BrowseResult<Row> {
        let statement = query_builder::build_insert_row(schema, table, values)?;
        let output = session.execute(&statement).await?;
        output
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| BrowseError::internal("INSERT ... RETURNING produced no row"))
    }
}
