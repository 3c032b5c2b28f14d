//! Free-form SQL execution for the query editor.

use crate::error::{BrowseError, BrowseResult};
use crate::models::query::command_keyword;
use crate::models::{CustomQueryResult, QueryType};
use crate::services::session::Session;

use std::time::Instant;

/// Service for running SQL typed by the user.
pub struct QueryService;

impl QueryService {
    /// Run `sql` as written and time it.
    ///
    /// Several statements separated by `;` are allowed. Values come back as
    /// text; `row_count` is the count reported for the last statement.
    pub async fn execute_custom(session: &Session, sql: &str) -> BrowseResult<CustomQueryResult> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(BrowseError::validation("Query cannot be empty."));
        }

        let command = command_keyword(sql);
        tracing::debug!(query_type = ?QueryType::detect(sql), command = %command, "Executing query");

        let start = Instant::now();
        let output = session.simple_query(sql).await?;
        let execution_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::debug!(
            command = %command,
            rows = output.rows.len(),
            row_count = output.row_count,
            elapsed_ms = execution_time_ms,
            "Query completed"
        );

        Ok(CustomQueryResult {
            columns: output.columns,
            rows: output.rows,
            row_count: output.row_count,
            execution_time_ms,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatabaseConfig, QueryOutput};
    use crate::services::testing::StubProvider;

    #[tokio::test]
    async fn test_execute_custom_reports_command() {
        let provider =
            StubProvider::with_handler(|_, _| Ok(QueryOutput { row_count: 3, ..QueryOutput::default() }));
        let session = Session::new(provider.clone());
        session.connect(DatabaseConfig::new("db", "app", "alice", ""), None).await.unwrap();

        let result = QueryService::execute_custom(&session, "  delete from logs;  ").await.unwrap();
        assert_eq!(result.command, "DELETE");
        assert_eq!(result.row_count, 3);
        assert_eq!(provider.recorded_queries()[0].0, "delete from logs;");
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let provider = StubProvider::new();
        let session = Session::new(provider.clone());
        session.connect(DatabaseConfig::new("db", "app", "alice", ""), None).await.unwrap();

        let err = QueryService::execute_custom(&session, "   ").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(provider.query_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_custom_requires_connection() {
        let session = Session::new(StubProvider::new());
        let err = QueryService::execute_custom(&session, "SELECT 1").await.unwrap_err();
        assert!(err.is_not_connected());
    }
}
