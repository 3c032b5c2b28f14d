//! Schema introspection for the explorer.

use crate::error::BrowseResult;
use crate::models::{SchemaResourceKind, SqlValue, TableInfo};
use crate::services::session::Session;

/// Schema introspection service.
pub struct SchemaService;

impl SchemaService {
    /// User schemas, excluding PostgreSQL's own.
    pub async fn schemas(session: &Session) -> BrowseResult<Vec<String>> {
        let output = session
            .execute_query(
                r#"
                SELECT schema_name::text AS name
                FROM information_schema.schemata
                WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
                ORDER BY schema_name
                "#,
                &[],
            )
            .await?;
        Ok(output.column_strings("name"))
    }

    /// Base tables in `schema`.
    pub async fn tables(session: &Session, schema: &str) -> BrowseResult<Vec<TableInfo>> {
        let output = session
            .execute_query(
                r#"
                SELECT table_name::text AS table_name, table_schema::text AS table_schema
                FROM information_schema.tables
                WHERE table_schema = $1::text
                  AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                &[SqlValue::from(schema)],
            )
            .await?;
        output.decode_rows()
    }

    /// Names of objects of one kind in `schema`.
    pub async fn resources(
        session: &Session,
        kind: SchemaResourceKind,
        schema: &str,
    ) -> BrowseResult<Vec<String>> {
        let sql = match kind {
            SchemaResourceKind::Views => {
                r#"
                SELECT table_name::text AS name
                FROM information_schema.views
                WHERE table_schema = $1::text
                ORDER BY table_name
                "#
            }
            SchemaResourceKind::MaterializedViews => {
                r#"
                SELECT matviewname::text AS name
                FROM pg_catalog.pg_matviews
                WHERE schemaname = $1::text
                ORDER BY matviewname
                "#
            }
            SchemaResourceKind::Functions => {
                r#"
                SELECT DISTINCT routine_name::text AS name
                FROM information_schema.routines
                WHERE routine_schema = $1::text
                  AND routine_type = 'FUNCTION'
                ORDER BY name
                "#
            }
            SchemaResourceKind::Sequences => {
                r#"
                SELECT sequence_name::text AS name
                FROM information_schema.sequences
                WHERE sequence_schema = $1::text
                ORDER BY sequence_name
                "#
            }
        };

        let output = session.execute_query(sql, &[SqlValue::from(schema)]).await?;
        let names = output.column_strings("name");
        tracing::debug!(schema, kind = ?kind, count = names.len(), "Loaded schema resources");
        Ok(names)
    }

    pub async fn views(session: &Session, schema: &str) -> BrowseResult<Vec<String>> {
        Self::resources(session, SchemaResourceKind::Views, schema).await
    }

    pub async fn materialized_views(session: &Session, schema: &str) -> BrowseResult<Vec<String>> {
        Self::resources(session, SchemaResourceKind::MaterializedViews, schema).await
    }

    pub async fn functions(session: &Session, schema: &str) -> BrowseResult<Vec<String>> {
        Self::resources(session, SchemaResourceKind::Functions, schema).await
    }

    pub async fn sequences(session: &Session, schema: &str) -> BrowseResult<Vec<String>> {
        Self::resources(session, SchemaResourceKind::Sequences, schema).await
    }
}
