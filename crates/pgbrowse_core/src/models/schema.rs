//! Schema introspection and table browsing models.

use super::query::{FilterCondition, Row, SortColumn, SqlValue, DEFAULT_PAGE_SIZE};

use serde::{Deserialize, Serialize};

/// Column metadata from `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub column_name: String,
    /// Data type as reported by PostgreSQL
    pub data_type: String,
    /// "YES" or "NO"
    pub is_nullable: String,
    /// Default expression, if any
    pub column_default: Option<String>,
    /// 1-based position in the table
    pub ordinal_position: i32,
}

/// A base table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name
    pub table_name: String,
    /// Schema name containing this table
    pub table_schema: String,
}

/// Kinds of schema objects listed in the explorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaResourceKind {
    /// Plain views
    Views,
    /// Materialized views
    MaterializedViews,
    /// Functions
    Functions,
    /// Sequences
    Sequences,
}

/// Page request for the table browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDataRequest {
    /// Schema name
    pub schema: String,
    /// Table name
    pub table: String,
    /// Zero-based page index
    #[serde(default)]
    pub page: u64,
    /// Rows per page
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Sort keys, primary first
    #[serde(default)]
    pub sort: Vec<SortColumn>,
    /// Parameterized filters, ANDed
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    /// Raw SQL predicate typed by the user; takes precedence over `filters`
    #[serde(default)]
    pub search_filter: Option<String>,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl TableDataRequest {
    /// Request the first page of a table with default settings.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            sort: Vec::new(),
            filters: Vec::new(),
            search_filter: None,
        }
    }

    /// Raw predicate when one was provided and is not blank.
    pub fn search_predicate(&self) -> Option<&str> {
        self.search_filter.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// One page of table rows plus the total matching count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableData {
    /// Rows of the requested page
    pub rows: Vec<Row>,
    /// Column metadata for the table
    pub columns: Vec<ColumnInfo>,
    /// Rows matching the filter, ignoring pagination
    pub total_count: u64,
}

/// Column and value that identify a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Key column
    pub column: String,
    /// Key value
    pub value: SqlValue,
}

impl PrimaryKey {
    /// Create a new primary key reference.
    pub fn new(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self { column: column.into(), value: value.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_data_request_defaults() {
        let req: TableDataRequest =
            serde_json::from_value(json!({"schema": "public", "table": "users"})).unwrap();
        assert_eq!(req, TableDataRequest::new("public", "users"));
    }

    #[test]
    fn test_blank_search_filter_is_ignored() {
        let mut req = TableDataRequest::new("public", "users");
        req.search_filter = Some("   ".into());
        assert_eq!(req.search_predicate(), None);
        req.search_filter = Some(" id > 5 ".into());
        assert_eq!(req.search_predicate(), Some("id > 5"));
    }
}
