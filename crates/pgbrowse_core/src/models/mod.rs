//! Data models for pgbrowse.
//!
//! This module contains all core data structures:
//! - `connection` - DatabaseConfig, SavedConnection, session state
//! - `query` - SqlValue, filters, sorting, pagination, statements, results
//! - `schema` - Introspection results and table browsing requests
//! - `saved_query` - SavedQuery

pub mod connection;
pub mod query;
pub mod saved_query;
pub mod schema;

pub use connection::{
    ConnectionOptions, DatabaseConfig, SavedConnection, SessionSnapshot, SessionStatus, TlsMode,
};
pub use query::{
    CustomQueryResult, FilterCondition, FilterOperator, FilterValue, PaginationOptions, QueryOutput,
    QueryType, ResultColumn, Row, SortColumn, SortDirection, SqlValue, Statement,
};
pub use saved_query::SavedQuery;
pub use schema::{
    ColumnInfo, PrimaryKey, SchemaResourceKind, TableData, TableDataRequest, TableInfo,
};
