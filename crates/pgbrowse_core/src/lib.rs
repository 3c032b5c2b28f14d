//! Core of the pgbrowse PostgreSQL browser.
//!
//! This crate provides everything behind the browser UI:
//!
//! - **error**: Error taxonomy with PostgreSQL-specific details
//! - **models**: Connection configs, filters, statements, schema and query results
//! - **query_builder**: Parameterized SQL for table pages, counts and row edits
//! - **services**: Connection session, pools, table browsing, introspection,
//!   credentials and saved-query storage
//! - **messages**: The JSON message protocol spoken with the UI
//! - **dispatcher**: Routes UI messages to the services
//! - **state**: Application state wiring
//! - **logging**: Structured logging setup

pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod messages;
pub mod models;
mod numeric;
pub mod query_builder;
pub mod services;
pub mod state;


pub use dispatcher::Dispatcher;
pub use error::{BrowseError, BrowseResult, ErrorInfo};
pub use messages::{ClientMessage, MessageSink, ServerMessage};
pub use models::{
    ColumnInfo, ConnectionOptions, DatabaseConfig, FilterCondition, FilterOperator,
    PaginationOptions, SavedConnection, SavedQuery, SessionStatus, SortColumn, SqlValue,
    Statement, TableData, TableDataRequest, TableInfo,
};
pub use services::{ConnectionStore, PgPoolProvider, PoolProvider, SavedQueryStore, Session};
pub use state::BrowserState;
