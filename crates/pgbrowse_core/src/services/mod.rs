//! Service layer.
//!
//! - `pool` - Pool provider traits and the deadpool-postgres implementation
//! - `session` - Connection lifecycle: connect, cancel, disconnect, execute
//! - `table` - Table pages, counts, and row edits
//! - `schema` - Schema introspection for the explorer
//! - `query` - Free-form SQL from the query editor
//! - `credentials` - Secret storage for credentials and saved connections
//! - `storage` - Local storage for saved queries

pub mod credentials;
pub mod pool;
pub mod query;
pub mod schema;
pub mod session;
pub mod storage;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::{ConnectionStore, CredentialsProvider};
pub use pool::{DatabasePool, PgPoolProvider, PoolProvider};
pub use query::QueryService;
pub use schema::SchemaService;
pub use session::{ConnectAttempt, Session};
pub use storage::{KeyValueStore, LocalStorage, MemoryStore, SavedQueryStore};
pub use table::TableService;
