//! Message protocol between the UI and the dispatcher.
//!
//! Both directions are JSON objects of the form
//! `{"type": "fetchTables", "payload": {"schema": "public"}}`; variants
//! without data omit `payload`. Replies are fire-and-forget: the UI matches
//! them by `type`, not by request.

use crate::error::ErrorInfo;
use crate::models::{
    CustomQueryResult, DatabaseConfig, PrimaryKey, Row, SavedConnection, SavedQuery,
    SchemaResourceKind, SessionSnapshot, SqlValue, TableData, TableDataRequest, TableInfo,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Requests sent by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// UI finished loading; replies with the initial state and may auto-connect.
    Ready,

    /// Connect to a database, replacing the current connection.
    Connect {
        config: DatabaseConfig,
        /// Keep the credentials for the next start
        #[serde(default)]
        remember: bool,
        /// Saved connection being opened, if any
        #[serde(default)]
        connection_id: Option<String>,
    },
    /// Abort the in-flight connect attempt.
    CancelConnect,
    Disconnect,

    FetchSchemas,
    FetchTables {
        schema: String,
    },
    FetchSchemaViews {
        schema: String,
    },
    FetchSchemaMaterializedViews {
        schema: String,
    },
    FetchSchemaFunctions {
        schema: String,
    },
    FetchSchemaSequences {
        schema: String,
    },

    FetchTableData(TableDataRequest),
    /// Same as `FetchTableData`; sent by the refresh button.
    RefreshData(TableDataRequest),
    UpdateCell {
        schema: String,
        table: String,
        column: String,
        value: SqlValue,
        primary_key: PrimaryKey,
    },
    InsertRow {
        schema: String,
        table: String,
        values: Row,
    },

    ExecuteQuery {
        sql: String,
        /// Saved query being run; its last-executed stamp is updated
        #[serde(default)]
        query_id: Option<String>,
    },

    LoadQueries,
    SaveQuery {
        name: String,
        sql: String,
    },
    UpdateQuery(SavedQuery),
    DeleteQuery {
        id: String,
    },
    ToggleFavorite {
        id: String,
    },

    LoadConnections,
    SaveConnection {
        name: String,
        config: DatabaseConfig,
    },
    UpdateConnection {
        id: String,
        name: String,
        config: DatabaseConfig,
    },
    DeleteConnection {
        id: String,
    },

    SaveCredentials {
        config: DatabaseConfig,
    },
    ClearCredentials,
    /// Dismiss the last connection error.
    ClearError,
}

impl ClientMessage {
    /// Wire name of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Connect { .. } => "connect",
            Self::CancelConnect => "cancelConnect",
            Self::Disconnect => "disconnect",
            Self::FetchSchemas => "fetchSchemas",
            Self::FetchTables { .. } => "fetchTables",
            Self::FetchSchemaViews { .. } => "fetchSchemaViews",
            Self::FetchSchemaMaterializedViews { .. } => "fetchSchemaMaterializedViews",
            Self::FetchSchemaFunctions { .. } => "fetchSchemaFunctions",
            Self::FetchSchemaSequences { .. } => "fetchSchemaSequences",
            Self::FetchTableData(_) => "fetchTableData",
            Self::RefreshData(_) => "refreshData",
            Self::UpdateCell { .. } => "updateCell",
            Self::InsertRow { .. } => "insertRow",
            Self::ExecuteQuery { .. } => "executeQuery",
            Self::LoadQueries => "loadQueries",
            Self::SaveQuery { .. } => "saveQuery",
            Self::UpdateQuery(_) => "updateQuery",
            Self::DeleteQuery { .. } => "deleteQuery",
            Self::ToggleFavorite { .. } => "toggleFavorite",
            Self::LoadConnections => "loadConnections",
            Self::SaveConnection { .. } => "saveConnection",
            Self::UpdateConnection { .. } => "updateConnection",
            Self::DeleteConnection { .. } => "deleteConnection",
            Self::SaveCredentials { .. } => "saveCredentials",
            Self::ClearCredentials => "clearCredentials",
            Self::ClearError => "clearError",
        }
    }
}

/// Replies and notifications posted to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Reply to `ready`.
    InitialState {
        /// Configuration to prefill the connect form with
        config: Option<DatabaseConfig>,
        remember: bool,
        session: SessionSnapshot,
        active_connection_id: Option<String>,
    },

    Connecting {
        config: DatabaseConfig,
    },
    ConnectionSuccess {
        config: DatabaseConfig,
        remember: bool,
    },
    ConnectionError {
        error: ErrorInfo,
        config: DatabaseConfig,
    },
    /// The attempt was cancelled by the user. Not an error.
    ConnectionCancelled {
        config: DatabaseConfig,
    },
    Disconnected,

    Schemas {
        schemas: Vec<String>,
    },
    Tables {
        schema: String,
        tables: Vec<TableInfo>,
    },
    SchemaResources {
        schema: String,
        kind: SchemaResourceKind,
        names: Vec<String>,
    },

    TableData {
        schema: String,
        table: String,
        page: u64,
        page_size: u64,
        data: TableData,
    },
    DataError {
        error: ErrorInfo,
    },
    CellUpdated {
        schema: String,
        table: String,
        column: String,
        primary_key: PrimaryKey,
    },
    CellUpdateError {
        error: ErrorInfo,
        schema: String,
        table: String,
        column: String,
        primary_key: PrimaryKey,
    },
    RowInserted {
        schema: String,
        table: String,
        row: Row,
    },

    QueryResult {
        query_id: Option<String>,
        result: CustomQueryResult,
    },
    QueryError {
        query_id: Option<String>,
        error: ErrorInfo,
    },

    QueriesLoaded {
        queries: Vec<SavedQuery>,
    },
    QuerySaved {
        query: SavedQuery,
    },
    QueryUpdated {
        query: SavedQuery,
    },
    QueryDeleted {
        id: String,
    },

    ConnectionsLoaded {
        connections: Vec<SavedConnection>,
        active_connection_id: Option<String>,
    },
    ConnectionSaved {
        connection: SavedConnection,
    },
    ConnectionUpdated {
        connection_id: String,
        connection: SavedConnection,
    },
    ConnectionDeleted {
        connection_id: String,
    },

    CredentialsSaved,
    CredentialsCleared,
    /// Saving or loading local data failed.
    StorageError {
        error: ErrorInfo,
    },
    ErrorCleared,
}

/// Destination for [`ServerMessage`]s.
///
/// Posting never blocks and never fails; a closed destination drops the
/// message.
pub trait MessageSink: Send + Sync {
    fn post(&self, message: ServerMessage);
}

impl MessageSink for UnboundedSender<ServerMessage> {
    fn post(&self, message: ServerMessage) {
        if self.send(message).is_err() {
            tracing::debug!("UI channel closed, dropping message");
        }
    }
}
