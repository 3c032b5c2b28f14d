//! Routes UI messages to the services and posts the replies.
//!
//! Connection lifecycle and storage messages are handled inline in arrival
//! order. Anything that talks to the database runs in its own task, so a slow
//! page fetch or query never holds up a following `cancelConnect` or
//! `disconnect`. A connect attempt is registered with the session before the
//! next message is read and completes in the background.

use crate::error::{BrowseError, BrowseResult};
use crate::messages::{ClientMessage, MessageSink, ServerMessage};
use crate::models::{
    DatabaseConfig, PrimaryKey, Row, SavedConnection, SavedQuery, SchemaResourceKind, SqlValue,
    TableDataRequest,
};
use crate::services::{ConnectionStore, QueryService, SavedQueryStore, SchemaService, Session, TableService};

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Message router for one UI panel.
pub struct Dispatcher {
    session: Arc<Session>,
    connections: Arc<ConnectionStore>,
    queries: Arc<SavedQueryStore>,
    sink: Arc<dyn MessageSink>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        connections: Arc<ConnectionStore>,
        queries: Arc<SavedQueryStore>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self { session, connections, queries, sink }
    }

    /// The session this dispatcher drives.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handle one message and wait for every task it started.
    pub async fn handle(self: &Arc<Self>, message: ClientMessage) {
        if let Some(task) = self.dispatch(message) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Request task failed");
            }
        }
    }

    /// Serve messages from `inbox` until the UI closes the channel, then
    /// disconnect.
    ///
    /// Database requests are detached; their replies arrive whenever the
    /// server answers.
    pub async fn run(self: Arc<Self>, mut inbox: UnboundedReceiver<ClientMessage>) {
        while let Some(message) = inbox.recv().await {
            drop(self.dispatch(message));
        }
        tracing::debug!("UI channel closed");
        self.session.disconnect();
    }

    fn dispatch(self: &Arc<Self>, message: ClientMessage) -> Option<JoinHandle<()>> {
        tracing::debug!(message = message.kind(), "Handling message");

        match message {
            ClientMessage::Ready => return self.ready(),
            ClientMessage::Connect { config, remember, connection_id } => {
                return self.start_connect(config, remember, connection_id);
            }
            ClientMessage::CancelConnect => {
                if !self.session.cancel_connect() {
                    tracing::debug!("No connect attempt to cancel");
                }
            }
            ClientMessage::Disconnect => {
                self.session.disconnect();
                self.post(ServerMessage::Disconnected);
            }

            ClientMessage::FetchSchemas => {
                return self.spawn(|this| async move { this.send_schemas().await });
            }
            ClientMessage::FetchTables { schema } => {
                return self.spawn(move |this| async move { this.send_tables(schema).await });
            }
            ClientMessage::FetchSchemaViews { schema } => {
                return self.spawn_resources(SchemaResourceKind::Views, schema);
            }
            ClientMessage::FetchSchemaMaterializedViews { schema } => {
                return self.spawn_resources(SchemaResourceKind::MaterializedViews, schema);
            }
            ClientMessage::FetchSchemaFunctions { schema } => {
                return self.spawn_resources(SchemaResourceKind::Functions, schema);
            }
            ClientMessage::FetchSchemaSequences { schema } => {
                return self.spawn_resources(SchemaResourceKind::Sequences, schema);
            }

            ClientMessage::FetchTableData(request) | ClientMessage::RefreshData(request) => {
                return self.spawn(move |this| async move { this.send_table_data(request).await });
            }
            ClientMessage::UpdateCell { schema, table, column, value, primary_key } => {
                return self.spawn(move |this| async move {
                    this.update_cell(schema, table, column, value, primary_key).await
                });
            }
            ClientMessage::InsertRow { schema, table, values } => {
                return self.spawn(move |this| async move { this.insert_row(schema, table, values).await });
            }

            ClientMessage::ExecuteQuery { sql, query_id } => {
                return self.spawn(move |this| async move { this.execute_query(sql, query_id).await });
            }
            ClientMessage::LoadQueries => {
                self.post(ServerMessage::QueriesLoaded { queries: self.queries.all_queries() });
            }
            ClientMessage::SaveQuery { name, sql } => {
                match self.queries.save_query(SavedQuery::new(name, sql)) {
                    Ok(query) => self.post(ServerMessage::QuerySaved { query }),
                    Err(e) => self.storage_error("Failed to save query", e),
                }
            }
            ClientMessage::UpdateQuery(query) => match self.queries.update_query(query.clone()) {
                Ok(true) => self.post(ServerMessage::QueryUpdated { query }),
                Ok(false) => self.storage_error("Failed to update query", not_found("Saved query")),
                Err(e) => self.storage_error("Failed to update query", e),
            },
            ClientMessage::DeleteQuery { id } => match self.queries.delete_query(&id) {
                Ok(()) => self.post(ServerMessage::QueryDeleted { id }),
                Err(e) => self.storage_error("Failed to delete query", e),
            },
            ClientMessage::ToggleFavorite { id } => match self.queries.toggle_favorite(&id) {
                Ok(Some(query)) => self.post(ServerMessage::QueryUpdated { query }),
                Ok(None) => self.storage_error("Failed to update query", not_found("Saved query")),
                Err(e) => self.storage_error("Failed to update query", e),
            },

            ClientMessage::LoadConnections => self.send_connections(None),
            ClientMessage::SaveConnection { name, config } => self.save_connection(name, config),
            ClientMessage::UpdateConnection { id, name, config } => {
                match self.connections.update_connection(&id, name, config) {
                    Ok(Some(connection)) => {
                        self.post(ServerMessage::ConnectionUpdated { connection_id: id, connection });
                    }
                    Ok(None) => self.storage_error("Failed to update connection", not_found("Connection")),
                    Err(e) => self.storage_error("Failed to update connection", e),
                }
            }
            ClientMessage::DeleteConnection { id } => match self.connections.delete_connection(&id) {
                Ok(()) => self.post(ServerMessage::ConnectionDeleted { connection_id: id }),
                Err(e) => self.storage_error("Failed to delete connection", e),
            },

            ClientMessage::SaveCredentials { config } => {
                match config.validate().and_then(|()| self.connections.save_credentials(&config)) {
                    Ok(()) => self.post(ServerMessage::CredentialsSaved),
                    Err(e) => self.storage_error("Failed to save credentials", e),
                }
            }
            ClientMessage::ClearCredentials => match self.connections.clear_credentials() {
                Ok(()) => self.post(ServerMessage::CredentialsCleared),
                Err(e) => self.storage_error("Failed to clear credentials", e),
            },
            ClientMessage::ClearError => {
                self.session.clear_error();
                self.post(ServerMessage::ErrorCleared);
            }
        }

        None
    }

    fn post(&self, message: ServerMessage) {
        self.sink.post(message);
    }

    fn spawn<F, Fut>(self: &Arc<Self>, request: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Some(tokio::spawn(request(Arc::clone(self))))
    }

    fn spawn_resources(self: &Arc<Self>, kind: SchemaResourceKind, schema: String) -> Option<JoinHandle<()>> {
        self.spawn(move |this| async move { this.send_resources(kind, schema).await })
    }

    // ========== Connection lifecycle ==========

    /// Initial state for a freshly loaded UI.
    ///
    /// Reconnects to the most recently used saved connection, falling back to
    /// remembered credentials. A configuration from the environment only
    /// prefills the form.
    fn ready(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.post(ServerMessage::QueriesLoaded { queries: self.queries.all_queries() });

        let connections = self.connections.all_connections();
        if let Some(recent) = most_recently_used(&connections).cloned() {
            self.post(ServerMessage::ConnectionsLoaded {
                connections,
                active_connection_id: Some(recent.id.clone()),
            });
            return self.resume(recent.config, true, Some(recent.id));
        }
        self.post(ServerMessage::ConnectionsLoaded { connections, active_connection_id: None });

        if let Some(stored) = self.connections.stored_credentials() {
            return self.resume(stored, true, None);
        }

        let (config, remember) = match DatabaseConfig::from_env() {
            Some(config) => (Some(config), false),
            None => (self.session.active_config(), self.session.remember()),
        };
        self.post(ServerMessage::InitialState {
            config,
            remember,
            session: self.session.snapshot(),
            active_connection_id: None,
        });
        None
    }

    /// Post the initial state for `config` and connect to it, unless the
    /// session is already connected there.
    fn resume(
        self: &Arc<Self>,
        config: DatabaseConfig,
        remember: bool,
        connection_id: Option<String>,
    ) -> Option<JoinHandle<()>> {
        self.post(ServerMessage::InitialState {
            config: Some(config.clone()),
            remember,
            session: self.session.snapshot(),
            active_connection_id: connection_id.clone(),
        });

        if !self.session.needs_reconnect(&config) {
            self.post(ServerMessage::ConnectionSuccess { config: config.redacted(), remember });
            return self.spawn(|this| async move { this.send_schemas().await });
        }
        self.start_connect(config, remember, connection_id)
    }

    fn start_connect(
        self: &Arc<Self>,
        config: DatabaseConfig,
        remember: bool,
        connection_id: Option<String>,
    ) -> Option<JoinHandle<()>> {
        self.session.set_remember(remember);
        let attempt = match self.session.begin_connect(config.clone()) {
            Ok(attempt) => attempt,
            Err(e) => {
                self.post(ServerMessage::ConnectionError {
                    error: e.to_error_info(),
                    config: config.redacted(),
                });
                return None;
            }
        };
        self.post(ServerMessage::Connecting { config: config.redacted() });

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let generation = attempt.generation();
            let result = this.session.complete_connect(attempt, connection_id.as_deref()).await;
            this.finish_connect(result, generation, config.redacted(), remember, connection_id).await;
        }))
    }

    async fn finish_connect(
        &self,
        result: BrowseResult<()>,
        generation: u64,
        config: DatabaseConfig,
        remember: bool,
        connection_id: Option<String>,
    ) {
        match result {
            Ok(()) => {
                self.post(ServerMessage::ConnectionSuccess { config, remember });
                if connection_id.is_some() {
                    self.send_connections(connection_id);
                }
                self.send_schemas().await;
            }
            // A superseded attempt stays silent; the newer one reports.
            Err(e) if e.is_cancelled() => {
                if self.session.is_latest_attempt(generation) {
                    self.post(ServerMessage::ConnectionCancelled { config });
                }
            }
            Err(e) => self.post(ServerMessage::ConnectionError { error: e.to_error_info(), config }),
        }
    }

    // ========== Browsing ==========

    async fn send_schemas(&self) {
        match SchemaService::schemas(&self.session).await {
            Ok(schemas) => self.post(ServerMessage::Schemas { schemas }),
            Err(e) => self.data_error("Failed to load schemas", e),
        }
    }

    async fn send_tables(&self, schema: String) {
        match SchemaService::tables(&self.session, &schema).await {
            Ok(tables) => self.post(ServerMessage::Tables { schema, tables }),
            Err(e) => self.data_error("Failed to load tables", e),
        }
    }

    async fn send_resources(&self, kind: SchemaResourceKind, schema: String) {
        match SchemaService::resources(&self.session, kind, &schema).await {
            Ok(names) => self.post(ServerMessage::SchemaResources { schema, kind, names }),
            Err(e) => self.data_error("Failed to load schema objects", e),
        }
    }

    async fn send_table_data(&self, request: TableDataRequest) {
        match TableService::table_data(&self.session, &request).await {
            Ok(data) => self.post(ServerMessage::TableData {
                schema: request.schema,
                table: request.table,
                page: request.page,
                page_size: request.page_size,
                data,
            }),
            Err(e) => self.data_error("Failed to load table data", e),
        }
    }

    async fn update_cell(
        &self,
        schema: String,
        table: String,
        column: String,
        value: SqlValue,
        primary_key: PrimaryKey,
    ) {
        match TableService::update_cell(&self.session, &schema, &table, &column, value, &primary_key).await {
            Ok(_) => self.post(ServerMessage::CellUpdated { schema, table, column, primary_key }),
            Err(e) => {
                tracing::warn!(schema = %schema, table = %table, column = %column, error = %e, "Failed to update cell");
                self.post(ServerMessage::CellUpdateError {
                    error: e.to_error_info(),
                    schema,
                    table,
                    column,
                    primary_key,
                });
            }
        }
    }

    async fn insert_row(&self, schema: String, table: String, values: Row) {
        let values: Vec<(String, SqlValue)> =
            values.into_iter().map(|(column, value)| (column, SqlValue::from(value))).collect();

        match TableService::insert_row(&self.session, &schema, &table, &values).await {
            Ok(row) => self.post(ServerMessage::RowInserted { schema, table, row }),
            Err(e) => self.data_error("Failed to insert row", e),
        }
    }

    async fn execute_query(&self, sql: String, query_id: Option<String>) {
        match QueryService::execute_custom(&self.session, &sql).await {
            Ok(result) => {
                if let Some(id) = &query_id {
                    match self.queries.mark_executed(id) {
                        Ok(Some(query)) => self.post(ServerMessage::QueryUpdated { query }),
                        Ok(None) => {}
                        Err(e) => tracing::warn!(query_id = %id, error = %e, "Failed to stamp saved query"),
                    }
                }
                self.post(ServerMessage::QueryResult { query_id, result });
            }
            Err(e) => {
                tracing::debug!(error = %e, "Query failed");
                self.post(ServerMessage::QueryError { query_id, error: e.to_error_info() });
            }
        }
    }

    // ========== Saved connections ==========

    fn send_connections(&self, active_connection_id: Option<String>) {
        self.post(ServerMessage::ConnectionsLoaded {
            connections: self.connections.all_connections(),
            active_connection_id,
        });
    }

    fn save_connection(&self, name: String, config: DatabaseConfig) {
        let saved = config.validate().and_then(|()| self.connections.save_connection(name, config));
        match saved {
            Ok(connection) => self.post(ServerMessage::ConnectionSaved { connection }),
            Err(e) => self.storage_error("Failed to save connection", e),
        }
    }

    // ========== Errors ==========

    fn data_error(&self, context: &str, error: BrowseError) {
        if error.is_not_connected() {
            tracing::debug!(context, "Request while not connected");
        } else {
            tracing::warn!(context, error = %error, "Data request failed");
        }
        self.post(ServerMessage::DataError { error: error.to_error_info() });
    }

    fn storage_error(&self, context: &str, error: BrowseError) {
        tracing::warn!(context, error = %error, "Storage request failed");
        self.post(ServerMessage::StorageError { error: error.to_error_info() });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("session", &self.session).finish()
    }
}

/// Saved connection with the latest `last_used`, or the first one when none
/// has been used.
fn most_recently_used(connections: &[SavedConnection]) -> Option<&SavedConnection> {
    connections
        .iter()
        .filter(|c| c.last_used.is_some())
        .max_by_key(|c| c.last_used)
        .or_else(|| connections.first())
}

fn not_found(what: &str) -> BrowseError {
    BrowseError::storage(format!("{what} not found"), Some("Reload the list and try again"))
}
