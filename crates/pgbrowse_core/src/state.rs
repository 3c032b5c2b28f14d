//! Application state.
//!
//! [`BrowserState`] wires storage, the credential store and the connection
//! session together and owns the tokio runtime that database work runs on.
//! UI panels talk to it through a message channel.

use crate::dispatcher::Dispatcher;
use crate::error::{BrowseError, BrowseResult};
use crate::messages::{ClientMessage, MessageSink, ServerMessage};
use crate::services::credentials::{self, CredentialsProvider};
use crate::services::{
    ConnectionStore, LocalStorage, PgPoolProvider, PoolProvider, SavedQueryStore, Session,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Central application state.
pub struct BrowserState {
    session: Arc<Session>,
    connections: Arc<ConnectionStore>,
    queries: Arc<SavedQueryStore>,
    storage: Arc<LocalStorage>,
    data_dir: PathBuf,
    tokio_runtime: tokio::runtime::Runtime,
}

impl BrowserState {
    /// Open state in the default data directory.
    pub fn new() -> BrowseResult<Self> {
        Self::with_data_dir(crate::services::storage::default_data_dir())
    }

    /// Open state in `data_dir` with the build's credential provider and real
    /// PostgreSQL pools.
    pub fn with_data_dir(data_dir: PathBuf) -> BrowseResult<Self> {
        Self::with_providers(data_dir, credentials::select_provider(), Arc::new(PgPoolProvider::default()))
    }

    /// Open state in `data_dir` with explicit providers.
    pub fn with_providers(
        data_dir: PathBuf,
        credentials: Arc<dyn CredentialsProvider>,
        pools: Arc<dyn PoolProvider>,
    ) -> BrowseResult<Self> {
        crate::services::storage::init_data_dir(&data_dir)?;

        let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pgbrowse-db")
            .enable_all()
            .build()
            .map_err(|e| BrowseError::internal(format!("Failed to create tokio runtime: {e}")))?;

        let storage = Arc::new(LocalStorage::open(data_dir.clone())?);
        let queries = Arc::new(SavedQueryStore::new(storage.clone()));
        let connections = Arc::new(ConnectionStore::new(credentials));
        let session = Arc::new(Session::new(pools).with_credentials(connections.clone(), false));

        tracing::info!(
            data_dir = %data_dir.display(),
            credentials = connections.provider_name(),
            "BrowserState initialized"
        );

        Ok(Self { session, connections, queries, storage, data_dir, tokio_runtime })
    }

    /// Dispatcher posting its replies to `sink`.
    pub fn dispatcher(&self, sink: Arc<dyn MessageSink>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            self.session.clone(),
            self.connections.clone(),
            self.queries.clone(),
            sink,
        ))
    }

    /// Start serving a UI panel on the runtime.
    ///
    /// Send requests on the returned sender and read replies from the
    /// receiver. Dropping the sender disconnects the session.
    pub fn open_channel(&self) -> (UnboundedSender<ClientMessage>, UnboundedReceiver<ServerMessage>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let dispatcher = self.dispatcher(Arc::new(reply_tx));
        self.tokio_runtime.spawn(dispatcher.run(request_rx));
        (request_tx, reply_rx)
    }

    // ========== Accessors ==========

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connections(&self) -> &Arc<ConnectionStore> {
        &self.connections
    }

    pub fn queries(&self) -> &Arc<SavedQueryStore> {
        &self.queries
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn runtime(&self) -> &tokio::runtime::Runtime {
        &self.tokio_runtime
    }

    /// Spawn a future on the runtime.
    pub fn spawn<F, T>(&self, future: F) -> tokio::task::JoinHandle<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.tokio_runtime.spawn(future)
    }

    /// Block on a future using the runtime.
    ///
    /// Must not be called from inside the runtime.
    pub fn block_on<F, T>(&self, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.tokio_runtime.block_on(future)
    }
}

impl std::fmt::Debug for BrowserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserState")
            .field("data_dir", &self.data_dir)
            .field("session", &self.session)
            .finish()
    }
}
