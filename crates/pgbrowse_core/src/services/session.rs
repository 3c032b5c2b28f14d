//! Connection session manager.
//!
//! A [`Session`] owns at most one live pool and at most one in-flight connect
//! attempt. Each attempt gets its own [`CancellationToken`] and a generation
//! number; starting a new attempt cancels the previous token, and an attempt
//! only publishes its pool if its generation is still current when it
//! finishes.
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! await point.

use crate::error::{BrowseError, BrowseResult, ErrorInfo};
use crate::models::{DatabaseConfig, QueryOutput, SessionSnapshot, SessionStatus, SqlValue, Statement};
use crate::services::credentials::ConnectionStore;
use crate::services::pool::{DatabasePool, PoolProvider};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;

struct PendingAttempt {
    generation: u64,
    token: CancellationToken,
}

/// A connect attempt started by [`Session::begin_connect`].
pub struct ConnectAttempt {
    generation: u64,
    token: CancellationToken,
    config: DatabaseConfig,
    remember: bool,
}

impl ConnectAttempt {
    /// Attempt number, increasing per session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Target of this attempt.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

impl std::fmt::Debug for ConnectAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectAttempt")
            .field("generation", &self.generation)
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Default)]
struct SessionInner {
    status: SessionStatus,
    pool: Option<Arc<dyn DatabasePool>>,
    active_config: Option<DatabaseConfig>,
    pending: Option<PendingAttempt>,
    last_error: Option<ErrorInfo>,
    generation: u64,
    remember: bool,
}

/// Owner of the database pool and the connect lifecycle.
pub struct Session {
    provider: Arc<dyn PoolProvider>,
    store: Option<Arc<ConnectionStore>>,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Create an idle session that builds pools with `provider`.
    pub fn new(provider: Arc<dyn PoolProvider>) -> Self {
        Self { provider, store: None, inner: Mutex::new(SessionInner::default()) }
    }

    /// Persist credentials and last-used stamps through `store` after a
    /// successful connect. With `remember` off, stored credentials are cleared
    /// instead.
    pub fn with_credentials(mut self, store: Arc<ConnectionStore>, remember: bool) -> Self {
        self.store = Some(store);
        self.inner.get_mut().remember = remember;
        self
    }

    /// Change whether connects started from now on save their credentials.
    pub fn set_remember(&self, remember: bool) {
        self.inner.lock().remember = remember;
    }

    /// Whether connects save their credentials.
    pub fn remember(&self) -> bool {
        self.inner.lock().remember
    }

    /// Check a configuration without connecting.
    pub fn validate_config(config: &DatabaseConfig) -> BrowseResult<()> {
        config.validate()
    }

    /// Connect to `config`, replacing any live pool or pending attempt.
    ///
    /// Returns [`BrowseError::Cancelled`] when the attempt was cancelled or
    /// superseded by a newer one; that outcome leaves no error recorded.
    pub async fn connect(
        &self,
        config: DatabaseConfig,
        active_connection_id: Option<&str>,
    ) -> BrowseResult<()> {
        let attempt = self.begin_connect(config)?;
        self.complete_connect(attempt, active_connection_id).await
    }

    /// First half of [`connect`](Self::connect), without any await.
    ///
    /// Validates `config`, cancels the pending attempt, closes the live pool,
    /// and enters Connecting. Once this returns, [`cancel_connect`]
    /// (Self::cancel_connect) and [`disconnect`](Self::disconnect) see the new
    /// attempt.
    pub fn begin_connect(&self, config: DatabaseConfig) -> BrowseResult<ConnectAttempt> {
        config.validate()?;

        let (attempt, previous) = {
            let mut inner = self.inner.lock();
            if let Some(pending) = inner.pending.take() {
                pending.token.cancel();
            }
            inner.generation += 1;
            let token = CancellationToken::new();
            inner.pending = Some(PendingAttempt { generation: inner.generation, token: token.clone() });
            inner.status = SessionStatus::Connecting;
            inner.active_config = None;
            inner.last_error = None;

            let attempt = ConnectAttempt {
                generation: inner.generation,
                token,
                config,
                remember: inner.remember,
            };
            (attempt, inner.pool.take())
        };

        if let Some(pool) = previous {
            pool.close();
        }

        tracing::debug!(
            host = %attempt.config.hostname,
            port = attempt.config.port,
            database = %attempt.config.database,
            generation = attempt.generation,
            "Connecting"
        );
        Ok(attempt)
    }

    /// Second half of [`connect`](Self::connect): create and test the pool.
    pub async fn complete_connect(
        &self,
        attempt: ConnectAttempt,
        active_connection_id: Option<&str>,
    ) -> BrowseResult<()> {
        let ConnectAttempt { generation, token, config, remember } = attempt;
        let outcome = self.establish(&config, &token).await;

        {
            let mut inner = self.inner.lock();
            let current = inner.generation == generation && !token.is_cancelled();

            match outcome {
                Ok(pool) if current => {
                    inner.pending = None;
                    inner.pool = Some(pool);
                    inner.status = SessionStatus::Connected;
                    inner.active_config = Some(config.clone());
                }
                Ok(pool) => {
                    drop(inner);
                    pool.close();
                    tracing::debug!(generation, "Connect attempt superseded");
                    return Err(BrowseError::Cancelled);
                }
                Err(err) if !current || err.is_cancelled() => {
                    tracing::debug!(generation, "Connect attempt cancelled");
                    return Err(BrowseError::Cancelled);
                }
                Err(err) => {
                    inner.pending = None;
                    inner.status = SessionStatus::Idle;
                    inner.last_error = Some(err.to_error_info());
                    drop(inner);
                    tracing::warn!(
                        host = %config.hostname,
                        database = %config.database,
                        error = %err,
                        "Connection failed"
                    );
                    return Err(err);
                }
            }
        }

        tracing::info!(host = %config.hostname, database = %config.database, "Connected");
        self.persist(generation, config, remember, active_connection_id.map(str::to_string)).await;
        Ok(())
    }

    /// Check whether no attempt has started since `generation`.
    pub fn is_latest_attempt(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    /// Create the pool and test it, racing both stages against `token`.
    async fn establish(
        &self,
        config: &DatabaseConfig,
        token: &CancellationToken,
    ) -> BrowseResult<Arc<dyn DatabasePool>> {
        let pool = select! {
            biased;
            _ = token.cancelled() => return Err(BrowseError::Cancelled),
            created = self.provider.create(config) => created?,
        };

        if token.is_cancelled() {
            pool.close();
            return Err(BrowseError::Cancelled);
        }

        let tested = select! {
            biased;
            _ = token.cancelled() => Err(BrowseError::Cancelled),
            result = pool.ping() => result,
        };

        match tested {
            Ok(()) => Ok(pool),
            Err(err) => {
                pool.close();
                Err(err)
            }
        }
    }

    /// Save or clear credentials for the connection made by `generation`.
    ///
    /// Skipped once that connection is gone. Store I/O runs on the blocking
    /// pool.
    async fn persist(
        &self,
        generation: u64,
        config: DatabaseConfig,
        remember: bool,
        active_connection_id: Option<String>,
    ) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if !self.holds_connection(generation) {
            tracing::debug!(generation, "Connection closed before credentials were stored");
            return;
        }

        let written = tokio::task::spawn_blocking(move || {
            let saved = if remember { store.save_credentials(&config) } else { store.clear_credentials() };
            if let Err(e) = saved {
                tracing::warn!(error = %e, "Failed to update stored credentials");
            }

            if let Some(id) = active_connection_id.as_deref() {
                if let Err(e) = store.update_last_used(id) {
                    tracing::warn!(connection_id = id, error = %e, "Failed to update last used time");
                }
            }
        })
        .await;

        if let Err(e) = written {
            tracing::error!(error = %e, "Credential store task failed");
        }
    }

    fn holds_connection(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.status == SessionStatus::Connected
    }

    /// Cancel the pending connect attempt, if any.
    ///
    /// The session returns to Idle with no recorded error. Returns `true` if
    /// an attempt was cancelled.
    pub fn cancel_connect(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.take() {
            Some(pending) => {
                pending.token.cancel();
                inner.status = SessionStatus::Idle;
                inner.last_error = None;
                tracing::debug!(generation = pending.generation, "Connect attempt cancelled by user");
                true
            }
            None => false,
        }
    }

    /// Forget the error from the last failed attempt.
    pub fn clear_error(&self) {
        self.inner.lock().last_error = None;
    }

    /// Cancel any pending attempt and close the live pool.
    pub fn disconnect(&self) {
        let (pending, pool) = {
            let mut inner = self.inner.lock();
            let pending = inner.pending.take();
            let pool = inner.pool.take();
            inner.status = SessionStatus::Idle;
            inner.active_config = None;
            inner.last_error = None;
            (pending, pool)
        };

        if let Some(pending) = pending {
            pending.token.cancel();
        }
        if let Some(pool) = pool {
            pool.close();
            tracing::info!("Disconnected");
        }
    }

    fn pool(&self) -> BrowseResult<Arc<dyn DatabasePool>> {
        let inner = self.inner.lock();
        match (&inner.status, &inner.pool) {
            (SessionStatus::Connected, Some(pool)) => Ok(Arc::clone(pool)),
            _ => Err(BrowseError::NotConnected),
        }
    }

    /// Run a row-returning statement against the live pool.
    pub async fn execute_query(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<QueryOutput> {
        let pool = self.pool()?;
        pool.query(sql, params).await.map_err(|e| {
            tracing::debug!(error = %e, "Query failed");
            e
        })
    }

    /// Run a built statement against the live pool.
    pub async fn execute(&self, statement: &Statement) -> BrowseResult<QueryOutput> {
        self.execute_query(&statement.sql, &statement.params).await
    }

    /// Run a statement and return the number of rows affected.
    pub async fn execute_command(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<u64> {
        let pool = self.pool()?;
        pool.execute(sql, params).await
    }

    /// Run free-form SQL text through the simple query protocol.
    pub async fn simple_query(&self, sql: &str) -> BrowseResult<QueryOutput> {
        let pool = self.pool()?;
        pool.simple_query(sql).await
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    /// Check if a pool is live.
    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Configuration of the live pool.
    pub fn active_config(&self) -> Option<DatabaseConfig> {
        self.inner.lock().active_config.clone()
    }

    /// Check whether connecting to `config` would change anything.
    pub fn needs_reconnect(&self, config: &DatabaseConfig) -> bool {
        let inner = self.inner.lock();
        inner.status != SessionStatus::Connected || inner.active_config.as_ref() != Some(config)
    }

    /// Point-in-time view for display, with the password removed.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            status: inner.status,
            active_config: inner.active_config.as_ref().map(DatabaseConfig::redacted),
            last_error: inner.last_error.clone(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(pending) = inner.pending.take() {
            pending.token.cancel();
        }
        if let Some(pool) = inner.pool.take() {
            pool.close();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("status", &inner.status)
            .field("active_config", &inner.active_config)
            .field("generation", &inner.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::SessionCredentialsProvider;
    use crate::services::testing::{wait_until, StubProvider};

    fn config(host: &str) -> DatabaseConfig {
        DatabaseConfig::new(host, "app", "alice", "secret")
    }

    fn session(provider: &Arc<StubProvider>) -> Session {
        Session::new(provider.clone())
    }

    #[tokio::test]
    async fn test_connect_success() {
        let provider = StubProvider::new();
        let session = session(&provider);

        session.connect(config("db.local"), None).await.unwrap();

        assert!(session.is_connected());
        assert_eq!(session.active_config().unwrap().hostname, "db.local");
        assert_eq!(provider.live_pools(), 1);

        let snapshot = session.snapshot();
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.active_config.unwrap().password, "");
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_credentials_not_stored_after_disconnect() {
        let provider = StubProvider::new();
        let store = Arc::new(ConnectionStore::new(Arc::new(SessionCredentialsProvider::new())));
        let session = Session::new(provider.clone()).with_credentials(store.clone(), true);

        let attempt = session.begin_connect(config("db.local")).unwrap();
        let generation = attempt.generation();
        session.complete_connect(attempt, None).await.unwrap();
        assert_eq!(store.stored_credentials(), Some(config("db.local")));

        store.clear_credentials().unwrap();
        session.disconnect();
        session.persist(generation, config("db.local"), true, None).await;
        assert!(store.stored_credentials().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_io() {
        let provider = StubProvider::new();
        let session = session(&provider);

        let err = session.connect(config(""), None).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(provider.creates(), 0);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn test_rapid_double_connect_keeps_only_second_pool() {
        let provider = StubProvider::new();
        provider.gate("slow.db");
        let session = Arc::new(session(&provider));

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.connect(config("slow.db"), None).await })
        };
        wait_until(|| provider.creates() == 1).await;
        assert_eq!(session.status(), SessionStatus::Connecting);

        session.connect(config("fast.db"), None).await.unwrap();
        provider.release("slow.db");

        let first = first.await.unwrap();
        assert!(first.unwrap_err().is_cancelled());

        assert!(session.is_connected());
        assert_eq!(session.active_config().unwrap().hostname, "fast.db");
        assert_eq!(provider.live_pools(), 1);
        assert_eq!(provider.live_hosts(), vec!["fast.db".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_connect_returns_to_idle_without_error() {
        let provider = StubProvider::new();
        provider.gate("slow.db");
        let session = Arc::new(session(&provider));

        let attempt = {
            let session = session.clone();
            tokio::spawn(async move { session.connect(config("slow.db"), None).await })
        };
        wait_until(|| provider.creates() == 1).await;

        assert!(session.cancel_connect());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.last_error.is_none());

        assert!(attempt.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(provider.live_pools(), 0);
        assert!(!session.cancel_connect());
    }

    #[tokio::test]
    async fn test_begin_connect_is_visible_before_completion() {
        let provider = StubProvider::new();
        let session = session(&provider);

        let attempt = session.begin_connect(config("a.db")).unwrap();
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(session.is_latest_attempt(attempt.generation()));
        assert_eq!(provider.creates(), 0);

        assert!(session.cancel_connect());
        assert!(session.is_latest_attempt(attempt.generation()));
        assert!(session.complete_connect(attempt, None).await.unwrap_err().is_cancelled());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(provider.live_pools(), 0);

        let stale = session.begin_connect(config("a.db")).unwrap();
        let fresh = session.begin_connect(config("b.db")).unwrap();
        assert!(!session.is_latest_attempt(stale.generation()));
        session.complete_connect(fresh, None).await.unwrap();
        assert!(session.complete_connect(stale, None).await.unwrap_err().is_cancelled());
        assert_eq!(provider.live_hosts(), vec!["b.db".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_error() {
        let provider = StubProvider::new();
        provider.fail_auth("locked.db");
        let session = session(&provider);

        session.connect(config("locked.db"), None).await.unwrap_err();
        assert!(session.snapshot().last_error.is_some());
        session.clear_error();
        assert!(session.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_records_error() {
        let provider = StubProvider::new();
        provider.fail_auth("locked.db");
        let session = session(&provider);

        let err = session.connect(config("locked.db"), None).await.unwrap_err();
        assert_eq!(err.category(), "Authentication");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        let info = snapshot.last_error.unwrap();
        assert_eq!(info.code.as_deref(), Some("28P01"));
        assert_eq!(provider.live_pools(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_pool_first() {
        let provider = StubProvider::new();
        let session = session(&provider);

        session.connect(config("a.db"), None).await.unwrap();
        session.connect(config("b.db"), None).await.unwrap();

        assert_eq!(provider.max_live_at_create(), 0);
        assert_eq!(provider.live_hosts(), vec!["b.db".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_is_noop() {
        let provider = StubProvider::new();
        let session = session(&provider);

        session.disconnect();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(provider.creates(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_closes_pool() {
        let provider = StubProvider::new();
        let session = session(&provider);

        session.connect(config("a.db"), None).await.unwrap();
        session.disconnect();

        assert_eq!(provider.live_pools(), 0);
        assert!(session.active_config().is_none());
        let err = session.execute_query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_not_connected());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_attempt() {
        let provider = StubProvider::new();
        provider.gate("slow.db");
        let session = Arc::new(session(&provider));

        let attempt = {
            let session = session.clone();
            tokio::spawn(async move { session.connect(config("slow.db"), None).await })
        };
        wait_until(|| provider.creates() == 1).await;

        session.disconnect();
        assert!(attempt.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(provider.live_pools(), 0);
    }

    #[tokio::test]
    async fn test_execute_while_idle_does_no_io() {
        let provider = StubProvider::new();
        let session = session(&provider);

        let err = session.execute_query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_not_connected());
        assert!(session.execute_command("DELETE FROM t", &[]).await.unwrap_err().is_not_connected());
        assert!(session.simple_query("SELECT 1").await.unwrap_err().is_not_connected());
        assert_eq!(provider.creates(), 0);
        assert_eq!(provider.query_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_delegates_to_pool() {
        let provider = StubProvider::new();
        let session = session(&provider);
        session.connect(config("a.db"), None).await.unwrap();

        let statement = Statement::new("SELECT * FROM t WHERE id = $1", vec![SqlValue::Int(7)]);
        session.execute(&statement).await.unwrap();

        let recorded = provider.recorded_queries();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "SELECT * FROM t WHERE id = $1");
        assert_eq!(recorded[0].1, vec![SqlValue::Int(7)]);
    }

    #[tokio::test]
    async fn test_needs_reconnect() {
        let provider = StubProvider::new();
        let session = session(&provider);
        assert!(session.needs_reconnect(&config("a.db")));

        session.connect(config("a.db"), None).await.unwrap();
        assert!(!session.needs_reconnect(&config("a.db")));
        assert!(session.needs_reconnect(&config("b.db")));
    }

    #[tokio::test]
    async fn test_successful_connect_persists_credentials() {
        let provider = StubProvider::new();
        let store = Arc::new(ConnectionStore::new(Arc::new(SessionCredentialsProvider::new())));
        let saved = store.save_connection("Local", config("a.db")).unwrap();
        let session = Session::new(provider.clone()).with_credentials(store.clone(), true);

        session.connect(config("a.db"), Some(&saved.id)).await.unwrap();

        assert_eq!(store.stored_credentials(), Some(config("a.db")));
        let found = store.find_connection(&saved.id).unwrap();
        assert!(found.last_used.is_some());

        session.set_remember(false);
        session.connect(config("a.db"), None).await.unwrap();
        assert_eq!(store.stored_credentials(), None);
    }
}
