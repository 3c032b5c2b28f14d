//! In-process pool provider for tests.
//!
//! Pools record every statement they run and answer through a handler
//! closure. Hosts can be gated (the connection test waits until released) or
//! set to fail authentication, and statements can be stalled forever.

use crate::error::{BrowseError, BrowseResult};
use crate::models::{DatabaseConfig, QueryOutput, SqlValue};
use crate::services::pool::{DatabasePool, PoolProvider};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub(crate) type Handler = dyn Fn(&str, &[SqlValue]) -> BrowseResult<QueryOutput> + Send + Sync;

type QueryLog = Arc<Mutex<Vec<(String, Vec<SqlValue>)>>>;

type Stalls = Arc<Mutex<Vec<String>>>;

pub(crate) struct StubProvider {
    creates: AtomicUsize,
    max_live_at_create: AtomicUsize,
    pools: Mutex<Vec<Arc<StubPool>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    auth_failures: Mutex<HashSet<String>>,
    log: QueryLog,
    stalls: Stalls,
    handler: Arc<Handler>,
}

impl StubProvider {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_handler(|_, _| Ok(QueryOutput::default()))
    }

    pub(crate) fn with_handler(
        handler: impl Fn(&str, &[SqlValue]) -> BrowseResult<QueryOutput> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            creates: AtomicUsize::new(0),
            max_live_at_create: AtomicUsize::new(0),
            pools: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            auth_failures: Mutex::new(HashSet::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            stalls: Arc::new(Mutex::new(Vec::new())),
            handler: Arc::new(handler),
        })
    }

    /// Hold the connection test for `host` until [`release`](Self::release).
    pub(crate) fn gate(&self, host: &str) {
        self.gates.lock().insert(host.to_string(), Arc::new(Notify::new()));
    }

    pub(crate) fn release(&self, host: &str) {
        if let Some(gate) = self.gates.lock().get(host) {
            gate.notify_one();
        }
    }

    /// Never answer statements containing `fragment`.
    pub(crate) fn stall(&self, fragment: &str) {
        self.stalls.lock().push(fragment.to_string());
    }

    pub(crate) fn fail_auth(&self, host: &str) {
        self.auth_failures.lock().insert(host.to_string());
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn live_pools(&self) -> usize {
        self.pools.lock().iter().filter(|p| !p.is_closed()).count()
    }

    pub(crate) fn live_hosts(&self) -> Vec<String> {
        self.pools.lock().iter().filter(|p| !p.is_closed()).map(|p| p.host.clone()).collect()
    }

    /// Highest number of open pools seen when a new one was requested.
    pub(crate) fn max_live_at_create(&self) -> usize {
        self.max_live_at_create.load(Ordering::SeqCst)
    }

    pub(crate) fn query_count(&self) -> usize {
        self.log.lock().len()
    }

    pub(crate) fn recorded_queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl PoolProvider for StubProvider {
    async fn create(&self, config: &DatabaseConfig) -> BrowseResult<Arc<dyn DatabasePool>> {
        config.validate()?;
        self.creates.fetch_add(1, Ordering::SeqCst);

        let pool = Arc::new(StubPool {
            host: config.hostname.clone(),
            closed: AtomicBool::new(false),
            gate: self.gates.lock().get(&config.hostname).cloned(),
            fail_auth: self.auth_failures.lock().contains(&config.hostname),
            log: self.log.clone(),
            stalls: self.stalls.clone(),
            handler: self.handler.clone(),
        });

        let mut pools = self.pools.lock();
        let live = pools.iter().filter(|p| !p.is_closed()).count();
        self.max_live_at_create.fetch_max(live, Ordering::SeqCst);
        pools.push(pool.clone());
        Ok(pool)
    }
}

pub(crate) struct StubPool {
    host: String,
    closed: AtomicBool,
    gate: Option<Arc<Notify>>,
    fail_auth: bool,
    log: QueryLog,
    stalls: Stalls,
    handler: Arc<Handler>,
}

#[async_trait]
impl DatabasePool for StubPool {
    async fn ping(&self) -> BrowseResult<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_auth {
            return Err(BrowseError::Authentication {
                message: "password authentication failed for user \"alice\"".into(),
                code: Some("28P01".into()),
                hint: None,
            });
        }
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<QueryOutput> {
        if self.is_closed() {
            return Err(BrowseError::connection("Connection pool is closed"));
        }
        self.log.lock().push((sql.to_string(), params.to_vec()));
        let stalled = self.stalls.lock().iter().any(|fragment| sql.contains(fragment.as_str()));
        if stalled {
            std::future::pending::<()>().await;
        }
        (self.handler)(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<u64> {
        self.query(sql, params).await.map(|output| output.row_count)
    }

    async fn simple_query(&self, sql: &str) -> BrowseResult<QueryOutput> {
        self.query(sql, &[]).await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Yield to other tasks until `condition` holds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}
