//! Connection pool provider backed by deadpool-postgres.
//!
//! The session manager only talks to the [`PoolProvider`] and [`DatabasePool`]
//! traits. [`PgPoolProvider`] is the production implementation:
//! - TLS is requested for every host except loopback
//! - Server certificates are not verified (managed databases often use a
//!   private CA). This is a known security trade-off.
//! - Pool creation does no I/O; [`DatabasePool::ping`] is the round-trip test

use crate::error::{BrowseError, BrowseResult};
use crate::models::query::param_refs;
use crate::models::{
    ConnectionOptions, DatabaseConfig, QueryOutput, ResultColumn, Row, SqlValue, TlsMode,
};
use crate::numeric;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{NoTls, SimpleQueryMessage};
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A live pool able to run parameterized statements.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Lightweight round-trip used to confirm the pool works.
    async fn ping(&self) -> BrowseResult<()>;

    /// Run a statement that returns rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<QueryOutput>;

    /// Run a statement and return the number of rows affected.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<u64>;

    /// Run free-form SQL through the simple query protocol.
    ///
    /// Multiple statements are allowed; rows come from every statement and the
    /// row count from the last one. Values are returned as text.
    async fn simple_query(&self, sql: &str) -> BrowseResult<QueryOutput>;

    /// Close the pool, dropping all connections.
    fn close(&self);

    /// Check if the pool is closed.
    fn is_closed(&self) -> bool;
}

/// Creates pools for validated configurations.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    /// Create a pool for `config`. No round-trip is required here.
    async fn create(&self, config: &DatabaseConfig) -> BrowseResult<Arc<dyn DatabasePool>>;
}

/// PostgreSQL pool provider.
#[derive(Debug, Clone, Default)]
pub struct PgPoolProvider {
    options: ConnectionOptions,
}

impl PgPoolProvider {
    /// Create a provider with the given pool options.
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }

    /// Pool options used for new pools.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn manager(&self, config: &DatabaseConfig) -> BrowseResult<Manager> {
        let connect_timeout = Duration::from_secs(u64::from(self.options.connect_timeout_secs));

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&config.hostname);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.username);
        pg_config.password(&config.password);
        pg_config.application_name(&self.options.application_name);
        pg_config.connect_timeout(connect_timeout);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(60));

        let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };

        match config.tls_mode() {
            TlsMode::Disabled => {
                pg_config.ssl_mode(SslMode::Disable);
                Ok(Manager::from_config(pg_config, NoTls, manager_config))
            }
            TlsMode::RequireUnverified => {
                pg_config.ssl_mode(SslMode::Require);
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(|e| {
                        BrowseError::connection_with_hint(
                            format!("Failed to create TLS connector: {e}"),
                            "Check your system's TLS configuration",
                        )
                    })?;
                Ok(Manager::from_config(pg_config, MakeTlsConnector::new(connector), manager_config))
            }
        }
    }
}

#[async_trait]
impl PoolProvider for PgPoolProvider {
    async fn create(&self, config: &DatabaseConfig) -> BrowseResult<Arc<dyn DatabasePool>> {
        config.validate()?;

        let manager = self.manager(config)?;
        let pool = Pool::builder(manager)
            .max_size(self.options.max_pool_size)
            .wait_timeout(Some(Duration::from_secs(u64::from(self.options.pool_wait_timeout_secs))))
            .create_timeout(Some(Duration::from_secs(u64::from(self.options.connect_timeout_secs))))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BrowseError::connection(format!("Failed to create pool: {e}")))?;

        tracing::debug!(
            host = %config.hostname,
            port = config.port,
            database = %config.database,
            tls = ?config.tls_mode(),
            "Connection pool created"
        );

        Ok(Arc::new(PgPool { pool, label: config.display_url() }))
    }
}

/// A deadpool-postgres pool for one configuration.
pub struct PgPool {
    pool: Pool,
    label: String,
}

impl PgPool {
    async fn client(&self) -> BrowseResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(pool_error)
    }
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("target", &self.label)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

fn pool_error(err: PoolError) -> BrowseError {
    match err {
        PoolError::Backend(e) => BrowseError::from(e),
        PoolError::Closed => BrowseError::connection("Connection pool is closed"),
        PoolError::Timeout(kind) => BrowseError::connection_with_hint(
            format!("Timed out waiting for a connection ({kind:?})"),
            "Check that the server is reachable and not overloaded",
        ),
        other => BrowseError::connection(format!("Failed to acquire connection: {other}")),
    }
}

#[async_trait]
impl DatabasePool for PgPool {
    async fn ping(&self) -> BrowseResult<()> {
        let client = self.client().await?;
        client.execute("SELECT 1", &[]).await?;
        tracing::debug!(target_db = %self.label, "Connection test succeeded");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<QueryOutput> {
        let client = self.client().await?;
        let statement = client.prepare_cached(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|col| ResultColumn {
                name: col.name().to_string(),
                type_name: col.type_().name().to_string(),
            })
            .collect();

        let refs = param_refs(params);
        let rows = client.query(&statement, &refs).await?;
        Ok(QueryOutput::from_rows(columns, rows.iter().map(row_to_json).collect()))
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> BrowseResult<u64> {
        let client = self.client().await?;
        let refs = param_refs(params);
        Ok(client.execute(sql, &refs).await?)
    }

    async fn simple_query(&self, sql: &str) -> BrowseResult<QueryOutput> {
        let client = self.client().await?;
        let messages = client.simple_query(sql).await?;

        let mut columns: Vec<ResultColumn> = Vec::new();
        let mut rows = Vec::new();
        let mut row_count = 0;

        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if columns.is_empty() {
                        columns = row
                            .columns()
                            .iter()
                            .map(|col| ResultColumn {
                                name: col.name().to_string(),
                                type_name: "text".to_string(),
                            })
                            .collect();
                    }
                    let mut json_row = Row::new();
                    for (i, col) in row.columns().iter().enumerate() {
                        let value = row
                            .get(i)
                            .map(|s| JsonValue::String(s.to_string()))
                            .unwrap_or(JsonValue::Null);
                        json_row.insert(col.name().to_string(), value);
                    }
                    rows.push(json_row);
                }
                SimpleQueryMessage::CommandComplete(count) => row_count = count,
                _ => {}
            }
        }

        Ok(QueryOutput { columns, rows, row_count })
    }

    fn close(&self) {
        self.pool.close();
        tracing::info!(target_db = %self.label, "Connection pool closed");
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

// ============================================================================
// Row conversion
// ============================================================================

/// Convert a PostgreSQL row to a JSON object keyed by column name.
fn row_to_json(row: &tokio_postgres::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), column_to_json(row, i, col.type_())))
        .collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, i: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(i).ok().flatten()
}

fn number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value).map(JsonValue::Number).unwrap_or(JsonValue::Null)
}

fn column_to_json(row: &tokio_postgres::Row, i: usize, ty: &Type) -> JsonValue {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, i).map(JsonValue::Bool),
        Type::INT2 => get::<i16>(row, i).map(|v| JsonValue::Number(v.into())),
        Type::INT4 => get::<i32>(row, i).map(|v| JsonValue::Number(v.into())),
        Type::INT8 => get::<i64>(row, i).map(|v| JsonValue::Number(v.into())),
        Type::OID => get::<u32>(row, i).map(|v| JsonValue::Number(v.into())),
        Type::FLOAT4 => get::<f32>(row, i).map(|v| number(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, i).map(number),
        Type::NUMERIC => get::<PgNumeric>(row, i).map(|v| JsonValue::String(v.0)),
        Type::UUID => get::<Uuid>(row, i).map(|v| JsonValue::String(v.to_string())),
        Type::JSON | Type::JSONB => get::<JsonValue>(row, i),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, i).map(|v| JsonValue::String(v.to_rfc3339()))
        }
        Type::TIMESTAMP => get::<NaiveDateTime>(row, i).map(|v| JsonValue::String(v.to_string())),
        Type::DATE => get::<NaiveDate>(row, i).map(|v| JsonValue::String(v.to_string())),
        Type::TIME => get::<NaiveTime>(row, i).map(|v| JsonValue::String(v.to_string())),
        Type::BYTEA => get::<Vec<u8>>(row, i).map(|bytes| {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            JsonValue::String(format!("\\x{hex}"))
        }),
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, i).map(|v| {
            JsonValue::Array(v.into_iter().map(|x| x.map(JsonValue::from).unwrap_or_default()).collect())
        }),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, i).map(|v| {
            JsonValue::Array(v.into_iter().map(|x| x.map(JsonValue::from).unwrap_or_default()).collect())
        }),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<Option<String>>>(row, i).map(|v| {
            JsonValue::Array(v.into_iter().map(|x| x.map(JsonValue::from).unwrap_or_default()).collect())
        }),
        _ if <String as FromSql>::accepts(ty) => get::<String>(row, i).map(JsonValue::String),
        _ => get::<RawValue>(row, i).map(|raw| match ty.kind() {
            Kind::Enum(_) => JsonValue::String(String::from_utf8_lossy(&raw.0).into_owned()),
            _ => JsonValue::String(format!("<{}>", ty.name())),
        }),
    };
    value.unwrap_or(JsonValue::Null)
}

/// Raw bytes of a column of any type.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// NUMERIC decoded to its exact decimal text.
///
/// `rust_decimal` handles the common case. Values it would round or cannot
/// hold (NaN, infinities, more than 28 significant digits) go through the
/// digit-group codec instead.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let dscale = raw.get(6..8).map(|b| u32::from(u16::from_be_bytes([b[0], b[1]])));
        match Decimal::from_sql(ty, raw) {
            Ok(decimal) if Some(decimal.scale()) == dscale => Ok(Self(decimal.to_string())),
            _ => numeric::decode(raw).map(Self),
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}
