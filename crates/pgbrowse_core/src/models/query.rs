//! Query building and execution models.

use crate::error::{BrowseError, BrowseResult};
use crate::numeric;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

/// 2^63, the first float past the `i64` range.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// A result row keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

// ============================================================================
// SqlValue
// ============================================================================

/// A bound parameter value.
///
/// Values arrive from the UI as JSON, so the concrete PostgreSQL type is not
/// known up front. Encoding converts to whatever type the server inferred for
/// the placeholder, e.g. `Int(5)` is sent as `int4` for an `integer` column and
/// `Text("5")` is parsed when the column is numeric.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum SqlValue {
    /// SQL NULL
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// Arbitrary JSON (objects and nested arrays)
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text rendering used for text-typed parameters and LIKE patterns.
    pub fn as_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    fn as_bool(&self) -> Result<bool, BoxError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(i) => Ok(*i != 0),
            Self::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
                "false" | "f" | "no" | "n" | "off" | "0" => Ok(false),
                other => Err(format!("invalid boolean value: {other:?}").into()),
            },
            other => Err(format!("cannot convert {other:?} to boolean").into()),
        }
    }

    fn as_i64(&self) -> Result<i64, BoxError> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Float(f) if f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(f) => {
                Ok(*f as i64)
            }
            Self::Float(f) => Err(format!("{f} is not representable as a 64-bit integer").into()),
            Self::Text(s) => Ok(s.trim().parse::<i64>()?),
            other => Err(format!("cannot convert {other:?} to integer").into()),
        }
    }

    fn as_f64(&self) -> Result<f64, BoxError> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(i) => Ok(*i as f64),
            Self::Text(s) => Ok(s.trim().parse::<f64>()?),
            other => Err(format!("cannot convert {other:?} to float").into()),
        }
    }

    /// Narrowed for `real` columns. NaN and infinities pass through, but a
    /// finite value beyond the `f32` range is an error.
    fn as_f32(&self) -> Result<f32, BoxError> {
        let wide = self.as_f64()?;
        let narrow = wide as f32;
        if wide.is_finite() && narrow.is_infinite() {
            return Err(format!("{wide} is out of range for type real").into());
        }
        Ok(narrow)
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Self::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone())),
            other => JsonValue::from(other.clone()),
        }
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

impl From<SqlValue> for JsonValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(b),
            SqlValue::Int(i) => JsonValue::Number(i.into()),
            SqlValue::Float(f) => {
                serde_json::Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            }
            SqlValue::Text(s) => JsonValue::String(s),
            SqlValue::Json(v) => v,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => self.as_bool()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT8 => self.as_i64()?.to_sql(ty, out),
            Type::FLOAT4 => self.as_f32()?.to_sql(ty, out),
            Type::FLOAT8 => self.as_f64()?.to_sql(ty, out),
            Type::NUMERIC => match Decimal::from_str_exact(self.as_text().trim()) {
                Ok(decimal) => decimal.to_sql(ty, out),
                // NaN, infinities and more than 28 significant digits.
                Err(_) => {
                    out.extend_from_slice(&numeric::encode(&self.as_text())?);
                    Ok(IsNull::No)
                }
            },
            Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
            Type::UUID => Uuid::parse_str(self.as_text().trim())?.to_sql(ty, out),
            Type::DATE => {
                NaiveDate::parse_from_str(self.as_text().trim(), "%Y-%m-%d")?.to_sql(ty, out)
            }
            Type::TIMESTAMP => parse_timestamp(&self.as_text())?.to_sql(ty, out),
            Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(self.as_text().trim())?
                .with_timezone(&Utc)
                .to_sql(ty, out),
            _ if <&str as ToSql>::accepts(ty) => self.as_text().as_str().to_sql(ty, out),
            _ => Err(format!("unsupported parameter type: {ty}").into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, BoxError> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(Into::into)
}

// ============================================================================
// Filters, sorting, pagination
// ============================================================================

/// Comparison operator of a filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterOperator {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// `LIKE`, matched as a substring
    Like,
    /// `IN`, matched against a list
    In,
}

impl FilterOperator {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

impl FromStr for FilterOperator {
    type Err = BrowseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" => Ok(Self::NotEq),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "LIKE" => Ok(Self::Like),
            "IN" => Ok(Self::In),
            _ => Err(BrowseError::validation(format!("Unsupported filter operator: {s}"))),
        }
    }
}

impl TryFrom<String> for FilterOperator {
    type Error = BrowseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        op.as_sql().to_string()
    }
}

/// Right-hand side of a filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// List of values, required by `IN`
    List(Vec<SqlValue>),
    /// Single value
    Scalar(SqlValue),
}

impl From<SqlValue> for FilterValue {
    fn from(value: SqlValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<SqlValue>> for FilterValue {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::List(values)
    }
}

/// One predicate; conditions in a list are ANDed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Column name, quoted as an identifier when rendered
    pub column: String,
    /// Comparison operator
    pub operator: FilterOperator,
    /// Bound value(s)
    pub value: FilterValue,
}

impl FilterCondition {
    /// Create a new filter condition.
    pub fn new(
        column: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self { column: column.into(), operator, value: value.into() }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOperator::Eq, value.into())
    }

    /// `column LIKE %pattern%`
    pub fn like(column: impl Into<String>, pattern: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOperator::Like, pattern.into())
    }

    /// `column IN (values...)`
    pub fn in_list(column: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self::new(column, FilterOperator::In, values)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl SortDirection {
    /// SQL keyword for the direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One sort key; the first entry in a list is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    /// Column name, quoted as an identifier when rendered
    pub column: String,
    /// Sort direction
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortColumn {
    /// Ascending sort on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Asc }
    }

    /// Descending sort on a column.
    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Desc }
    }
}

/// Final limit/offset pair for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationOptions {
    /// Page size, must be positive
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Rows to skip
    #[serde(default)]
    pub offset: u64,
}

fn default_limit() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self { limit: DEFAULT_PAGE_SIZE, offset: 0 }
    }
}

impl PaginationOptions {
    /// Create pagination from an explicit limit and offset.
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// Pagination for a zero-based page index.
    pub fn for_page(page: u64, page_size: u64) -> Self {
        Self { limit: page_size, offset: page.saturating_mul(page_size) }
    }

    /// Limit and offset as bindable values.
    pub fn bind_values(&self) -> BrowseResult<(SqlValue, SqlValue)> {
        if self.limit == 0 {
            return Err(BrowseError::validation("Page size must be greater than zero."));
        }
        let limit = i64::try_from(self.limit)
            .map_err(|_| BrowseError::validation("Page size is too large."))?;
        let offset = i64::try_from(self.offset)
            .map_err(|_| BrowseError::validation("Page offset is too large."))?;
        Ok((SqlValue::Int(limit), SqlValue::Int(offset)))
    }
}

// ============================================================================
// Statements and results
// ============================================================================

/// SQL text with positional placeholders plus the values bound to them.
///
/// `params[k - 1]` is bound to placeholder `$k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `$1..$n` placeholders
    pub sql: String,
    /// Bound values in placeholder order
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Create a new statement.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Parameters as driver references.
    pub fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        param_refs(&self.params)
    }
}

/// Borrow a parameter list as driver references.
pub fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Type of SQL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// SELECT query returning rows
    Select,
    /// INSERT operation
    Insert,
    /// UPDATE operation
    Update,
    /// DELETE operation
    Delete,
    /// DDL, COPY, or other operations
    Other,
}

impl QueryType {
    /// Detect the type of SQL query.
    pub fn detect(sql: &str) -> Self {
        match command_keyword(sql).as_str() {
            "SELECT" | "WITH" | "TABLE" | "VALUES" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::Other,
        }
    }
}

/// First keyword of a statement, upper-cased; `UNKNOWN` for blank input.
pub fn command_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(';').to_uppercase())
        .filter(|word| !word.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Column metadata from query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultColumn {
    /// Column name
    pub name: String,
    /// Human-readable type name
    pub type_name: String,
}

/// Rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    /// Column metadata
    pub columns: Vec<ResultColumn>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Rows returned, or rows affected for commands
    pub row_count: u64,
}

impl QueryOutput {
    /// Deserialize each row into `T` by column name.
    pub fn decode_rows<T: DeserializeOwned>(self) -> BrowseResult<Vec<T>> {
        self.rows
            .into_iter()
            .map(|row| serde_json::from_value(JsonValue::Object(row)).map_err(BrowseError::from))
            .collect()
    }

    /// Values of one text column, skipping NULLs.
    pub fn column_strings(&self, column: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(JsonValue::as_str).map(String::from))
            .collect()
    }

    /// Build output from rows, counting them.
    pub fn from_rows(columns: Vec<ResultColumn>, rows: Vec<Row>) -> Self {
        let row_count = rows.len() as u64;
        Self { columns, rows, row_count }
    }

    /// Read a count column from the first row.
    pub fn first_count(&self, column: &str) -> u64 {
        self.rows
            .first()
            .and_then(|row| row.get(column))
            .and_then(|value| match value {
                JsonValue::Number(n) => n.as_u64(),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(0)
    }
}

/// Result of a free-form query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomQueryResult {
    /// Column metadata
    pub columns: Vec<ResultColumn>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Rows returned or affected
    pub row_count: u64,
    /// Time to execute in milliseconds
    pub execution_time_ms: u64,
    /// Leading SQL keyword, e.g. `SELECT`
    pub command: String,
}
