use super::{ConnectionParams, QueryExecutor};
use crate::errors::QueryExecutionError;
use crate::model::{QueryResult, ScalarValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};

/// MySQL executor. Each statement is prepared on its own and runs in a
/// `READ ONLY` transaction that is always rolled back. Values are decoded
/// from the binary protocol by column type; dates and times become text.
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    pub async fn connect(params: &ConnectionParams) -> Result<Self, QueryExecutionError> {
        let mut opts = MySqlConnectOptions::new()
            .host(&params.host)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);
        if let Some(port) = params.port {
            opts = opts.port(port);
        }
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        tracing::info!(event = "db_connected", url = %params.redacted_url());
        Ok(Self { pool })
    }

    pub async fn connect_url(url: &str) -> Result<Self, QueryExecutionError> {
        let pool = MySqlPoolOptions::new().max_connections(1).connect(url).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryExecutionError> {
        let mut conn = self.pool.acquire().await?;
        (&mut *conn).execute("START TRANSACTION READ ONLY").await?;

        // A prepared statement holds exactly one statement; stacked SQL
        // fails at prepare time instead of running piecewise.
        let fetched = sqlx::query(sql).fetch_all(&mut *conn).await;
        let rolled_back = (&mut *conn).execute("ROLLBACK").await;

        let rows = fetched?;
        rolled_back?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(row_values(row)?);
        }
        Ok(QueryResult::new(columns, out))
    }

    fn backend_name(&self) -> &'static str {
        "mysql"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Signed,
    Unsigned,
    Bool,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Timestamp,
    Binary,
    Text,
}

fn column_kind(type_name: &str) -> ColumnKind {
    let upper = type_name.to_ascii_uppercase();
    if upper.contains("BLOB") || upper.contains("BINARY") {
        return ColumnKind::Binary;
    }
    let mut parts = upper.split_whitespace();
    let base = parts.next().unwrap_or_default();
    let unsigned = parts.any(|p| p == "UNSIGNED");
    match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
            if unsigned {
                ColumnKind::Unsigned
            } else {
                ColumnKind::Signed
            }
        }
        "BOOLEAN" => ColumnKind::Bool,
        "FLOAT" => ColumnKind::Float,
        "DOUBLE" => ColumnKind::Double,
        "DECIMAL" => ColumnKind::Decimal,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "DATETIME" => ColumnKind::DateTime,
        "TIMESTAMP" => ColumnKind::Timestamp,
        _ => ColumnKind::Text,
    }
}

fn row_values(row: &MySqlRow) -> Result<Vec<ScalarValue>, QueryExecutionError> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        if row.try_get_raw(i)?.is_null() {
            values.push(ScalarValue::Null);
            continue;
        }
        values.push(decode(row, i, column_kind(col.type_info().name()))?);
    }
    Ok(values)
}

fn decode(row: &MySqlRow, i: usize, kind: ColumnKind) -> Result<ScalarValue, sqlx::Error> {
    Ok(match kind {
        ColumnKind::Signed => ScalarValue::Integer(row.try_get_unchecked::<i64, _>(i)?),
        ColumnKind::Unsigned => {
            let v = row.try_get_unchecked::<u64, _>(i)?;
            // values beyond i64 stay textual rather than wrapping
            i64::try_from(v)
                .map(ScalarValue::Integer)
                .unwrap_or_else(|_| ScalarValue::Text(v.to_string()))
        }
        ColumnKind::Bool => ScalarValue::Bool(row.try_get_unchecked::<bool, _>(i)?),
        ColumnKind::Float => ScalarValue::Real(row.try_get_unchecked::<f32, _>(i)? as f64),
        ColumnKind::Double => ScalarValue::Real(row.try_get_unchecked::<f64, _>(i)?),
        ColumnKind::Decimal => {
            // DECIMAL travels as text even over the binary protocol
            let text = row.try_get_unchecked::<String, _>(i)?;
            text.parse::<f64>()
                .map(ScalarValue::Real)
                .unwrap_or(ScalarValue::Text(text))
        }
        ColumnKind::Date => ScalarValue::Text(
            row.try_get_unchecked::<NaiveDate, _>(i)?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        ColumnKind::Time => ScalarValue::Text(
            row.try_get_unchecked::<NaiveTime, _>(i)?
                .format("%H:%M:%S%.f")
                .to_string(),
        ),
        ColumnKind::DateTime => ScalarValue::Text(
            row.try_get_unchecked::<NaiveDateTime, _>(i)?
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string(),
        ),
        ColumnKind::Timestamp => ScalarValue::Text(
            row.try_get_unchecked::<DateTime<Utc>, _>(i)?
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string(),
        ),
        ColumnKind::Binary => ScalarValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
        ColumnKind::Text => ScalarValue::Text(row.try_get_unchecked::<String, _>(i)?),
    })
}
