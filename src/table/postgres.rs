// table2sheet/src/table/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::{Result, SyncError};
use crate::table::{CellValue, TableReader, TableSnapshot};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads whole tables from PostgreSQL. Opens a fresh single-connection pool
/// per pass and closes it afterwards, so nothing is held between passes.
pub struct PgTableReader {
    database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    /// Underlying type name, e.g. `int4`, `_text` or an enum's own name.
    pub udt_name: String,
    /// Declared through a domain, which the driver reports under the domain's name.
    pub is_domain: bool,
    pub nullable: bool,
}

/// Types read through their native decoders. Every other column is cast to
/// text by the server, the same text `psql` prints.
const NATIVE_TYPES: &[&str] = &[
    "bool", "int2", "int4", "int8", "float4", "float8", "numeric", "uuid", "json", "jsonb",
    "timestamptz", "timestamp", "date", "time", "text", "varchar", "bpchar", "name", "_text",
    "_varchar", "_int4", "_int8",
];

impl ColumnInfo {
    fn decodes_natively(&self) -> bool {
        !self.is_domain && NATIVE_TYPES.contains(&self.udt_name.as_str())
    }
}

/// Full-table scan with a text cast on every column without a native decoder.
fn select_all_query(table_name: &str, columns: &[ColumnInfo]) -> String {
    let projection = columns
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            if c.decodes_natively() {
                ident
            } else {
                format!("{}::text AS {}", ident, ident)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {} ORDER BY 1", projection, quote_ident(table_name))
}

/// Summary printed by the `check` command.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub server_version: String,
    pub public_tables: Vec<String>,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
}

impl PgTableReader {
    pub fn new(database: DatabaseConfig) -> Self {
        PgTableReader { database }
    }

    async fn connect(&self) -> Result<PgPool> {
        debug!("Connecting to {}", self.database.display_target);
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(self.database.connect_options.clone())
            .await
            .map_err(|e| {
                SyncError::Connection(format!(
                    "Failed to connect to {}: {}",
                    self.database.display_target, e
                ))
            })
    }

    /// Describes the database and the configured table without reading its rows.
    pub async fn describe_table(&self, table_name: &str) -> Result<TableInfo> {
        let pool = self.connect().await?;
        let info = describe_with_pool(&pool, table_name).await;
        pool.close().await;
        info
    }
}

#[async_trait]
impl TableReader for PgTableReader {
    async fn read_snapshot(&self, table_name: &str) -> Result<TableSnapshot> {
        let pool = self.connect().await?;
        let snapshot = read_with_pool(&pool, table_name).await;
        pool.close().await;
        snapshot
    }
}

async fn read_with_pool(pool: &PgPool, table_name: &str) -> Result<TableSnapshot> {
    ensure_table_exists(pool, table_name).await?;

    let column_info = fetch_columns(pool, table_name).await?;
    let columns: Vec<String> = column_info.iter().map(|c| c.name.clone()).collect();
    if columns.is_empty() {
        // ORDER BY 1 is invalid on a table without columns.
        return Ok(TableSnapshot::new(table_name, columns, Vec::new()));
    }

    let query = select_all_query(table_name, &column_info);
    debug!("Scanning with: {}", query);
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .await
        .map_err(|e| classify(e, &format!("Failed to read table '{}'", table_name)))?;

    let mut data = Vec::with_capacity(rows.len());
    for row in &rows {
        data.push(decode_row(row)?);
    }

    info!(
        "Retrieved {} rows and {} columns from table '{}'",
        data.len(),
        columns.len(),
        table_name
    );
    Ok(TableSnapshot::new(table_name, columns, data))
}

async fn ensure_table_exists(pool: &PgPool, table_name: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
    )
    .bind(table_name)
    .fetch_one(pool)
    .await
    .map_err(|e| classify(e, "Failed to look up table in information_schema"))?;

    if !exists {
        return Err(SyncError::Query(format!(
            "Table '{}' not found in schema 'public'",
            table_name
        )));
    }
    Ok(())
}

async fn fetch_columns(pool: &PgPool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query_as::<_, (String, String, String, bool, String)>(
        r#"
        SELECT column_name::text, data_type::text, udt_name::text,
               domain_name IS NOT NULL, is_nullable::text
        FROM information_schema.columns
        WHERE table_schema = 'public' AND table_name = $1
        ORDER BY ordinal_position
        "#,
    )
    .bind(table_name)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(e, &format!("Failed to list columns of '{}'", table_name)))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, udt_name, is_domain, is_nullable)| ColumnInfo {
            name,
            data_type,
            udt_name,
            is_domain,
            nullable: is_nullable == "YES",
        })
        .collect())
}

async fn describe_with_pool(pool: &PgPool, table_name: &str) -> Result<TableInfo> {
    let server_version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, "Failed to read server version"))?;

    let public_tables: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify(e, "Failed to list tables"))?;

    ensure_table_exists(pool, table_name).await?;
    let columns = fetch_columns(pool, table_name).await?;

    let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table_name)))
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, &format!("Failed to count rows of '{}'", table_name)))?;

    Ok(TableInfo {
        server_version,
        public_tables,
        columns,
        row_count,
    })
}

/// Quotes an identifier for interpolation. The name is used verbatim, so
/// mixed-case table names keep their case.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Transport-level failures become connection errors; anything the server
/// answered with is a query error.
fn classify(err: sqlx::Error, context: &str) -> SyncError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SyncError::Connection(format!("{}: {}", context, err)),
        other => SyncError::Query(format!("{}: {}", context, other)),
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<CellValue>> {
    (0..row.len()).map(|index| decode_cell(row, index)).collect()
}

fn decode_cell(row: &PgRow, index: usize) -> Result<CellValue> {
    let column = row.column(index);
    let type_name = column.type_info().name();
    let decoded = decode_by_type(row, index, type_name);
    decoded.map_err(|e| {
        SyncError::Query(format!(
            "Failed to decode column '{}' of type {}: {}",
            column.name(),
            type_name,
            e
        ))
    })
}

fn decode_by_type(row: &PgRow, index: usize, type_name: &str) -> std::result::Result<CellValue, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(CellValue::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(|v| CellValue::Int(v.into())),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(|v| CellValue::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(CellValue::Int),
        // Widening to f64 would expose binary noise (0.1 -> 0.10000000149011612).
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| CellValue::Decimal(v.to_string())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(CellValue::Float),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(index)?
            .map(|v| CellValue::Decimal(v.to_string())),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|v| CellValue::Text(v.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(|v| CellValue::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|v| CellValue::Timestamp(v.naive_utc())),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index)?.map(CellValue::Timestamp),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(CellValue::Date),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)?
            .map(|v| CellValue::Text(v.format("%H:%M:%S").to_string())),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(index)?
            .map(|v| CellValue::Text(v.join(", "))),
        "INT4[]" => row
            .try_get::<Option<Vec<i32>>, _>(index)?
            .map(|v| CellValue::Text(join_display(&v))),
        "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(index)?
            .map(|v| CellValue::Text(join_display(&v))),
        // TEXT, VARCHAR, BPCHAR, NAME and anything else with a text decoding.
        _ => row.try_get::<Option<String>, _>(index)?.map(CellValue::Text),
    };
    Ok(value.unwrap_or(CellValue::Null))
}

fn join_display<T: ToString>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
