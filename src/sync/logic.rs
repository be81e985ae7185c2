// table2sheet/src/sync/logic.rs
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::errors::{ErrorKind, Result, SyncError};
use crate::sheets::{SnapshotWriter, WriteReport};
use crate::sync::RunMode;
use crate::table::{TableReader, TableSnapshot};
use crate::utils::format_local;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failure,
}

/// Outcome of one pass. Failures carry the typed error instead of raising it.
#[derive(Debug)]
pub struct SyncResult {
    pub status: SyncStatus,
    pub table_name: String,
    pub rows_written: usize,
    pub columns_written: usize,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub spreadsheet_url: Option<String>,
    pub error: Option<SyncError>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(SyncError::kind)
    }
}

/// Runs `fut`, failing with [`SyncError::Timeout`] when a limit is configured and exceeded.
/// A timed-out write is abandoned wherever it was.
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| SyncError::Timeout {
                operation,
                seconds: limit.as_secs(),
            })?,
        None => fut.await,
    }
}

fn metadata_entries(
    config: &SyncConfig,
    mode: RunMode,
    started_at: DateTime<Utc>,
    snapshot: &TableSnapshot,
    report: &WriteReport,
) -> Vec<(String, String)> {
    let mut entries = vec![
        ("Last Sync Time".to_string(), format_local(started_at)),
        ("Source Table".to_string(), config.table_name.clone()),
        ("Total Rows".to_string(), snapshot.row_count().to_string()),
        ("Total Columns".to_string(), snapshot.column_count().to_string()),
        ("Data Worksheet".to_string(), report.worksheet.clone()),
        ("Spreadsheet URL".to_string(), report.spreadsheet_url.clone()),
    ];
    match mode {
        RunMode::OneTime => entries.push(("Sync Type".to_string(), "One-time".to_string())),
        RunMode::Continuous => {
            entries.push((
                "Sync Interval".to_string(),
                format!("{:.1} minutes", config.interval_minutes()),
            ));
            entries.push(("Status".to_string(), "Running".to_string()));
        }
    }
    entries
}

async fn execute_pass<R, W>(
    config: &SyncConfig,
    reader: &R,
    writer: &W,
    mode: RunMode,
    started_at: DateTime<Utc>,
) -> Result<WriteReport>
where
    R: TableReader + ?Sized,
    W: SnapshotWriter + ?Sized,
{
    info!("Downloading data from table '{}'...", config.table_name);
    let snapshot = with_timeout(
        config.call_timeout,
        "table read",
        reader.read_snapshot(&config.table_name),
    )
    .await?;
    info!(
        "Downloaded {} rows and {} columns from '{}'",
        snapshot.row_count(),
        snapshot.column_count(),
        snapshot.table_name
    );
    for row in snapshot.rows.iter().take(3) {
        debug!("preview: {:?}", row);
    }

    info!("Updating spreadsheet '{}'...", config.sheet.spreadsheet_name);
    let report = with_timeout(
        config.call_timeout,
        "spreadsheet write",
        writer.write_snapshot(&snapshot),
    )
    .await?;
    debug!(
        "Wrote worksheet '{}' of spreadsheet {}",
        report.worksheet, report.spreadsheet_id
    );

    let entries = metadata_entries(config, mode, started_at, &snapshot, &report);
    with_timeout(config.call_timeout, "metadata write", writer.write_metadata(&entries)).await?;

    Ok(report)
}

/// One pass: read the table, then overwrite the spreadsheet with it.
///
/// Never returns an error; every failure is captured in the [`SyncResult`].
/// The writer is only called once the read succeeded. Holds nothing between calls.
pub async fn run_once<R, W>(config: &SyncConfig, reader: &R, writer: &W, mode: RunMode) -> SyncResult
where
    R: TableReader + ?Sized,
    W: SnapshotWriter + ?Sized,
{
    let started_at = Utc::now();
    let clock = Instant::now();

    let outcome = execute_pass(config, reader, writer, mode, started_at).await;
    let duration = clock.elapsed();

    match outcome {
        Ok(report) => SyncResult {
            status: SyncStatus::Success,
            table_name: config.table_name.clone(),
            rows_written: report.rows_written,
            columns_written: report.columns_written,
            started_at,
            duration,
            spreadsheet_url: Some(report.spreadsheet_url),
            error: None,
        },
        Err(err) => SyncResult {
            status: SyncStatus::Failure,
            table_name: config.table_name.clone(),
            rows_written: 0,
            columns_written: 0,
            started_at,
            duration,
            spreadsheet_url: None,
            error: Some(err),
        },
    }
}

pub fn log_result(result: &SyncResult) {
    match &result.error {
        None => info!(
            rows = result.rows_written,
            columns = result.columns_written,
            duration_ms = result.duration.as_millis() as u64,
            "✓ Synced {} rows from '{}' (started {}) to {}",
            result.rows_written,
            result.table_name,
            format_local(result.started_at),
            result.spreadsheet_url.as_deref().unwrap_or("<unknown>")
        ),
        Some(err) => {
            error!(
                kind = %err.kind(),
                duration_ms = result.duration.as_millis() as u64,
                "❌ Sync of '{}' failed: {}",
                result.table_name,
                err
            );
            if err.left_sheet_cleared() {
                warn!("The worksheet was cleared before the failure and may be empty or partially written until the next successful pass");
            }
            if !err.is_retryable() {
                error!("The spreadsheet credential needs operator attention; later passes will keep failing until it is renewed");
            }
        }
    }
}
