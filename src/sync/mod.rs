// table2sheet/src/sync/mod.rs
pub(crate) mod logic;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::sheets::SnapshotWriter;
use crate::table::TableReader;
use crate::utils::format_local;

pub use logic::{SyncResult, log_result, run_once};

/// Which entry point started the pass; recorded in the metadata worksheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    OneTime,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Terminated,
}

/// Counters reported when continuous mode shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuousSummary {
    pub passes: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Idle -> Running -> Terminated. The caller maps the result to an exit code.
pub async fn run_one_time<R, W>(config: &SyncConfig, reader: &R, writer: &W) -> SyncResult
where
    R: TableReader + ?Sized,
    W: SnapshotWriter + ?Sized,
{
    debug!("state {:?} -> {:?}", RunState::Idle, RunState::Running);
    let result = run_once(config, reader, writer, RunMode::OneTime).await;
    log_result(&result);
    debug!("state {:?} -> {:?}", RunState::Running, RunState::Terminated);
    result
}

/// Runs a pass on every tick of the configured interval until `shutdown` is
/// cancelled. Failed passes are logged and the loop carries on.
///
/// Cancellation while idle ends the loop at once. A pass already running is
/// allowed to finish; the loop stops right after it.
pub async fn run_continuous<R, W>(
    config: &SyncConfig,
    reader: &R,
    writer: &W,
    shutdown: CancellationToken,
) -> ContinuousSummary
where
    R: TableReader + ?Sized,
    W: SnapshotWriter + ?Sized,
{
    info!(
        "Starting continuous sync every {:.1} minutes (Ctrl+C to stop)",
        config.interval_minutes()
    );

    let mut ticker = tokio::time::interval(config.interval);
    // A pass longer than the interval pushes the schedule back instead of bunching passes up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = ContinuousSummary::default();
    let mut state = RunState::Idle;

    loop {
        let next = match state {
            RunState::Idle => tokio::select! {
                biased;
                _ = shutdown.cancelled() => RunState::Terminated,
                _ = ticker.tick() => RunState::Running,
            },
            RunState::Running => {
                summary.passes += 1;
                info!("[{}] Starting sync #{}...", format_local(Utc::now()), summary.passes);

                let result = run_once(config, reader, writer, RunMode::Continuous).await;
                log_result(&result);
                if result.is_success() {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }

                if shutdown.is_cancelled() {
                    RunState::Terminated
                } else {
                    RunState::Idle
                }
            }
            RunState::Terminated => break,
        };
        debug!("state {:?} -> {:?}", state, next);
        state = next;
    }

    info!("Shutting down sync process...");
    let final_entries = vec![
        ("Last Sync Time".to_string(), format_local(Utc::now())),
        ("Source Table".to_string(), config.table_name.clone()),
        ("Total Syncs Completed".to_string(), summary.passes.to_string()),
        ("Status".to_string(), "Stopped".to_string()),
    ];
    let recorded = logic::with_timeout(
        config.call_timeout,
        "metadata write",
        writer.write_metadata(&final_entries),
    )
    .await;
    if let Err(e) = recorded {
        warn!("Failed to record stopped status in metadata worksheet: {}", e);
    }

    info!(
        "Sync process stopped: {} passes, {} succeeded, {} failed",
        summary.passes, summary.succeeded, summary.failed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::logic::SyncStatus;
    use super::logic::testing::*;
    use super::*;
    use crate::errors::{ErrorKind, SyncError};
    use crate::sheets::SpreadsheetWriter;
    use crate::sheets::fake::FakeSheets;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_one_time_success_and_failure() {
        let config = test_config();
        let api = Arc::new(FakeSheets::new());
        let writer = SpreadsheetWriter::new(api.clone(), config.sheet.clone());

        let ok = run_one_time(&config, &ScriptedReader::new(vec![Ok(orders())]), &writer).await;
        assert_eq!(ok.status, SyncStatus::Success);

        let failed = run_one_time(
            &config,
            &ScriptedReader::new(vec![Err(SyncError::Query("Table 'orders' not found".into()))]),
            &writer,
        )
        .await;
        assert_eq!(failed.status, SyncStatus::Failure);
        assert_eq!(failed.error_kind(), Some(ErrorKind::Query));
    }

    #[tokio::test]
    async fn test_continuous_survives_failed_pass() {
        let config = test_config();
        let shutdown = CancellationToken::new();
        let reader = ScriptedReader::new(vec![
            Err(SyncError::Connection("connection refused".into())),
            Ok(orders()),
        ])
        .cancel_after(2, shutdown.clone());
        let api = Arc::new(FakeSheets::new());
        let writer = SpreadsheetWriter::new(api.clone(), config.sheet.clone());

        let summary = run_continuous(&config, &reader, &writer, shutdown).await;

        assert_eq!(
            summary,
            ContinuousSummary {
                passes: 2,
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(
            api.worksheet("orders", "orders_data"),
            Some(vec![
                vec![json!("id"), json!("amount")],
                vec![json!(1), json!(9.99)],
                vec![json!(2), json!(19.5)],
            ])
        );
    }

    #[tokio::test]
    async fn test_continuous_keeps_running_on_auth_failure() {
        let config = test_config();
        let shutdown = CancellationToken::new();
        let reader = ScriptedReader::new(vec![Ok(orders()), Ok(orders()), Ok(orders())])
            .cancel_after(3, shutdown.clone());
        let writer = SpreadsheetWriter::new(FakeSheets::with(|s| s.unauthorized = true), config.sheet.clone());

        let summary = run_continuous(&config, &reader, &writer, shutdown).await;

        assert_eq!(summary.passes, 3);
        assert_eq!(summary.failed, 3);
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick_runs_nothing() {
        let config = test_config();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let reader = ScriptedReader::new(vec![Ok(orders())]);
        let writer = SpreadsheetWriter::new(FakeSheets::new(), config.sheet.clone());

        let summary = run_continuous(&config, &reader, &writer, shutdown).await;

        assert_eq!(summary, ContinuousSummary::default());
        assert_eq!(reader.reads(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_idle_stops_without_waiting_for_interval() {
        let mut config = test_config();
        config.interval = Duration::from_secs(3600);
        let shutdown = CancellationToken::new();
        let reader = ScriptedReader::new(vec![Ok(orders())]);
        let writer = SpreadsheetWriter::new(FakeSheets::new(), config.sheet.clone());

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_continuous(&config, &reader, &writer, shutdown),
        )
        .await
        .expect("loop should stop promptly once cancelled");

        assert_eq!(summary.passes, 1);
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_stalled_stopped_record_is_bounded_by_call_timeout() {
        let mut config = test_config();
        config.sheet.metadata_worksheet = Some("Sync_Metadata".into());
        config.call_timeout = Some(Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let reader = ScriptedReader::new(vec![]);
        let writer = SpreadsheetWriter::new(FakeSheets::with(|s| s.stalled = true), config.sheet.clone());

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_continuous(&config, &reader, &writer, shutdown),
        )
        .await
        .expect("shutdown should not wait on a stalled metadata write");

        assert_eq!(summary, ContinuousSummary::default());
    }

    #[tokio::test]
    async fn test_shutdown_records_stopped_status() {
        let mut config = test_config();
        config.sheet.metadata_worksheet = Some("Sync_Metadata".into());
        let shutdown = CancellationToken::new();
        let reader = ScriptedReader::new(vec![Ok(orders())]).cancel_after(1, shutdown.clone());
        let api = Arc::new(FakeSheets::new());
        let writer = SpreadsheetWriter::new(api.clone(), config.sheet.clone());

        run_continuous(&config, &reader, &writer, shutdown).await;

        let metadata = api.worksheet("orders", "Sync_Metadata").unwrap();
        assert!(metadata.contains(&vec![json!("Status"), json!("Stopped")]));
        assert!(metadata.contains(&vec![json!("Total Syncs Completed"), json!("1")]));
    }
}
