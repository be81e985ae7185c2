pub mod logging;
pub mod setting;

use chrono::{DateTime, Local, Utc};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// Exit status after a second interrupt, the shell's convention for SIGINT.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Timestamp layout used in worksheets and log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Strips the password from a connection URL so it can be logged.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                // set_password only fails for cannot-be-a-base URLs, which have no password.
                let _ = parsed.set_password(None);
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}

pub fn format_local(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Cancels `token` on Ctrl+C, or SIGTERM on Unix. A further Ctrl+C exits
/// the process without waiting for the pass in flight.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping after the current pass (Ctrl+C again to force)"),
        _ = terminate => info!("Received SIGTERM, stopping after the current pass (Ctrl+C to force)"),
    }
    token.cancel();

    if let Some(code) = forced_exit(tokio::signal::ctrl_c()).await {
        warn!("Received second Ctrl+C, exiting without finishing the current pass");
        std::process::exit(code);
    }
}

/// Waits for one more interrupt. `None` when it cannot be listened for.
async fn forced_exit<F>(interrupt: F) -> Option<i32>
where
    F: Future<Output = std::io::Result<()>>,
{
    match interrupt.await {
        Ok(()) => Some(FORCED_EXIT_CODE),
        Err(e) => {
            warn!("Failed to listen for a second Ctrl+C: {}", e);
            None
        }
    }
}
