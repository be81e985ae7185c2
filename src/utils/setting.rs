// Connection check for the configured database and table
use anyhow::{Context, Result};
use tracing::info;

use crate::config::SyncConfig;
use crate::table::PgTableReader;

/// Connects, reports server and table details, and leaves the spreadsheet alone.
pub async fn check_db_connection(config: &SyncConfig) -> Result<()> {
    info!("🔍 Testing connection to {}", config.database.display_target);
    let reader = PgTableReader::new(config.database.clone());
    let table = reader
        .describe_table(&config.table_name)
        .await
        .with_context(|| format!("Connection check failed for table '{}'", config.table_name))?;

    info!("✅ Connected: {}", table.server_version);
    if table.public_tables.is_empty() {
        info!("No tables found in schema 'public'");
    } else {
        info!("Tables in schema 'public': {}", table.public_tables.join(", "));
    }

    info!("TABLE SUMMARY for '{}'", config.table_name);
    info!("   Column Count: {}", table.columns.len());
    info!("   Row Count: {}", table.row_count);
    for (i, column) in table.columns.iter().enumerate() {
        info!(
            "   {:<3} {:<25} {:<20} {}",
            i + 1,
            column.name,
            column.data_type,
            if column.nullable { "NULL" } else { "NOT NULL" }
        );
    }
    Ok(())
}
