//! Table-to-spreadsheet sync tool
//!
//! Copies one PostgreSQL table into a Google spreadsheet, once or on an interval

// table2sheet/src/main.rs
mod config;
mod errors;
mod sheets;
mod sync;
mod table;
mod utils;

use anyhow::{Context, Result};
use config::{RawEnvConfig, SyncConfig, load_credentials_config};
use sheets::{GoogleSheetsClient, SpreadsheetWriter};
use std::env;
use std::process::ExitCode;
use table::PgTableReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be populated.
    let _ = dotenv::dotenv();
    utils::logging::init_tracing();

    match run_app().await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<ExitCode> {
    let raw = RawEnvConfig::from_env()?;
    let config = SyncConfig::from_raw(&raw).context("Failed to load sync configuration")?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        show_configuration(&config);
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "continuous" => {
            let writer = connect_writer(&raw, &config).await?;
            let reader = PgTableReader::new(config.database.clone());

            let shutdown = CancellationToken::new();
            tokio::spawn(utils::shutdown_signal(shutdown.clone()));

            sync::run_continuous(&config, &reader, &writer, shutdown).await;
            info!("Sync process stopped gracefully");
            Ok(ExitCode::SUCCESS)
        }
        "2" | "once" => {
            let writer = connect_writer(&raw, &config).await?;
            let reader = PgTableReader::new(config.database.clone());

            let result = sync::run_one_time(&config, &reader, &writer).await;
            if result.is_success() {
                info!("✅ One-time sync completed: {} rows", result.rows_written);
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        "3" | "check" => {
            utils::setting::check_db_connection(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (continuous), '2' (once), or '3' (check).");
            anyhow::bail!("Invalid operation choice: {}", choice);
        }
    }
}

async fn connect_writer(raw: &RawEnvConfig, config: &SyncConfig) -> Result<SpreadsheetWriter<GoogleSheetsClient>> {
    let credentials = load_credentials_config(raw).context("Failed to load spreadsheet credentials")?;
    let client = GoogleSheetsClient::connect(&credentials)
        .await
        .context("Failed to connect to Google Sheets")?;
    Ok(SpreadsheetWriter::new(client, config.sheet.clone()))
}

fn show_configuration(config: &SyncConfig) {
    println!("Current Configuration:");
    println!("  Database: {}", config.database.display_target);
    println!("  Table: {}", config.table_name);
    println!("  Spreadsheet: {}", config.sheet.spreadsheet_name);
    println!("  Worksheet: {}", config.sheet.worksheet_name);
    println!("  Sync Interval: {:.1} minutes", config.interval_minutes());
}

/// Prompts user to select the sync mode
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Choose sync type:");
    println!("1. Continuous sync (or type 'continuous')");
    println!("2. One-time sync (or type 'once')");
    println!("3. Check database connection (or type 'check')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
