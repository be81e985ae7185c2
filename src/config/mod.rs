// table2sheet/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::redact_url;

pub const DEFAULT_INTERVAL_MINUTES: f64 = 2.0;
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_SSL_MODE: &str = "require";
pub const METADATA_WORKSHEET: &str = "Sync_Metadata";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_CERT_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";
const DEFAULT_TOKEN_CACHE: &str = "token_cache.json";

// Raw view of the process environment. Every field is optional here;
// validation happens when building the typed configs below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEnvConfig {
    #[serde(rename = "DATABASE_URL")]
    pub database_url: Option<String>,
    #[serde(rename = "PGHOST")]
    pub pg_host: Option<String>,
    #[serde(rename = "PGPORT")]
    pub pg_port: Option<String>,
    #[serde(rename = "PGDATABASE")]
    pub pg_database: Option<String>,
    #[serde(rename = "PGUSER")]
    pub pg_user: Option<String>,
    #[serde(rename = "PGPASSWORD")]
    pub pg_password: Option<String>,
    #[serde(rename = "PGSSLMODE")]
    pub pg_ssl_mode: Option<String>,
    #[serde(rename = "TABLE_NAME")]
    pub table_name: Option<String>,
    #[serde(rename = "SPREADSHEET_NAME")]
    pub spreadsheet_name: Option<String>,
    #[serde(rename = "SPREADSHEET_ID")]
    pub spreadsheet_id: Option<String>,
    #[serde(rename = "WORKSHEET_NAME")]
    pub worksheet_name: Option<String>,
    #[serde(rename = "SYNC_INTERVAL_MINUTES")]
    pub sync_interval_minutes: Option<String>,
    #[serde(rename = "SYNC_CALL_TIMEOUT_SECONDS")]
    pub call_timeout_seconds: Option<String>,
    #[serde(rename = "SYNC_METADATA_SHEET")]
    pub metadata_sheet: Option<String>,
    #[serde(rename = "GOOGLE_SERVICE_ACCOUNT_FILE")]
    pub service_account_file: Option<PathBuf>,
    #[serde(rename = "CLIENT_ID")]
    pub client_id: Option<String>,
    #[serde(rename = "CLIENT_SECRET")]
    pub client_secret: Option<String>,
    #[serde(rename = "PROJECT_ID")]
    pub project_id: Option<String>,
    #[serde(rename = "AUTH_URI")]
    pub auth_uri: Option<String>,
    #[serde(rename = "TOKEN_URI")]
    pub token_uri: Option<String>,
    #[serde(rename = "AUTH_PROVIDER_X509_CERT_URL")]
    pub auth_provider_cert_url: Option<String>,
    #[serde(rename = "REDIRECT_URI")]
    pub redirect_uri: Option<String>,
    #[serde(rename = "GOOGLE_TOKEN_CACHE")]
    pub token_cache: Option<PathBuf>,
}

impl RawEnvConfig {
    /// Collects the process environment. Variables that are not valid UTF-8 are skipped.
    pub fn from_env() -> Result<Self> {
        let vars: Map<String, Value> = env::vars_os()
            .filter_map(|(key, value)| {
                Some((key.into_string().ok()?, Value::String(value.into_string().ok()?)))
            })
            .collect();
        Self::from_json(Value::Object(vars))
    }

    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("Failed to read configuration from environment")
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub connect_options: PgConnectOptions,
    /// Connection target with the password removed, safe to log.
    pub display_target: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("target", &self.display_target)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetTarget {
    pub spreadsheet_name: String,
    pub spreadsheet_id: Option<String>,
    pub worksheet_name: String,
    /// Title of the metadata worksheet, when that worksheet is enabled.
    pub metadata_worksheet: Option<String>,
}

/// Immutable settings for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseConfig,
    pub table_name: String,
    pub sheet: SheetTarget,
    pub interval: Duration,
    pub call_timeout: Option<Duration>,
}

#[derive(Clone)]
pub enum CredentialsConfig {
    ServiceAccount {
        key_path: PathBuf,
    },
    InstalledApp {
        client_id: String,
        client_secret: String,
        project_id: String,
        auth_uri: String,
        token_uri: String,
        cert_url: String,
        redirect_uri: String,
        token_cache: PathBuf,
    },
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialsConfig::ServiceAccount { key_path } => f
                .debug_struct("ServiceAccount")
                .field("key_path", key_path)
                .finish(),
            CredentialsConfig::InstalledApp {
                client_id,
                project_id,
                token_cache,
                ..
            } => f
                .debug_struct("InstalledApp")
                .field("client_id", client_id)
                .field("project_id", project_id)
                .field("token_cache", token_cache)
                .finish_non_exhaustive(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    non_empty(value).with_context(|| format!("{} must be set in the environment or .env file", name))
}

impl SyncConfig {
    pub fn from_raw(raw: &RawEnvConfig) -> Result<Self> {
        let database = load_database_config(raw)?;

        // Used verbatim: table names are case-sensitive.
        let table_name = raw
            .table_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .context("TABLE_NAME must be set in the environment or .env file")?
            .to_string();

        let spreadsheet_name = non_empty(&raw.spreadsheet_name)
            .unwrap_or(&table_name)
            .to_string();
        let worksheet_name = non_empty(&raw.worksheet_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_data", table_name));

        let metadata_enabled = match non_empty(&raw.metadata_sheet) {
            Some(flag) => parse_bool(flag).context("SYNC_METADATA_SHEET must be true or false")?,
            None => false,
        };
        if metadata_enabled && worksheet_name == METADATA_WORKSHEET {
            anyhow::bail!(
                "WORKSHEET_NAME cannot be '{}' while the metadata worksheet is enabled",
                METADATA_WORKSHEET
            );
        }

        let interval_minutes = match non_empty(&raw.sync_interval_minutes) {
            Some(v) => v
                .parse::<f64>()
                .with_context(|| format!("SYNC_INTERVAL_MINUTES is not a number: {}", v))?,
            None => DEFAULT_INTERVAL_MINUTES,
        };
        let interval = Duration::try_from_secs_f64(interval_minutes * 60.0)
            .with_context(|| format!("SYNC_INTERVAL_MINUTES is out of range: {}", interval_minutes))?;
        if interval < MIN_INTERVAL {
            anyhow::bail!(
                "SYNC_INTERVAL_MINUTES must be at least {} second(s), got {}",
                MIN_INTERVAL.as_secs(),
                interval_minutes
            );
        }

        let call_timeout = match non_empty(&raw.call_timeout_seconds) {
            Some(v) => {
                let seconds = v
                    .parse::<u64>()
                    .with_context(|| format!("SYNC_CALL_TIMEOUT_SECONDS is not a whole number: {}", v))?;
                if seconds == 0 {
                    anyhow::bail!("SYNC_CALL_TIMEOUT_SECONDS must be greater than zero");
                }
                Some(Duration::from_secs(seconds))
            }
            None => None,
        };

        Ok(SyncConfig {
            database,
            sheet: SheetTarget {
                spreadsheet_name,
                spreadsheet_id: non_empty(&raw.spreadsheet_id).map(str::to_string),
                worksheet_name,
                metadata_worksheet: metadata_enabled.then(|| METADATA_WORKSHEET.to_string()),
            },
            table_name,
            interval,
            call_timeout,
        })
    }

    pub fn interval_minutes(&self) -> f64 {
        self.interval.as_secs_f64() / 60.0
    }
}

/// Builds database connection options. `DATABASE_URL` wins over the `PG*` variables.
pub fn load_database_config(raw: &RawEnvConfig) -> Result<DatabaseConfig> {
    if let Some(url) = non_empty(&raw.database_url) {
        let connect_options = PgConnectOptions::from_str(url)
            .with_context(|| format!("DATABASE_URL is not a valid connection string: {}", redact_url(url)))?;
        return Ok(DatabaseConfig {
            connect_options,
            display_target: redact_url(url),
        });
    }

    let host = required(&raw.pg_host, "PGHOST (or DATABASE_URL)")?;
    let database = required(&raw.pg_database, "PGDATABASE")?;
    let user = required(&raw.pg_user, "PGUSER")?;
    let password = required(&raw.pg_password, "PGPASSWORD")?;
    let port = match non_empty(&raw.pg_port) {
        Some(p) => p
            .parse::<u16>()
            .with_context(|| format!("PGPORT is not a valid port: {}", p))?,
        None => DEFAULT_PG_PORT,
    };
    let ssl_mode_name = non_empty(&raw.pg_ssl_mode).unwrap_or(DEFAULT_SSL_MODE);
    let ssl_mode = PgSslMode::from_str(ssl_mode_name)
        .with_context(|| format!("PGSSLMODE is not a recognised ssl mode: {}", ssl_mode_name))?;

    let connect_options = PgConnectOptions::new()
        .host(host)
        .port(port)
        .database(database)
        .username(user)
        .password(password)
        .ssl_mode(ssl_mode);

    Ok(DatabaseConfig {
        connect_options,
        display_target: format!("postgres://{}@{}:{}/{}", user, host, port, database),
    })
}

/// Credentials are only needed by the spreadsheet side, so they load separately.
pub fn load_credentials_config(raw: &RawEnvConfig) -> Result<CredentialsConfig> {
    if let Some(key_path) = raw
        .service_account_file
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        return Ok(CredentialsConfig::ServiceAccount {
            key_path: key_path.clone(),
        });
    }

    Ok(CredentialsConfig::InstalledApp {
        client_id: required(&raw.client_id, "CLIENT_ID (or GOOGLE_SERVICE_ACCOUNT_FILE)")?.to_string(),
        client_secret: required(&raw.client_secret, "CLIENT_SECRET")?.to_string(),
        project_id: required(&raw.project_id, "PROJECT_ID")?.to_string(),
        auth_uri: non_empty(&raw.auth_uri).unwrap_or(DEFAULT_AUTH_URI).to_string(),
        token_uri: non_empty(&raw.token_uri).unwrap_or(DEFAULT_TOKEN_URI).to_string(),
        cert_url: non_empty(&raw.auth_provider_cert_url)
            .unwrap_or(DEFAULT_CERT_URL)
            .to_string(),
        redirect_uri: non_empty(&raw.redirect_uri)
            .unwrap_or(DEFAULT_REDIRECT_URI)
            .to_string(),
        token_cache: raw
            .token_cache
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_CACHE)),
    })
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {}", other)),
    }
}
