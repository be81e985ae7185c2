// table2sheet/src/sheets/mod.rs
pub mod auth;
pub mod google;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SheetTarget;
use crate::errors::{Result, SyncError, WriteStage};
use crate::table::TableSnapshot;

pub use google::GoogleSheetsClient;

const MIN_GRID_ROWS: usize = 100;
const MIN_GRID_COLUMNS: usize = 20;
const METADATA_GRID_ROWS: usize = 10;
const METADATA_GRID_COLUMNS: usize = 3;

/// Failure reported by a spreadsheet service call.
#[derive(Error, Debug)]
pub enum SheetsApiError {
    /// The credential was missing, expired or revoked.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Rejected(String),
}

/// Title and grid size used when a worksheet has to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub title: String,
    pub rows: usize,
    pub columns: usize,
}

impl GridSpec {
    fn for_snapshot(title: &str, snapshot: &TableSnapshot) -> Self {
        GridSpec {
            title: title.to_string(),
            rows: (snapshot.row_count() + 11).max(MIN_GRID_ROWS),
            columns: (snapshot.column_count() + 5).max(MIN_GRID_COLUMNS),
        }
    }
}

/// The already-authorized spreadsheet capability the writer depends on.
/// How the credential behind it was obtained is not the writer's concern.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn find_spreadsheet(&self, name: &str) -> std::result::Result<Option<String>, SheetsApiError>;

    /// Creates a spreadsheet whose only worksheet is `first_sheet`, returning its id.
    async fn create_spreadsheet(
        &self,
        name: &str,
        first_sheet: &GridSpec,
    ) -> std::result::Result<String, SheetsApiError>;

    async fn worksheet_titles(&self, spreadsheet_id: &str) -> std::result::Result<Vec<String>, SheetsApiError>;

    async fn add_worksheet(&self, spreadsheet_id: &str, sheet: &GridSpec) -> std::result::Result<(), SheetsApiError>;

    async fn clear_worksheet(&self, spreadsheet_id: &str, title: &str) -> std::result::Result<(), SheetsApiError>;

    /// Writes `values` starting at the top-left cell of the worksheet.
    async fn write_values(
        &self,
        spreadsheet_id: &str,
        title: &str,
        values: Vec<Vec<Value>>,
    ) -> std::result::Result<(), SheetsApiError>;

    fn spreadsheet_url(&self, spreadsheet_id: &str) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}", spreadsheet_id)
    }
}

/// Outcome of a successful snapshot write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
    pub worksheet: String,
    pub rows_written: usize,
    pub columns_written: usize,
}

/// Destination side of a pass.
#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    /// Makes the data worksheet exactly reflect `snapshot`.
    async fn write_snapshot(&self, snapshot: &TableSnapshot) -> Result<WriteReport>;

    /// Rewrites the metadata worksheet as an `Attribute/Value` table.
    /// Does nothing when the metadata worksheet is disabled.
    async fn write_metadata(&self, entries: &[(String, String)]) -> Result<()>;
}

fn api_error(stage: WriteStage) -> impl Fn(SheetsApiError) -> SyncError {
    move |err| match err {
        SheetsApiError::Unauthorized(message) => SyncError::Auth(message),
        SheetsApiError::Rejected(message) => SyncError::write(stage, message),
    }
}

/// Full-overwrite writer: locate (or create) the spreadsheet and worksheet,
/// clear it, then write header and rows. Clear and write are separate remote
/// calls; see [`WriteStage`] for what a failure between them leaves behind.
pub struct SpreadsheetWriter<C> {
    api: C,
    target: SheetTarget,
}

impl<C: SheetsApi> SpreadsheetWriter<C> {
    pub fn new(api: C, target: SheetTarget) -> Self {
        SpreadsheetWriter { api, target }
    }

    /// Returns the spreadsheet id, creating the spreadsheet with `first_sheet`
    /// when no spreadsheet carries the configured name.
    async fn locate_spreadsheet(&self, first_sheet: &GridSpec) -> Result<String> {
        if let Some(id) = &self.target.spreadsheet_id {
            return Ok(id.clone());
        }

        let name = &self.target.spreadsheet_name;
        match self
            .api
            .find_spreadsheet(name)
            .await
            .map_err(api_error(WriteStage::Locate))?
        {
            Some(id) => {
                debug!("Using existing spreadsheet '{}' ({})", name, id);
                Ok(id)
            }
            None => {
                let id = self
                    .api
                    .create_spreadsheet(name, first_sheet)
                    .await
                    .map_err(api_error(WriteStage::Locate))?;
                info!("Created new spreadsheet '{}' ({})", name, id);
                Ok(id)
            }
        }
    }

    async fn ensure_worksheet(&self, spreadsheet_id: &str, sheet: &GridSpec, stage: WriteStage) -> Result<()> {
        let titles = self
            .api
            .worksheet_titles(spreadsheet_id)
            .await
            .map_err(api_error(stage))?;
        if titles.iter().any(|t| t == &sheet.title) {
            return Ok(());
        }
        self.api
            .add_worksheet(spreadsheet_id, sheet)
            .await
            .map_err(api_error(stage))?;
        info!("Created new worksheet '{}'", sheet.title);
        Ok(())
    }

    /// Clear-then-write of one worksheet.
    async fn overwrite(&self, spreadsheet_id: &str, title: &str, values: Vec<Vec<Value>>) -> Result<()> {
        self.api
            .clear_worksheet(spreadsheet_id, title)
            .await
            .map_err(api_error(WriteStage::Clear))?;
        self.api
            .write_values(spreadsheet_id, title, values)
            .await
            .map_err(api_error(WriteStage::Write))
    }
}

#[async_trait]
impl<C: SheetsApi> SnapshotWriter for SpreadsheetWriter<C> {
    async fn write_snapshot(&self, snapshot: &TableSnapshot) -> Result<WriteReport> {
        let worksheet = &self.target.worksheet_name;
        let grid = GridSpec::for_snapshot(worksheet, snapshot);

        let spreadsheet_id = self.locate_spreadsheet(&grid).await?;
        self.ensure_worksheet(&spreadsheet_id, &grid, WriteStage::Locate).await?;
        self.overwrite(&spreadsheet_id, worksheet, snapshot.to_cells()).await?;

        Ok(WriteReport {
            spreadsheet_url: self.api.spreadsheet_url(&spreadsheet_id),
            spreadsheet_id,
            worksheet: worksheet.clone(),
            rows_written: snapshot.row_count(),
            columns_written: snapshot.column_count(),
        })
    }

    async fn write_metadata(&self, entries: &[(String, String)]) -> Result<()> {
        let Some(title) = &self.target.metadata_worksheet else {
            return Ok(());
        };
        let grid = GridSpec {
            title: title.clone(),
            rows: METADATA_GRID_ROWS.max(entries.len() + 1),
            columns: METADATA_GRID_COLUMNS,
        };

        let spreadsheet_id = match &self.target.spreadsheet_id {
            Some(id) => id.clone(),
            None => self
                .api
                .find_spreadsheet(&self.target.spreadsheet_name)
                .await
                .map_err(api_error(WriteStage::Metadata))?
                .ok_or_else(|| {
                    SyncError::write(
                        WriteStage::Metadata,
                        format!("spreadsheet '{}' not found", self.target.spreadsheet_name),
                    )
                })?,
        };
        self.ensure_worksheet(&spreadsheet_id, &grid, WriteStage::Metadata).await?;

        let mut values = vec![vec![Value::from("Attribute"), Value::from("Value")]];
        values.extend(
            entries
                .iter()
                .map(|(k, v)| vec![Value::from(k.as_str()), Value::from(v.as_str())]),
        );

        // Clear/Write stage mapping is relabelled: a metadata failure never touches data.
        self.overwrite(&spreadsheet_id, title, values)
            .await
            .map_err(|err| match err {
                SyncError::Write { message, .. } => SyncError::write(WriteStage::Metadata, message),
                other => other,
            })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory spreadsheet service for writer and engine tests.
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    pub struct FakeSpreadsheet {
        pub name: String,
        pub worksheets: BTreeMap<String, Vec<Vec<Value>>>,
    }

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub spreadsheets: BTreeMap<String, FakeSpreadsheet>,
        pub next_id: usize,
        pub calls: Vec<String>,
        pub unauthorized: bool,
        pub fail_clear: bool,
        pub fail_write: bool,
        /// Lookups and writes never answer.
        pub stalled: bool,
    }

    #[derive(Debug, Default)]
    pub struct FakeSheets {
        pub state: Mutex<FakeState>,
    }

    impl FakeSheets {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(f: impl FnOnce(&mut FakeState)) -> Self {
            let fake = Self::new();
            f(&mut fake.state.lock().unwrap());
            fake
        }

        pub fn worksheet(&self, name: &str, title: &str) -> Option<Vec<Vec<Value>>> {
            let state = self.state.lock().unwrap();
            state
                .spreadsheets
                .values()
                .find(|s| s.name == name)
                .and_then(|s| s.worksheets.get(title).cloned())
        }

        pub fn spreadsheet_count(&self) -> usize {
            self.state.lock().unwrap().spreadsheets.len()
        }

        pub fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        async fn stall_if_requested(&self) {
            let stalled = self.state.lock().unwrap().stalled;
            if stalled {
                std::future::pending::<()>().await;
            }
        }

        fn guard(&self, call: &str) -> std::result::Result<std::sync::MutexGuard<'_, FakeState>, SheetsApiError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call.to_string());
            if state.unauthorized {
                return Err(SheetsApiError::Unauthorized("invalid_grant: token expired".into()));
            }
            Ok(state)
        }
    }

    fn sheet_mut<'a>(
        state: &'a mut FakeState,
        id: &str,
        title: &str,
    ) -> std::result::Result<&'a mut Vec<Vec<Value>>, SheetsApiError> {
        state
            .spreadsheets
            .get_mut(id)
            .and_then(|s| s.worksheets.get_mut(title))
            .ok_or_else(|| SheetsApiError::Rejected(format!("Unable to parse range: {}", title)))
    }

    #[async_trait]
    impl SheetsApi for FakeSheets {
        async fn find_spreadsheet(&self, name: &str) -> std::result::Result<Option<String>, SheetsApiError> {
            self.stall_if_requested().await;
            let state = self.guard("find")?;
            Ok(state
                .spreadsheets
                .iter()
                .find(|(_, s)| s.name == name)
                .map(|(id, _)| id.clone()))
        }

        async fn create_spreadsheet(
            &self,
            name: &str,
            first_sheet: &GridSpec,
        ) -> std::result::Result<String, SheetsApiError> {
            let mut state = self.guard("create")?;
            state.next_id += 1;
            let id = format!("sheet-{}", state.next_id);
            let mut worksheets = BTreeMap::new();
            worksheets.insert(first_sheet.title.clone(), Vec::new());
            state.spreadsheets.insert(
                id.clone(),
                FakeSpreadsheet {
                    name: name.to_string(),
                    worksheets,
                },
            );
            Ok(id)
        }

        async fn worksheet_titles(&self, spreadsheet_id: &str) -> std::result::Result<Vec<String>, SheetsApiError> {
            let state = self.guard("titles")?;
            state
                .spreadsheets
                .get(spreadsheet_id)
                .map(|s| s.worksheets.keys().cloned().collect())
                .ok_or_else(|| SheetsApiError::Rejected("Requested entity was not found.".into()))
        }

        async fn add_worksheet(&self, spreadsheet_id: &str, sheet: &GridSpec) -> std::result::Result<(), SheetsApiError> {
            let mut state = self.guard("add")?;
            let spreadsheet = state
                .spreadsheets
                .get_mut(spreadsheet_id)
                .ok_or_else(|| SheetsApiError::Rejected("Requested entity was not found.".into()))?;
            spreadsheet.worksheets.insert(sheet.title.clone(), Vec::new());
            Ok(())
        }

        async fn clear_worksheet(&self, spreadsheet_id: &str, title: &str) -> std::result::Result<(), SheetsApiError> {
            let mut state = self.guard("clear")?;
            if state.fail_clear {
                return Err(SheetsApiError::Rejected("backend error".into()));
            }
            sheet_mut(&mut state, spreadsheet_id, title)?.clear();
            Ok(())
        }

        async fn write_values(
            &self,
            spreadsheet_id: &str,
            title: &str,
            values: Vec<Vec<Value>>,
        ) -> std::result::Result<(), SheetsApiError> {
            self.stall_if_requested().await;
            let mut state = self.guard("write")?;
            if state.fail_write {
                return Err(SheetsApiError::Rejected("Quota exceeded".into()));
            }
            *sheet_mut(&mut state, spreadsheet_id, title)? = values;
            Ok(())
        }
    }

    #[async_trait]
    impl<T: SheetsApi> SheetsApi for std::sync::Arc<T> {
        async fn find_spreadsheet(&self, name: &str) -> std::result::Result<Option<String>, SheetsApiError> {
            (**self).find_spreadsheet(name).await
        }

        async fn create_spreadsheet(
            &self,
            name: &str,
            first_sheet: &GridSpec,
        ) -> std::result::Result<String, SheetsApiError> {
            (**self).create_spreadsheet(name, first_sheet).await
        }

        async fn worksheet_titles(&self, spreadsheet_id: &str) -> std::result::Result<Vec<String>, SheetsApiError> {
            (**self).worksheet_titles(spreadsheet_id).await
        }

        async fn add_worksheet(&self, spreadsheet_id: &str, sheet: &GridSpec) -> std::result::Result<(), SheetsApiError> {
            (**self).add_worksheet(spreadsheet_id, sheet).await
        }

        async fn clear_worksheet(&self, spreadsheet_id: &str, title: &str) -> std::result::Result<(), SheetsApiError> {
            (**self).clear_worksheet(spreadsheet_id, title).await
        }

        async fn write_values(
            &self,
            spreadsheet_id: &str,
            title: &str,
            values: Vec<Vec<Value>>,
        ) -> std::result::Result<(), SheetsApiError> {
            (**self).write_values(spreadsheet_id, title, values).await
        }
    }
}
