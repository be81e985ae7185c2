// table2sheet/src/sheets/google.rs
use anyhow::Result;
use async_trait::async_trait;
use google_drive3::DriveHub;
use google_sheets4::api::{
    AddSheetRequest, BatchUpdateSpreadsheetRequest, ClearValuesRequest, GridProperties, Request,
    Sheet, SheetProperties, Spreadsheet, SpreadsheetProperties, ValueRange,
};
use google_sheets4::hyper::client::HttpConnector;
use google_sheets4::hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use google_sheets4::{hyper, Sheets};
use serde_json::Value;

use crate::config::CredentialsConfig;
use crate::sheets::auth::build_authenticator;
use crate::sheets::{GridSpec, SheetsApi, SheetsApiError};

// One scope for every call so the installed-app flow asks for consent once.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

type Connector = HttpsConnector<HttpConnector>;

/// Google Sheets (values and worksheets) plus Google Drive (lookup by name).
pub struct GoogleSheetsClient {
    sheets: Sheets<Connector>,
    drive: DriveHub<Connector>,
}

// The two hubs come from separately generated crates; the same mapping applies to both.
macro_rules! map_api_error {
    ($err:expr, $api:ident) => {{
        match $err {
            $api::Error::MissingToken(e) => token_error(e.as_ref()),
            $api::Error::Failure(response) => {
                let status = response.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    SheetsApiError::Unauthorized(format!("HTTP {}", status))
                } else {
                    SheetsApiError::Rejected(format!("HTTP {}", status))
                }
            }
            $api::Error::BadRequest(body) => classify_error_body(&body),
            other => SheetsApiError::Rejected(other.to_string()),
        }
    }};
}

fn sheets_error(err: google_sheets4::Error) -> SheetsApiError {
    map_api_error!(err, google_sheets4)
}

fn drive_error(err: google_drive3::Error) -> SheetsApiError {
    map_api_error!(err, google_drive3)
}

/// A token fetch can fail because the token endpoint refused the credential,
/// or because it could not be reached at all. Only the first is an auth failure.
fn token_error(err: &(dyn std::error::Error + Send + Sync + 'static)) -> SheetsApiError {
    match err.downcast_ref::<yup_oauth2::Error>() {
        Some(yup_oauth2::Error::AuthError(auth)) => SheetsApiError::Unauthorized(auth.to_string()),
        Some(other) => SheetsApiError::Rejected(format!("token request failed: {}", other)),
        None => SheetsApiError::Rejected(format!("token request failed: {}", err)),
    }
}

/// Reads the `{"error": {"code", "status", "message"}}` envelope of a rejected call.
fn classify_error_body(body: &Value) -> SheetsApiError {
    let error = &body["error"];
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    let code = error["code"].as_u64();
    let status = error["status"].as_str();

    if code == Some(401) || status == Some("UNAUTHENTICATED") || status == Some("PERMISSION_DENIED") {
        SheetsApiError::Unauthorized(message)
    } else {
        SheetsApiError::Rejected(message)
    }
}

/// A1 range covering a whole worksheet.
fn sheet_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Drive query literal: backslashes and single quotes are escaped.
fn drive_name_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escaped, SPREADSHEET_MIME
    )
}

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn sheet_properties(spec: &GridSpec) -> SheetProperties {
    SheetProperties {
        title: Some(spec.title.clone()),
        grid_properties: Some(GridProperties {
            row_count: Some(to_i32(spec.rows)),
            column_count: Some(to_i32(spec.columns)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl GoogleSheetsClient {
    /// Authenticates and builds both API hubs over one HTTPS client.
    pub async fn connect(credentials: &CredentialsConfig) -> Result<Self> {
        let auth = build_authenticator(credentials).await?;
        let connector = HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();
        let client = hyper::Client::builder().build(connector);

        Ok(GoogleSheetsClient {
            sheets: Sheets::new(client.clone(), auth.clone()),
            drive: DriveHub::new(client, auth),
        })
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn find_spreadsheet(&self, name: &str) -> std::result::Result<Option<String>, SheetsApiError> {
        let (_, list) = self
            .drive
            .files()
            .list()
            .q(&drive_name_query(name))
            .page_size(1)
            .supports_all_drives(true)
            .include_items_from_all_drives(true)
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(drive_error)?;

        Ok(list
            .files
            .unwrap_or_default()
            .into_iter()
            .find_map(|file| file.id))
    }

    async fn create_spreadsheet(
        &self,
        name: &str,
        first_sheet: &GridSpec,
    ) -> std::result::Result<String, SheetsApiError> {
        let request = Spreadsheet {
            properties: Some(SpreadsheetProperties {
                title: Some(name.to_string()),
                ..Default::default()
            }),
            sheets: Some(vec![Sheet {
                properties: Some(sheet_properties(first_sheet)),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let (_, created) = self
            .sheets
            .spreadsheets()
            .create(request)
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(sheets_error)?;

        created
            .spreadsheet_id
            .ok_or_else(|| SheetsApiError::Rejected("create response carried no spreadsheet id".into()))
    }

    async fn worksheet_titles(&self, spreadsheet_id: &str) -> std::result::Result<Vec<String>, SheetsApiError> {
        let (_, spreadsheet) = self
            .sheets
            .spreadsheets()
            .get(spreadsheet_id)
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(sheets_error)?;

        Ok(spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sheet| sheet.properties.and_then(|p| p.title))
            .collect())
    }

    async fn add_worksheet(&self, spreadsheet_id: &str, sheet: &GridSpec) -> std::result::Result<(), SheetsApiError> {
        let request = BatchUpdateSpreadsheetRequest {
            requests: Some(vec![Request {
                add_sheet: Some(AddSheetRequest {
                    properties: Some(sheet_properties(sheet)),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        self.sheets
            .spreadsheets()
            .batch_update(request, spreadsheet_id)
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(sheets_error)?;
        Ok(())
    }

    async fn clear_worksheet(&self, spreadsheet_id: &str, title: &str) -> std::result::Result<(), SheetsApiError> {
        self.sheets
            .spreadsheets()
            .values_clear(ClearValuesRequest::default(), spreadsheet_id, &sheet_range(title))
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(sheets_error)?;
        Ok(())
    }

    async fn write_values(
        &self,
        spreadsheet_id: &str,
        title: &str,
        values: Vec<Vec<Value>>,
    ) -> std::result::Result<(), SheetsApiError> {
        let range = format!("{}!A1", sheet_range(title));
        let body = ValueRange {
            range: Some(range.clone()),
            major_dimension: Some("ROWS".to_string()),
            values: Some(values),
            ..Default::default()
        };

        // RAW keeps text that looks like a formula or number as text.
        self.sheets
            .spreadsheets()
            .values_update(body, spreadsheet_id, &range)
            .value_input_option("RAW")
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(sheets_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sheet_range_quotes_title() {
        assert_eq!(sheet_range("orders_data"), "'orders_data'");
        assert_eq!(sheet_range("Bob's sheet"), "'Bob''s sheet'");
    }

    #[test]
    fn test_drive_query_escapes_name() {
        assert_eq!(
            drive_name_query("Q1 'final'"),
            "name = 'Q1 \\'final\\'' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false"
        );
    }

    #[test]
    fn test_error_body_unauthenticated() {
        let body = json!({
            "error": {
                "code": 401,
                "message": "Request had invalid authentication credentials.",
                "status": "UNAUTHENTICATED"
            }
        });
        match classify_error_body(&body) {
            SheetsApiError::Unauthorized(message) => {
                assert_eq!(message, "Request had invalid authentication credentials.")
            }
            other => panic!("expected unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn test_error_body_rejected() {
        let body = json!({
            "error": {
                "code": 400,
                "message": "Unable to parse range: 'missing'!A1",
                "status": "INVALID_ARGUMENT"
            }
        });
        assert!(matches!(classify_error_body(&body), SheetsApiError::Rejected(_)));
    }

    #[test]
    fn test_rejected_credential_is_unauthorized() {
        let err: Box<dyn std::error::Error + Send + Sync> =
            Box::new(yup_oauth2::Error::AuthError(yup_oauth2::error::AuthError {
                error: yup_oauth2::error::AuthErrorCode::InvalidGrant,
                error_description: Some("Token has been expired or revoked.".into()),
                error_uri: None,
            }));
        assert!(matches!(token_error(err.as_ref()), SheetsApiError::Unauthorized(_)));
    }

    #[test]
    fn test_unreachable_token_endpoint_is_not_unauthorized() {
        let err: Box<dyn std::error::Error + Send + Sync> = Box::new(yup_oauth2::Error::LowLevelError(
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
        ));
        match token_error(err.as_ref()) {
            SheetsApiError::Rejected(message) => assert!(message.contains("connection refused")),
            other => panic!("expected rejected, got {:?}", other),
        }

        let opaque: Box<dyn std::error::Error + Send + Sync> = "dns error: failed to lookup address".into();
        assert!(matches!(token_error(opaque.as_ref()), SheetsApiError::Rejected(_)));
    }

    #[test]
    fn test_grid_sizes_saturate() {
        assert_eq!(to_i32(12), 12);
        assert_eq!(to_i32(usize::MAX), i32::MAX);
    }
}
