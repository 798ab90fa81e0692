use std::cell::RefCell;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archiver::ExportSink;
use crate::error::ExportError;
use crate::models::{HEADERS, ResultSet};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPES: &str = "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateRequest {
    value_input_option: &'static str,
    data: Vec<ValueRange>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    range: String,
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Google Sheets spreadsheet with one pre-created worksheet per brand.
pub struct GoogleSheetsSink {
    client: Client,
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    spreadsheet_id: String,
    token: RefCell<Option<AccessToken>>,
}

impl GoogleSheetsSink {
    /// Loads a service-account JSON key.
    pub fn from_key_file(credentials: &Path, spreadsheet_id: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(credentials)
            .with_context(|| format!("reading credentials {}", credentials.display()))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).context("credentials are not a service-account key")?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service-account private key is not valid RSA PEM")?;

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            client_email: key.client_email,
            token_uri: key.token_uri,
            signing_key,
            spreadsheet_id: spreadsheet_id.to_string(),
            token: RefCell::new(None),
        })
    }

    /// Header row plus one column-block update for all records.
    pub fn upsert_sheet(&self, brand: &str, results: &ResultSet) -> Result<(), ExportError> {
        let token = self.access_token()?;

        if !self.sheet_titles(&token)?.iter().any(|t| t == brand) {
            return Err(ExportError::SheetNotFound {
                sheet: brand.to_string(),
            });
        }

        let url = format!("{SHEETS_API}/{}/values:batchUpdate", self.spreadsheet_id);
        let resp = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(&batch_update_body(brand, results))
            .send()?;
        check_status(resp, brand)?;

        info!(sheet = brand, rows = results.len(), "spreadsheet updated");
        Ok(())
    }

    fn sheet_titles(&self, token: &str) -> Result<Vec<String>, ExportError> {
        let url = format!("{SHEETS_API}/{}", self.spreadsheet_id);
        let resp = self
            .client
            .get(url)
            .query(&[("fields", "sheets.properties.title")])
            .bearer_auth(token)
            .send()?;
        let meta: SpreadsheetMeta = check_status(resp, "")?.json()?;
        Ok(meta
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }

    fn access_token(&self) -> Result<String, ExportError> {
        let now = Utc::now();
        if let Some(token) = self.token.borrow().as_ref() {
            if token.expires_at > now {
                return Ok(token.value.clone());
            }
        }

        let claims = Claims {
            iss: &self.client_email,
            scope: SCOPES,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| ExportError::Auth(e.to_string()))?;

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_GRANT), ("assertion", assertion.as_str())])
            .send()?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(ExportError::Auth(format!("token endpoint returned {status}: {body}")));
        }
        let granted: TokenResponse = resp.json()?;

        // Refresh a minute before the grant runs out.
        let lifetime = granted.expires_in.unwrap_or(TOKEN_LIFETIME_SECS) - 60;
        debug!(lifetime, "access token granted");
        *self.token.borrow_mut() = Some(AccessToken {
            value: granted.access_token.clone(),
            expires_at: now + TimeDelta::seconds(lifetime.max(0)),
        });
        Ok(granted.access_token)
    }
}

impl ExportSink for GoogleSheetsSink {
    fn name(&self) -> &str {
        "google_sheets"
    }

    fn export(&self, brand: &str, results: &ResultSet) -> Result<(), ExportError> {
        self.upsert_sheet(brand, results)
    }
}

fn check_status(resp: Response, sheet: &str) -> Result<Response, ExportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(api_error(status.as_u16(), message, sheet))
}

/// An unparsable range on update means the worksheet is gone.
fn api_error(status: u16, message: String, sheet: &str) -> ExportError {
    if status == 400 && !sheet.is_empty() && message.contains("Unable to parse range") {
        ExportError::SheetNotFound {
            sheet: sheet.to_string(),
        }
    } else {
        ExportError::Api { status, message }
    }
}

/// A1 notation needs the sheet title quoted, with inner quotes doubled.
fn a1_range(sheet: &str, cells: &str) -> String {
    format!("'{}'!{cells}", sheet.replace('\'', "''"))
}

pub fn batch_update_body(sheet: &str, results: &ResultSet) -> BatchUpdateRequest {
    let header = ValueRange {
        range: a1_range(sheet, "A1:F1"),
        major_dimension: "ROWS",
        values: vec![HEADERS.iter().map(|h| h.to_string()).collect()],
    };
    let columns = ValueRange {
        range: a1_range(sheet, &format!("A2:F{}", results.len() + 1)),
        major_dimension: "COLUMNS",
        values: results.columns().iter().map(|c| c.to_vec()).collect(),
    };

    BatchUpdateRequest {
        value_input_option: "USER_ENTERED",
        data: vec![header, columns],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_record;
    use serde_json::json;

    #[test]
    fn body_has_header_row_and_column_block() {
        let mut set = ResultSet::new();
        set.push(sample_record("VegaGreen", "1"));
        set.push(sample_record("VegaGreen", "2"));
        set.push(sample_record("VegaGreen", "3"));

        let body = serde_json::to_value(batch_update_body("VegaGreen", &set)).unwrap();

        assert_eq!(body["valueInputOption"], "USER_ENTERED");
        assert_eq!(body["data"][0]["range"], "'VegaGreen'!A1:F1");
        assert_eq!(body["data"][0]["majorDimension"], "ROWS");
        assert_eq!(body["data"][0]["values"][0][0], "Бренд");
        assert_eq!(body["data"][1]["range"], "'VegaGreen'!A2:F4");
        assert_eq!(body["data"][1]["majorDimension"], "COLUMNS");
        assert_eq!(body["data"][1]["values"].as_array().unwrap().len(), 6);
        assert_eq!(body["data"][1]["values"][1], json!(["1", "2", "3"]));
    }

    #[test]
    fn sheet_titles_are_quoted() {
        assert_eq!(a1_range("Mom's", "A1:F1"), "'Mom''s'!A1:F1");
        assert_eq!(a1_range("Просто здорово", "A1:F1"), "'Просто здорово'!A1:F1");
    }

    #[test]
    fn unknown_range_maps_to_missing_sheet() {
        let err = api_error(400, "Unable to parse range: 'X'!A1:F1".into(), "X");
        assert!(matches!(err, ExportError::SheetNotFound { ref sheet } if sheet == "X"));

        let err = api_error(403, "The caller does not have permission".into(), "X");
        assert!(matches!(err, ExportError::Api { status: 403, .. }));
    }

    #[test]
    fn bad_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"client_email": "bot@example.iam.gserviceaccount.com", "private_key": "nope"}"#,
        )
        .unwrap();

        assert!(GoogleSheetsSink::from_key_file(&path, "sheet-id").is_err());
        assert!(GoogleSheetsSink::from_key_file(&dir.path().join("absent.json"), "id").is_err());
    }
}
