use std::cell::RefCell;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credential::{ServiceAccountKey, build_assertion};
use crate::error::{LedgerError, LedgerResult};
use crate::http_client::http_client;
use crate::ledger::{LedgerService, LedgerSnapshot, cell_text, snapshot_from_grid};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: i64,
}

/// An authenticated session against the Sheets API. Owned by the caller and
/// passed explicitly to every ledger operation.
pub struct Connection {
    client: Client,
    key: ServiceAccountKey,
    token: RefCell<AccessToken>,
    api_base: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_email", &self.key.client_email)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Exchanges the service credential for an access token. A malformed or
/// rejected credential is reported as `LedgerError::Auth`.
pub fn connect(key: &ServiceAccountKey) -> LedgerResult<Connection> {
    connect_with_base(key, SHEETS_API_BASE)
}

pub fn connect_with_base(key: &ServiceAccountKey, api_base: &str) -> LedgerResult<Connection> {
    let client = http_client()?;
    let token = fetch_token(&client, key)?;
    info!(client_email = %key.client_email, "connected to sheets api");
    Ok(Connection {
        client,
        key: key.clone(),
        token: RefCell::new(token),
        api_base: api_base.trim_end_matches('/').to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn fetch_token(client: &Client, key: &ServiceAccountKey) -> LedgerResult<AccessToken> {
    let now = Utc::now().timestamp();
    let assertion = build_assertion(key, now)?;
    let resp = client
        .post(key.token_uri())
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .map_err(|err| LedgerError::auth(format!("token request failed: {err}")))?;
    let status = resp.status();
    let body = resp
        .text()
        .map_err(|err| LedgerError::auth(format!("failed reading token response: {err}")))?;
    if !status.is_success() {
        warn!(%status, "token exchange rejected");
        return Err(LedgerError::auth(format!(
            "token endpoint returned {status}: {}",
            error_message(&body)
        )));
    }
    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|err| LedgerError::auth(format!("invalid token response: {err}")))?;
    Ok(AccessToken {
        value: parsed.access_token,
        expires_at: now + parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
    })
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    properties: SpreadsheetProperties,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
    #[serde(default)]
    index: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default)]
    pub range: String,
    #[serde(default)]
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// Which status codes count as "ledger not reachable" for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Open,
    Cell,
}

impl Connection {
    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn bearer(&self) -> LedgerResult<String> {
        let now = Utc::now().timestamp();
        {
            let token = self.token.borrow();
            if token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }
        debug!("refreshing access token");
        let fresh = fetch_token(&self.client, &self.key)?;
        let value = fresh.value.clone();
        *self.token.borrow_mut() = fresh;
        Ok(value)
    }

    fn spreadsheet_url(&self, ledger_id: &str, tail: &[&str]) -> LedgerResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| LedgerError::api(format!("invalid api base: {err}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| LedgerError::api("api base cannot carry a path"))?;
            segments.push("spreadsheets").push(ledger_id);
            for seg in tail {
                segments.push(seg);
            }
        }
        Ok(url)
    }

    fn send(&self, req: RequestBuilder, ledger_id: &str, access: Access) -> LedgerResult<String> {
        let token = self.bearer()?;
        let resp = req.bearer_auth(token).send()?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|err| LedgerError::api(format!("failed reading body: {err}")))?;
        check_status(status, &body, ledger_id, access == Access::Open)?;
        Ok(body)
    }

    fn first_sheet(&self, ledger_id: &str) -> LedgerResult<(String, String)> {
        let url = self.spreadsheet_url(ledger_id, &[])?;
        let req = self
            .client
            .get(url)
            .query(&[("fields", "properties.title,sheets.properties(title,index)")]);
        let body = self.send(req, ledger_id, Access::Open)?;
        let meta: SpreadsheetMeta = serde_json::from_str(&body)
            .map_err(|err| LedgerError::api(format!("invalid spreadsheet metadata: {err}")))?;
        let sheet = meta
            .sheets
            .into_iter()
            .min_by_key(|s| s.properties.index)
            .ok_or_else(|| LedgerError::api("spreadsheet has no sheets"))?;
        Ok((meta.properties.title, sheet.properties.title))
    }

    fn get_values(&self, ledger_id: &str, range: &str, access: Access) -> LedgerResult<ValueRange> {
        let url = self.spreadsheet_url(ledger_id, &["values", range])?;
        let req = self.client.get(url).query(&[
            ("valueRenderOption", "UNFORMATTED_VALUE"),
            ("majorDimension", "ROWS"),
        ]);
        let body = self.send(req, ledger_id, access)?;
        serde_json::from_str(&body)
            .map_err(|err| LedgerError::api(format!("invalid values response: {err}")))
    }
}

impl LedgerService for Connection {
    fn read_all(&self, ledger_id: &str) -> LedgerResult<LedgerSnapshot> {
        let ledger_id = ledger_id.trim();
        let (title, sheet_title) = self.first_sheet(ledger_id)?;
        let values = self.get_values(ledger_id, &quote_sheet(&sheet_title), Access::Open)?;
        let snapshot = snapshot_from_grid(ledger_id, &title, &sheet_title, &values.values)?;
        debug!(
            ledger_id,
            sheet = %sheet_title,
            rows = snapshot.len(),
            "read ledger snapshot"
        );
        Ok(snapshot)
    }

    fn read_cell(&self, ledger_id: &str, row: u32, column: u32) -> LedgerResult<String> {
        let ledger_id = ledger_id.trim();
        let (_, sheet_title) = self.first_sheet(ledger_id)?;
        let range = a1_cell(&sheet_title, row, column)?;
        let values = self.get_values(ledger_id, &range, Access::Cell)?;
        Ok(values
            .values
            .first()
            .and_then(|r| r.first())
            .map(cell_text)
            .unwrap_or_default())
    }

    fn write_cell(&self, ledger_id: &str, row: u32, column: u32, value: i64) -> LedgerResult<()> {
        let ledger_id = ledger_id.trim();
        let (_, sheet_title) = self.first_sheet(ledger_id)?;
        let range = a1_cell(&sheet_title, row, column)?;
        let url = self.spreadsheet_url(ledger_id, &["values", &range])?;
        let body = ValueRange {
            range: range.clone(),
            major_dimension: Some("ROWS".to_string()),
            values: vec![vec![Value::from(value)]],
        };
        let req = self
            .client
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .json(&body);
        self.send(req, ledger_id, Access::Cell)?;
        info!(ledger_id, %range, value, "wrote cell");
        Ok(())
    }
}

/// Maps a non-success response onto the ledger error taxonomy. 403/404 on an
/// open call mean the ledger is missing or not shared with the credential.
pub fn check_status(
    status: StatusCode,
    body: &str,
    ledger_id: &str,
    opening: bool,
) -> LedgerResult<()> {
    if status.is_success() {
        return Ok(());
    }
    let message = error_message(body);
    warn!(%status, ledger_id, %message, "sheets api call failed");
    match status {
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN if opening => Err(LedgerError::NotFound {
            ledger_id: ledger_id.to_string(),
        }),
        StatusCode::UNAUTHORIZED => Err(LedgerError::auth(format!("http {status}: {message}"))),
        _ => Err(LedgerError::api(format!("http {status}: {message}"))),
    }
}

/// Pulls `error.message` out of a Google API error body, falling back to the
/// raw text.
pub fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let err = v.get("error")?;
        err.get("message")
            .and_then(Value::as_str)
            .or_else(|| err.as_str())
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.trim().to_string())
}

pub fn column_letters(column: u32) -> String {
    let mut n = column;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

pub fn quote_sheet(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

pub fn a1_cell(sheet_title: &str, row: u32, column: u32) -> LedgerResult<String> {
    if row == 0 || column == 0 {
        return Err(LedgerError::api(format!(
            "cell address must be 1-indexed, got row {row} column {column}"
        )));
    }
    Ok(format!(
        "{}!{}{}",
        quote_sheet(sheet_title),
        column_letters(column),
        row
    ))
}
