//! Connectivity checks for the operator. Each check either passes, warns, or
//! is fatal; the run stops at the first fatal check.

use serde_json::Value;

use crate::credential::{ServiceAccountKey, missing_fields};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckId {
    CredentialFile,
    CredentialFields,
    Authenticate,
    LedgerId,
    OpenLedger,
}

impl CheckId {
    pub const ALL: [CheckId; 5] = [
        CheckId::CredentialFile,
        CheckId::CredentialFields,
        CheckId::Authenticate,
        CheckId::LedgerId,
        CheckId::OpenLedger,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CheckId::CredentialFile => "credential file",
            CheckId::CredentialFields => "credential fields",
            CheckId::Authenticate => "authenticate",
            CheckId::LedgerId => "ledger id",
            CheckId::OpenLedger => "open ledger",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub id: CheckId,
    pub status: CheckStatus,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub results: Vec<CheckResult>,
}

impl DiagnosticReport {
    pub fn passed(&self) -> bool {
        self.results.len() == CheckId::ALL.len()
            && self.results.iter().all(|r| r.status != CheckStatus::Fatal)
    }

    pub fn fatal(&self) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.status == CheckStatus::Fatal)
    }
}

/// Everything the checks touch outside the process.
pub trait DiagnosticEnv {
    /// Human-readable location of the credential artifact.
    fn credential_location(&self) -> String;

    /// Raw credential text, or `None` when the artifact does not exist.
    fn read_credential(&self) -> std::io::Result<Option<String>>;

    fn connect(&self, key: &ServiceAccountKey) -> LedgerResult<Box<dyn LedgerService>>;

    fn ledger_id(&mut self) -> Option<String>;
}

struct RunState {
    raw_credential: Option<String>,
    key: Option<ServiceAccountKey>,
    ledger: Option<Box<dyn LedgerService>>,
    ledger_id: Option<String>,
}

pub fn run_diagnostic<E: DiagnosticEnv>(
    env: &mut E,
    mut on_result: impl FnMut(&CheckResult),
) -> DiagnosticReport {
    let mut state = RunState {
        raw_credential: None,
        key: None,
        ledger: None,
        ledger_id: None,
    };
    let mut results = Vec::new();
    for id in CheckId::ALL {
        let (status, lines) = run_check(id, env, &mut state);
        let result = CheckResult { id, status, lines };
        on_result(&result);
        let fatal = result.status == CheckStatus::Fatal;
        results.push(result);
        if fatal {
            break;
        }
    }
    DiagnosticReport { results }
}

fn run_check<E: DiagnosticEnv>(
    id: CheckId,
    env: &mut E,
    state: &mut RunState,
) -> (CheckStatus, Vec<String>) {
    match id {
        CheckId::CredentialFile => check_credential_file(env, state),
        CheckId::CredentialFields => check_credential_fields(state),
        CheckId::Authenticate => check_authenticate(env, state),
        CheckId::LedgerId => check_ledger_id(env, state),
        CheckId::OpenLedger => check_open_ledger(state),
    }
}

fn check_credential_file<E: DiagnosticEnv>(
    env: &E,
    state: &mut RunState,
) -> (CheckStatus, Vec<String>) {
    let location = env.credential_location();
    match env.read_credential() {
        Ok(Some(raw)) => {
            state.raw_credential = Some(raw);
            (CheckStatus::Pass, vec![format!("{location} found")])
        }
        Ok(None) => (
            CheckStatus::Fatal,
            vec![
                format!("{location} not found"),
                "Download the service account key from the cloud console and place it there"
                    .to_string(),
            ],
        ),
        Err(err) => (
            CheckStatus::Fatal,
            vec![format!("{location} could not be read: {err}")],
        ),
    }
}

fn check_credential_fields(state: &mut RunState) -> (CheckStatus, Vec<String>) {
    let Some(raw) = state.raw_credential.as_deref() else {
        return (CheckStatus::Fatal, vec!["No credential loaded".to_string()]);
    };
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(err) => {
            return (
                CheckStatus::Fatal,
                vec![format!("Invalid JSON format: {err}")],
            );
        }
    };
    let missing = missing_fields(&value);
    if !missing.is_empty() {
        return (
            CheckStatus::Fatal,
            vec![format!("Missing fields: {}", missing.join(", "))],
        );
    }
    match serde_json::from_value::<ServiceAccountKey>(value) {
        Ok(key) => {
            let lines = vec![
                "JSON structure is valid".to_string(),
                format!("Service account email: {}", key.client_email),
                format!("Project ID: {}", key.project_id),
            ];
            state.key = Some(key);
            (CheckStatus::Pass, lines)
        }
        Err(err) => (
            CheckStatus::Fatal,
            vec![format!("Malformed credential fields: {err}")],
        ),
    }
}

fn check_authenticate<E: DiagnosticEnv>(
    env: &E,
    state: &mut RunState,
) -> (CheckStatus, Vec<String>) {
    let Some(key) = state.key.as_ref() else {
        return (CheckStatus::Fatal, vec!["No credential parsed".to_string()]);
    };
    match env.connect(key) {
        Ok(ledger) => {
            state.ledger = Some(ledger);
            (
                CheckStatus::Pass,
                vec!["Authentication successful".to_string()],
            )
        }
        Err(err) => (
            CheckStatus::Fatal,
            vec![format!("Authentication failed: {err}")],
        ),
    }
}

fn check_ledger_id<E: DiagnosticEnv>(
    env: &mut E,
    state: &mut RunState,
) -> (CheckStatus, Vec<String>) {
    let id = env
        .ledger_id()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    match id {
        Some(id) => {
            let preview = id.chars().take(10).collect::<String>();
            state.ledger_id = Some(id);
            (
                CheckStatus::Pass,
                vec![format!("Using spreadsheet {preview}...")],
            )
        }
        None => (
            CheckStatus::Fatal,
            vec!["No Spreadsheet ID provided".to_string()],
        ),
    }
}

fn check_open_ledger(state: &mut RunState) -> (CheckStatus, Vec<String>) {
    let (Some(ledger), Some(ledger_id)) = (state.ledger.as_ref(), state.ledger_id.as_deref())
    else {
        return (
            CheckStatus::Fatal,
            vec!["No connection or spreadsheet id".to_string()],
        );
    };

    match ledger.read_all(ledger_id) {
        Ok(snapshot) => {
            let mut lines = vec![
                "Spreadsheet opened successfully".to_string(),
                format!("Spreadsheet title: {}", snapshot.title),
                format!("First sheet: {}", snapshot.sheet_title),
                format!("Found {} rows of data", snapshot.len()),
            ];
            if snapshot.is_empty() {
                lines.push("Sheet is empty".to_string());
                return (CheckStatus::Warn, lines);
            }
            lines.push(format!("Columns: {}", snapshot.headers.join(", ")));
            lines.push("Connection is working; use this Spreadsheet ID in the console".to_string());
            (CheckStatus::Pass, lines)
        }
        Err(LedgerError::NotFound { .. }) => {
            let email = state
                .key
                .as_ref()
                .map(|k| k.client_email.as_str())
                .unwrap_or("<service account email>");
            (
                CheckStatus::Fatal,
                vec![
                    "Spreadsheet not found (404)".to_string(),
                    "To fix:".to_string(),
                    "  1. Open the spreadsheet".to_string(),
                    "  2. Click 'Share'".to_string(),
                    format!("  3. Add this email: {email}"),
                    "  4. Give 'Editor' permissions".to_string(),
                    "  5. Uncheck 'Notify people' and click 'Share'".to_string(),
                ],
            )
        }
        Err(LedgerError::Api(msg)) => (
            CheckStatus::Fatal,
            vec![
                format!("API error: {msg}"),
                "Check that the Google Sheets API is enabled for the project".to_string(),
            ],
        ),
        Err(err) => (CheckStatus::Fatal, vec![err.to_string()]),
    }
}
