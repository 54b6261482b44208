use std::env;
use std::path::PathBuf;

use crate::public_board::PublicBoardConfig;

pub const DEFAULT_CREDENTIAL_PATH: &str = "service_account.json";

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub spreadsheet_id: String,
    pub credential_path: PathBuf,
    pub api_key: Option<String>,
    pub public_range: Option<String>,
    pub published_csv_url: Option<String>,
    pub log_file: Option<PathBuf>,
    pub export_dir: PathBuf,
}

/// Loads `.env.local` then `.env`. Variables already set win.
pub fn load_env_files() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            spreadsheet_id: opt_env("SPREADSHEET_ID").unwrap_or_default(),
            credential_path: opt_env("GOOGLE_APPLICATION_CREDENTIALS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_PATH)),
            api_key: opt_env("SHEETS_API_KEY"),
            public_range: opt_env("PUBLIC_RANGE"),
            published_csv_url: opt_env("PUBLISHED_CSV_URL"),
            log_file: opt_env("XPBOOST_LOG").map(PathBuf::from),
            export_dir: opt_env("XPBOOST_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn public_board(&self) -> PublicBoardConfig {
        PublicBoardConfig {
            ledger_id: Some(self.spreadsheet_id.clone()),
            api_key: self.api_key.clone(),
            range: self.public_range.clone(),
            published_csv_url: self.published_csv_url.clone(),
        }
    }
}

fn opt_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
