use thiserror::Error;

/// Failures surfaced by the ledger client. Every variant is terminal for the
/// operation that produced it; nothing here is retried.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("ledger {ledger_id} not found or not shared with the service account")]
    NotFound { ledger_id: String },

    #[error("ledger api error: {0}")]
    Api(String),

    #[error("ledger schema mismatch: {0}")]
    Schema(String),
}

impl LedgerError {
    pub fn api(msg: impl Into<String>) -> Self {
        LedgerError::Api(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        LedgerError::Auth(msg.into())
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Api(format!("request failed: {err}"))
    }
}

#[derive(Debug, Error)]
pub enum XpError {
    #[error("team {0} not found in the loaded leaderboard")]
    TeamNotFound(String),

    #[error("team id {team_id} appears on rows {first_row} and {second_row}")]
    DuplicateTeam {
        team_id: String,
        first_row: u32,
        second_row: u32,
    },

    #[error("row {row} no longer holds team {expected} (found {found:?}); reload and retry")]
    StaleSnapshot {
        expected: String,
        found: String,
        row: u32,
    },

    #[error("xp overflow: {old_xp} + {delta}")]
    XpOverflow { old_xp: i64, delta: i64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
