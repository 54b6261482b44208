use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::{LedgerError, LedgerResult};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("xpboost_admin/", env!("CARGO_PKG_VERSION"));

/// Builds the blocking client owned by a single connection. Callers keep the
/// client for the lifetime of their session.
pub fn http_client() -> LedgerResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| LedgerError::api(format!("failed to build http client: {err}")))
}
