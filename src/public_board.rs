use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::http_client::http_client;
use crate::ledger::{TeamRecord, cell_text};
use crate::sheets::{SHEETS_API_BASE, error_message};

pub const DEFAULT_PUBLIC_RANGE: &str = "A2:C";
const MISSING_ID: &str = "N/A";
const MISSING_NAME: &str = "Unknown Team";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardSource {
    SheetsApi,
    PublishedCsv,
}

#[derive(Debug, Clone, Default)]
pub struct PublicBoardConfig {
    pub ledger_id: Option<String>,
    pub api_key: Option<String>,
    pub range: Option<String>,
    pub published_csv_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublicBoard {
    pub source: BoardSource,
    pub teams: Vec<TeamRecord>,
}

impl PublicBoard {
    pub fn ranked(&self) -> Vec<&TeamRecord> {
        let mut rows = self.teams.iter().collect::<Vec<_>>();
        rows.sort_by(|a, b| b.total_xp.cmp(&a.total_xp));
        rows
    }
}

/// Read-only leaderboard: the values API with an API key first, then the
/// published CSV export.
pub fn fetch_public_board(config: &PublicBoardConfig) -> Result<PublicBoard> {
    let mut api_err = None;
    if let (Some(id), Some(key)) = (
        config.ledger_id.as_deref().and_then(non_empty),
        config.api_key.as_deref().and_then(non_empty),
    ) {
        let range = config
            .range
            .as_deref()
            .and_then(non_empty)
            .unwrap_or(DEFAULT_PUBLIC_RANGE);
        match fetch_values_with_key(id, key, range) {
            Ok(teams) => {
                return Ok(PublicBoard {
                    source: BoardSource::SheetsApi,
                    teams,
                });
            }
            Err(err) => {
                warn!("sheets api read failed, falling back to csv: {err:#}");
                api_err = Some(err);
            }
        }
    }

    let Some(csv_url) = config.published_csv_url.as_deref().and_then(non_empty) else {
        return Err(match api_err {
            Some(err) => err.context("no published csv url configured for fallback"),
            None => anyhow::anyhow!("neither an api key nor a published csv url is configured"),
        });
    };
    let teams = fetch_published_csv(csv_url)?;
    Ok(PublicBoard {
        source: BoardSource::PublishedCsv,
        teams,
    })
}

fn fetch_values_with_key(ledger_id: &str, api_key: &str, range: &str) -> Result<Vec<TeamRecord>> {
    let client = http_client()?;
    let mut url = Url::parse(SHEETS_API_BASE).context("invalid api base")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("api base cannot carry a path"))?
        .push("spreadsheets")
        .push(ledger_id)
        .push("values")
        .push(range);
    url.query_pairs_mut().append_pair("key", api_key);

    let resp = client.get(url).send().context("request failed")?;
    let status = resp.status();
    let body = resp.text().context("failed reading body")?;
    if !status.is_success() {
        return Err(anyhow::anyhow!("http {}: {}", status, error_message(&body)));
    }
    parse_values_json(&body)
}

fn fetch_published_csv(url: &str) -> Result<Vec<TeamRecord>> {
    let client = http_client()?;
    let resp = client.get(url).send().context("csv request failed")?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("csv fallback http {}", status));
    }
    let body = resp.text().context("failed reading csv body")?;
    let teams = parse_published_csv(&body);
    debug!(rows = teams.len(), "read published csv");
    Ok(teams)
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Parses a values response whose range starts below the header row.
pub fn parse_values_json(raw: &str) -> Result<Vec<TeamRecord>> {
    let parsed: ValuesResponse = serde_json::from_str(raw).context("invalid values json")?;
    Ok(parsed
        .values
        .iter()
        .map(|row| {
            let cells = row.iter().map(cell_text).collect::<Vec<_>>();
            public_row(
                cells.first().map(String::as_str),
                cells.get(1).map(String::as_str),
                cells.get(2).map(String::as_str),
            )
        })
        .collect())
}

/// Parses the published CSV export. The first non-blank record is the
/// header. Quoted cells may span line breaks.
pub fn parse_published_csv(raw: &str) -> Vec<TeamRecord> {
    split_csv_records(raw)
        .into_iter()
        .filter(|fields| fields.iter().any(|f| !f.trim().is_empty()))
        .skip(1)
        .map(|fields| {
            public_row(
                fields.first().map(String::as_str),
                fields.get(1).map(String::as_str),
                fields.get(2).map(String::as_str),
            )
        })
        .collect()
}

fn public_row(id: Option<&str>, name: Option<&str>, xp: Option<&str>) -> TeamRecord {
    TeamRecord {
        team_id: id
            .and_then(non_empty)
            .unwrap_or(MISSING_ID)
            .to_string(),
        team_name: name
            .and_then(non_empty)
            .unwrap_or(MISSING_NAME)
            .to_string(),
        total_xp: xp.and_then(parse_leading_int).unwrap_or(0),
    }
}

fn split_csv_records(raw: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                records.push(std::mem::take(&mut fields));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() || !fields.is_empty() {
        fields.push(current);
        records.push(fields);
    }
    records
}

/// Integer prefix of a cell, so "950 pts" reads as 950.
fn parse_leading_int(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|v| sign * v)
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_int_matches_lenient_parsing() {
        assert_eq!(parse_leading_int("950"), Some(950));
        assert_eq!(parse_leading_int(" 950 pts"), Some(950));
        assert_eq!(parse_leading_int("12.9"), Some(12));
        assert_eq!(parse_leading_int("-40"), Some(-40));
        assert_eq!(parse_leading_int("abc"), None);
        assert_eq!(parse_leading_int(""), None);
    }

    #[test]
    fn csv_split_honours_quotes() {
        assert_eq!(
            split_csv_records("T1,\"Alpha, Inc\",500\r\nT2,\"Say \"\"hi\"\"\",7\r\n"),
            vec![vec!["T1", "Alpha, Inc", "500"], vec!["T2", r#"Say "hi""#, "7"]]
        );
    }

    #[test]
    fn quoted_line_breaks_stay_in_one_record() {
        let raw = "Team ID,Team Name,Total XP\nT1,\"Alpha\nSquad\",500\n\nT2,Beta,300";
        let teams = parse_published_csv(raw);
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[0].team_name, "Alpha\nSquad");
        assert_eq!(teams[0].total_xp, 500);
        assert_eq!(teams[1].team_id, "T2");
    }
}
