use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LedgerError, LedgerResult};

pub const TEAM_ID_HEADER: &str = "Team ID";
pub const TEAM_NAME_HEADER: &str = "Team Name";
pub const TOTAL_XP_HEADER: &str = "Total XP";

/// 1-indexed column the write path targets.
pub const XP_COLUMN: u32 = 3;
/// Physical row of the first data record (row 1 is the header).
pub const FIRST_DATA_ROW: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub team_id: String,
    pub team_name: String,
    pub total_xp: i64,
}

impl TeamRecord {
    pub fn trimmed_id(&self) -> &str {
        self.team_id.trim()
    }
}

/// Point-in-time copy of the first sheet of a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub ledger_id: String,
    pub title: String,
    pub sheet_title: String,
    pub headers: Vec<String>,
    pub records: Vec<TeamRecord>,
}

impl LedgerSnapshot {
    pub fn physical_row(index: usize) -> u32 {
        index as u32 + FIRST_DATA_ROW
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, team_id: &str) -> Option<(usize, &TeamRecord)> {
        let wanted = team_id.trim();
        self.records
            .iter()
            .enumerate()
            .find(|(_, r)| r.trimmed_id() == wanted)
    }

    /// Records ordered by XP descending. The sort is stable, so ties keep
    /// their sheet order.
    pub fn ranked(&self) -> Vec<&TeamRecord> {
        let mut rows = self
            .records
            .iter()
            .filter(|r| !r.trimmed_id().is_empty())
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.total_xp.cmp(&a.total_xp));
        rows
    }

    /// Trimmed ids sorted ascending, for the team picker.
    pub fn team_ids(&self) -> Vec<String> {
        let mut ids = self
            .records
            .iter()
            .map(|r| r.trimmed_id().to_string())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

/// Primitive operations against the remote ledger. Implemented by the sheets
/// connection and by in-memory fakes in tests.
pub trait LedgerService {
    fn read_all(&self, ledger_id: &str) -> LedgerResult<LedgerSnapshot>;

    fn read_cell(&self, ledger_id: &str, row: u32, column: u32) -> LedgerResult<String>;

    fn write_cell(&self, ledger_id: &str, row: u32, column: u32, value: i64) -> LedgerResult<()>;
}

/// Builds a snapshot from the raw grid of a sheet, header row first.
pub fn snapshot_from_grid(
    ledger_id: &str,
    title: &str,
    sheet_title: &str,
    grid: &[Vec<Value>],
) -> LedgerResult<LedgerSnapshot> {
    let Some(header_row) = grid.first() else {
        return Ok(LedgerSnapshot {
            ledger_id: ledger_id.to_string(),
            title: title.to_string(),
            sheet_title: sheet_title.to_string(),
            headers: Vec::new(),
            records: Vec::new(),
        });
    };
    let headers = header_row.iter().map(cell_text).collect::<Vec<_>>();

    let id_col = header_index(&headers, TEAM_ID_HEADER)?;
    let name_col = header_index(&headers, TEAM_NAME_HEADER)?;
    let xp_col = header_index(&headers, TOTAL_XP_HEADER)?;
    if xp_col + 1 != XP_COLUMN as usize {
        return Err(LedgerError::Schema(format!(
            "'{TOTAL_XP_HEADER}' must be column {XP_COLUMN}, found in column {}",
            xp_col + 1
        )));
    }

    let mut records = Vec::with_capacity(grid.len().saturating_sub(1));
    for (idx, row) in grid.iter().skip(1).enumerate() {
        let team_id = row.get(id_col).map(cell_text).unwrap_or_default();
        let team_name = row.get(name_col).map(cell_text).unwrap_or_default();
        let total_xp = parse_xp(row.get(xp_col)).map_err(|raw| {
            LedgerError::Schema(format!(
                "row {} has non-integer '{TOTAL_XP_HEADER}' value {raw:?}",
                LedgerSnapshot::physical_row(idx)
            ))
        })?;
        records.push(TeamRecord {
            team_id,
            team_name,
            total_xp,
        });
    }

    Ok(LedgerSnapshot {
        ledger_id: ledger_id.to_string(),
        title: title.to_string(),
        sheet_title: sheet_title.to_string(),
        headers,
        records,
    })
}

fn header_index(headers: &[String], name: &str) -> LedgerResult<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| LedgerError::Schema(format!("missing '{name}' header")))
}

pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        other => other.to_string(),
    }
}

fn parse_xp(value: Option<&Value>) -> Result<i64, String> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(n.to_string()),
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0);
            }
            trimmed.parse::<i64>().map_err(|_| s.clone())
        }
        Some(other) => Err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn grid() -> Vec<Vec<Value>> {
        vec![
            vec![json!("Team ID"), json!("Team Name"), json!("Total XP")],
            vec![json!(" T1 "), json!("Alpha"), json!(500)],
            vec![json!("T2"), json!("Beta"), json!("300")],
            vec![],
            vec![json!("T3"), json!("Gamma"), json!(500.0)],
        ]
    }

    #[test]
    fn blank_rows_keep_their_slot() {
        let snap = snapshot_from_grid("id", "XP", "Sheet1", &grid()).expect("grid parses");
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.records[2].team_id, "");
        assert_eq!(snap.records[2].total_xp, 0);
        let (idx, rec) = snap.find("T3").expect("T3 present");
        assert_eq!(idx, 3);
        assert_eq!(LedgerSnapshot::physical_row(idx), 5);
        assert_eq!(rec.total_xp, 500);
    }

    #[test]
    fn ranking_is_stable_on_ties() {
        let snap = snapshot_from_grid("id", "XP", "Sheet1", &grid()).expect("grid parses");
        let ids = snap
            .ranked()
            .into_iter()
            .map(|r| r.trimmed_id().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["T1", "T3", "T2"]);
    }

    #[test]
    fn xp_column_must_be_third() {
        let grid = vec![vec![json!("Total XP"), json!("Team ID"), json!("Team Name")]];
        let err = snapshot_from_grid("id", "XP", "Sheet1", &grid).unwrap_err();
        assert!(matches!(err, LedgerError::Schema(_)));
    }

    #[test]
    fn fractional_xp_is_rejected() {
        let grid = vec![
            vec![json!("Team ID"), json!("Team Name"), json!("Total XP")],
            vec![json!("T1"), json!("Alpha"), json!(12.5)],
        ];
        let err = snapshot_from_grid("id", "XP", "Sheet1", &grid).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn team_ids_are_trimmed_and_sorted() {
        let snap = snapshot_from_grid("id", "XP", "Sheet1", &grid()).expect("grid parses");
        assert_eq!(snap.team_ids(), vec!["T1", "T2", "T3"]);
    }
}
