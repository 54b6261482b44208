use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::ledger::{LedgerSnapshot, TeamRecord};

pub struct ExportReport {
    pub path: PathBuf,
    pub teams: usize,
}

pub fn default_export_path(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("leaderboard_{stamp}.xlsx"))
}

const HEADERS: [&str; 4] = ["Rank", "Team ID", "Team Name", "Total XP"];

/// Writes the ranked leaderboard to a single-sheet workbook.
pub fn export_leaderboard(snapshot: &LedgerSnapshot, path: &Path) -> Result<ExportReport> {
    let ranked = snapshot.ranked();

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Leaderboard")?;
        write_rows(sheet, &ranked)?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(ExportReport {
        path: path.to_path_buf(),
        teams: ranked.len(),
    })
}

fn write_rows(worksheet: &mut Worksheet, ranked: &[&TeamRecord]) -> Result<()> {
    let bold = Format::new().set_bold();
    for (col, header) in HEADERS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &bold)
            .with_context(|| format!("write header {header}"))?;
    }
    for (idx, team) in ranked.iter().enumerate() {
        let row = idx as u32 + 1;
        // Rank and XP stay numeric so the sheet sorts correctly.
        worksheet
            .write_number(row, 0, row as f64)
            .and_then(|ws| ws.write_string(row, 1, team.trimmed_id()))
            .and_then(|ws| ws.write_string(row, 2, &team.team_name))
            .and_then(|ws| ws.write_number(row, 3, team.total_xp as f64))
            .with_context(|| format!("write row {row}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn team(id: &str, name: &str, xp: i64) -> TeamRecord {
        TeamRecord {
            team_id: id.to_string(),
            team_name: name.to_string(),
            total_xp: xp,
        }
    }

    #[test]
    fn export_writes_ranked_teams_and_skips_blank_rows() {
        let snapshot = LedgerSnapshot {
            ledger_id: "ledger-1".to_string(),
            title: "XP BOOST 2025".to_string(),
            sheet_title: "Sheet1".to_string(),
            headers: HEADERS[1..].iter().map(|h| h.to_string()).collect(),
            records: vec![
                team("T2", "Beta", 300),
                team("", "", 0),
                team("T1", "Alpha", 500),
                team("  ", "Ghost", 900),
                team("T3", "Gamma", 300),
            ],
        };
        let ranked = snapshot
            .ranked()
            .iter()
            .map(|t| t.trimmed_id().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ranked, vec!["T1", "T2", "T3"]);

        let dir = tempdir().expect("create temp dir");
        let path = default_export_path(dir.path());
        let report = export_leaderboard(&snapshot, &path).expect("export");

        assert_eq!(report.teams, ranked.len());
        assert_eq!(report.path, path);
        let meta = std::fs::metadata(&path).expect("workbook written");
        assert!(meta.len() > 0);
        assert!(
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("leaderboard_") && n.ends_with(".xlsx"))
        );
    }

    #[test]
    fn export_to_missing_directory_fails() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("nope").join("board.xlsx");
        let snapshot = LedgerSnapshot {
            ledger_id: "ledger-1".to_string(),
            title: String::new(),
            sheet_title: "Sheet1".to_string(),
            headers: Vec::new(),
            records: vec![team("T1", "Alpha", 1)],
        };
        assert!(export_leaderboard(&snapshot, &path).is_err());
    }
}
