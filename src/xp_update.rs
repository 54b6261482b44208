use tracing::{info, warn};

use crate::error::XpError;
use crate::ledger::{LedgerService, LedgerSnapshot, XP_COLUMN};

/// Column holding the team id, read back by the row guard.
const TEAM_ID_COLUMN: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpOp {
    Add(i64),
    Set(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowGuard {
    /// Re-read the id cell of the target row right before writing.
    #[default]
    VerifyTeamId,
    /// Trust the snapshot's row math.
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpChange {
    pub team_id: String,
    pub row: u32,
    pub old_xp: i64,
    pub new_xp: i64,
}

impl XpChange {
    pub fn pair(&self) -> (i64, i64) {
        (self.old_xp, self.new_xp)
    }
}

pub fn add_xp(
    ledger: &dyn LedgerService,
    snapshot: &LedgerSnapshot,
    team_id: &str,
    delta: i64,
) -> Result<XpChange, XpError> {
    apply(ledger, snapshot, team_id, XpOp::Add(delta), RowGuard::default())
}

pub fn set_xp(
    ledger: &dyn LedgerService,
    snapshot: &LedgerSnapshot,
    team_id: &str,
    new_value: i64,
) -> Result<XpChange, XpError> {
    apply(ledger, snapshot, team_id, XpOp::Set(new_value), RowGuard::default())
}

/// Locates the team's row in `snapshot`, computes the new XP and writes the
/// single XP cell. Nothing is written when the lookup or the guard fails.
pub fn apply(
    ledger: &dyn LedgerService,
    snapshot: &LedgerSnapshot,
    team_id: &str,
    op: XpOp,
    guard: RowGuard,
) -> Result<XpChange, XpError> {
    let wanted = team_id.trim();
    let (index, row) = resolve_row(snapshot, wanted)?;
    let old_xp = snapshot.records[index].total_xp;

    let new_xp = match op {
        XpOp::Add(delta) => old_xp
            .checked_add(delta)
            .ok_or(XpError::XpOverflow { old_xp, delta })?,
        XpOp::Set(value) => value,
    };

    if guard == RowGuard::VerifyTeamId {
        let found = ledger.read_cell(&snapshot.ledger_id, row, TEAM_ID_COLUMN)?;
        if found.trim() != wanted {
            warn!(team_id = wanted, row, found = %found, "row moved since snapshot");
            return Err(XpError::StaleSnapshot {
                expected: wanted.to_string(),
                found,
                row,
            });
        }
    }

    ledger.write_cell(&snapshot.ledger_id, row, XP_COLUMN, new_xp)?;
    info!(team_id = wanted, row, old_xp, new_xp, ?op, "xp updated");

    Ok(XpChange {
        team_id: wanted.to_string(),
        row,
        old_xp,
        new_xp,
    })
}

/// Resolves a trimmed id to its snapshot index and physical row. The id must
/// occur exactly once.
pub fn resolve_row(snapshot: &LedgerSnapshot, team_id: &str) -> Result<(usize, u32), XpError> {
    let wanted = team_id.trim();
    let mut hits = snapshot
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| !wanted.is_empty() && r.trimmed_id() == wanted)
        .map(|(idx, _)| idx);

    let Some(first) = hits.next() else {
        return Err(XpError::TeamNotFound(wanted.to_string()));
    };
    if let Some(second) = hits.next() {
        return Err(XpError::DuplicateTeam {
            team_id: wanted.to_string(),
            first_row: LedgerSnapshot::physical_row(first),
            second_row: LedgerSnapshot::physical_row(second),
        });
    }
    Ok((first, LedgerSnapshot::physical_row(first)))
}
