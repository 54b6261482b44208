#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use serde_json::{Value, json};

use xpboost_admin::error::{LedgerError, LedgerResult};
use xpboost_admin::ledger::{LedgerService, LedgerSnapshot, cell_text, snapshot_from_grid};

pub const LEDGER_ID: &str = "ledger-1";

/// In-memory ledger: a header row plus data rows, recording every write.
pub struct FakeLedger {
    pub grid: RefCell<Vec<Vec<Value>>>,
    pub writes: RefCell<Vec<(u32, u32, i64)>>,
    pub cell_reads: Cell<usize>,
    pub fail_writes: Cell<bool>,
    pub missing: bool,
}

impl FakeLedger {
    pub fn new(rows: &[(&str, &str, i64)]) -> Self {
        let mut grid = vec![vec![json!("Team ID"), json!("Team Name"), json!("Total XP")]];
        for (id, name, xp) in rows {
            grid.push(vec![json!(id), json!(name), json!(xp)]);
        }
        Self {
            grid: RefCell::new(grid),
            writes: RefCell::new(Vec::new()),
            cell_reads: Cell::new(0),
            fail_writes: Cell::new(false),
            missing: false,
        }
    }

    pub fn alpha_beta() -> Self {
        Self::new(&[("T1", "Alpha", 500), ("T2", "Beta", 300)])
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read_all(LEDGER_ID).expect("fake ledger reads")
    }

    pub fn xp_of(&self, team_id: &str) -> Option<i64> {
        self.snapshot().find(team_id).map(|(_, r)| r.total_xp)
    }

    /// Swaps two data rows, as if someone re-sorted the sheet.
    pub fn swap_rows(&self, a: usize, b: usize) {
        self.grid.borrow_mut().swap(a + 1, b + 1);
    }
}

impl LedgerService for FakeLedger {
    fn read_all(&self, ledger_id: &str) -> LedgerResult<LedgerSnapshot> {
        if self.missing {
            return Err(LedgerError::NotFound {
                ledger_id: ledger_id.to_string(),
            });
        }
        snapshot_from_grid(ledger_id, "XP BOOST 2025", "Sheet1", &self.grid.borrow())
    }

    fn read_cell(&self, _ledger_id: &str, row: u32, column: u32) -> LedgerResult<String> {
        self.cell_reads.set(self.cell_reads.get() + 1);
        let grid = self.grid.borrow();
        Ok(grid
            .get(row as usize - 1)
            .and_then(|r| r.get(column as usize - 1))
            .map(cell_text)
            .unwrap_or_default())
    }

    fn write_cell(&self, _ledger_id: &str, row: u32, column: u32, value: i64) -> LedgerResult<()> {
        if self.fail_writes.get() {
            return Err(LedgerError::api("http 429 Too Many Requests: quota exceeded"));
        }
        let mut grid = self.grid.borrow_mut();
        let (r, c) = (row as usize - 1, column as usize - 1);
        while grid.len() <= r {
            grid.push(Vec::new());
        }
        while grid[r].len() <= c {
            grid[r].push(Value::Null);
        }
        grid[r][c] = json!(value);
        self.writes.borrow_mut().push((row, column, value));
        Ok(())
    }
}
