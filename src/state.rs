use std::collections::VecDeque;

use chrono::{DateTime, Local};

use crate::ledger::{LedgerSnapshot, TeamRecord};
use crate::xp_update::{XpChange, XpOp};

pub const ADD_MIN: i64 = -100_000;
pub const ADD_MAX: i64 = 100_000;
pub const ADD_DEFAULT: i64 = 100;
pub const ADD_STEP: i64 = 50;
pub const SET_MIN: i64 = 0;
pub const SET_MAX: i64 = 1_000_000;
pub const SET_DEFAULT: i64 = 1_000;
pub const SET_STEP: i64 = 100;

const MAX_LOGS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Leaderboard,
    AddForm,
    SetForm,
    LedgerIdInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub text: String,
}

/// Bounded integer field. Typed digits go to a buffer that is clamped into
/// range when read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberInput {
    pub value: i64,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    buffer: Option<String>,
}

impl NumberInput {
    pub fn new(value: i64, min: i64, max: i64, step: i64) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            step,
            buffer: None,
        }
    }

    /// The amount to submit. `None` while the typed buffer is empty or holds
    /// only a sign.
    pub fn entered(&self) -> Option<i64> {
        match self.buffer.as_deref() {
            Some(buf) => buf.parse::<i64>().ok().map(|v| v.clamp(self.min, self.max)),
            None => Some(self.value),
        }
    }

    /// Like `entered`, but an unfinished buffer reads as the last committed
    /// value. Stepping starts from here.
    pub fn current(&self) -> i64 {
        self.entered().unwrap_or(self.value)
    }

    fn commit(&mut self) {
        self.value = self.current();
        self.buffer = None;
    }

    pub fn increment(&mut self) {
        self.commit();
        self.value = self.value.saturating_add(self.step).min(self.max);
    }

    pub fn decrement(&mut self) {
        self.commit();
        self.value = self.value.saturating_sub(self.step).max(self.min);
    }

    pub fn push_digit(&mut self, digit: char) {
        if !digit.is_ascii_digit() {
            return;
        }
        // A fresh buffer keeps the sign of the committed value.
        let negative = self.value < 0;
        let buf = self.buffer.get_or_insert_with(|| {
            if negative {
                "-".to_string()
            } else {
                String::new()
            }
        });
        if buf.trim_start_matches('-').len() < 12 {
            buf.push(digit);
        }
    }

    pub fn toggle_sign(&mut self) {
        if self.min >= 0 {
            return;
        }
        match self.buffer.as_mut() {
            Some(buf) if buf.starts_with('-') => {
                buf.remove(0);
            }
            Some(buf) => buf.insert(0, '-'),
            None => self.value = self.value.saturating_neg().clamp(self.min, self.max),
        }
    }

    pub fn backspace(&mut self) {
        let buf = self
            .buffer
            .get_or_insert_with(|| self.value.to_string());
        buf.pop();
    }

    pub fn display(&self) -> String {
        match self.buffer.as_deref() {
            Some(buf) => format!("{buf}_"),
            None => self.value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpForm {
    pub team_ids: Vec<String>,
    pub team_index: usize,
    pub amount: NumberInput,
}

impl XpForm {
    pub fn selected_team(&self) -> Option<&str> {
        self.team_ids.get(self.team_index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpRequest {
    pub team_id: String,
    pub op: XpOp,
}

pub struct AppState {
    pub screen: Screen,
    pub ledger_id: String,
    pub ledger_id_draft: String,
    pub snapshot: Option<LedgerSnapshot>,
    pub selected: usize,
    pub form: Option<XpForm>,
    pub status: Option<StatusLine>,
    pub logs: VecDeque<String>,
    pub last_updated: Option<DateTime<Local>>,
    pub help_overlay: bool,
}

impl AppState {
    pub fn new(ledger_id: impl Into<String>) -> Self {
        let ledger_id = ledger_id.into();
        Self {
            screen: Screen::Leaderboard,
            ledger_id_draft: ledger_id.clone(),
            ledger_id,
            snapshot: None,
            selected: 0,
            form: None,
            status: None,
            logs: VecDeque::new(),
            last_updated: None,
            help_overlay: false,
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    pub fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = Some(StatusLine {
            kind,
            text: text.into(),
        });
    }

    pub fn has_ledger_id(&self) -> bool {
        !self.ledger_id.trim().is_empty()
    }

    /// Replaces the snapshot, keeping the cursor on the same team when it is
    /// still present.
    pub fn apply_snapshot(&mut self, snapshot: LedgerSnapshot, now: DateTime<Local>) {
        let selected_id = self.selected_team().map(|t| t.trimmed_id().to_string());
        self.snapshot = Some(snapshot);
        self.last_updated = Some(now);
        let pos = selected_id.and_then(|id| {
            self.ranked_rows()
                .iter()
                .position(|t| t.trimmed_id() == id)
        });
        if let Some(pos) = pos {
            self.selected = pos;
        }
        self.clamp_selection();
    }

    pub fn ranked_rows(&self) -> Vec<&TeamRecord> {
        self.snapshot
            .as_ref()
            .map(LedgerSnapshot::ranked)
            .unwrap_or_default()
    }

    pub fn selected_team(&self) -> Option<&TeamRecord> {
        self.ranked_rows().get(self.selected).copied()
    }

    pub fn select_next(&mut self) {
        let total = self.ranked_rows().len();
        if total == 0 {
            self.selected = 0;
            return;
        }
        self.selected = (self.selected + 1).min(total - 1);
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn clamp_selection(&mut self) {
        let total = self.ranked_rows().len();
        if total == 0 {
            self.selected = 0;
        } else if self.selected >= total {
            self.selected = total - 1;
        }
    }

    pub fn current_xp(&self, team_id: &str) -> Option<i64> {
        self.snapshot
            .as_ref()
            .and_then(|s| s.find(team_id))
            .map(|(_, r)| r.total_xp)
    }

    pub fn team_name(&self, team_id: &str) -> Option<&str> {
        self.snapshot
            .as_ref()
            .and_then(|s| s.find(team_id))
            .map(|(_, r)| r.team_name.as_str())
    }

    pub fn begin_add(&mut self) -> bool {
        let Some(mut form) = self.new_form() else {
            return false;
        };
        form.amount = NumberInput::new(ADD_DEFAULT, ADD_MIN, ADD_MAX, ADD_STEP);
        self.form = Some(form);
        self.screen = Screen::AddForm;
        true
    }

    pub fn begin_set(&mut self) -> bool {
        let Some(mut form) = self.new_form() else {
            return false;
        };
        let current = form
            .selected_team()
            .and_then(|id| self.current_xp(id))
            .unwrap_or(SET_DEFAULT);
        form.amount = NumberInput::new(current, SET_MIN, SET_MAX, SET_STEP);
        self.form = Some(form);
        self.screen = Screen::SetForm;
        true
    }

    fn new_form(&self) -> Option<XpForm> {
        let team_ids = self.snapshot.as_ref()?.team_ids();
        if team_ids.is_empty() {
            return None;
        }
        let team_index = self
            .selected_team()
            .and_then(|t| team_ids.iter().position(|id| id == t.trimmed_id()))
            .unwrap_or(0);
        Some(XpForm {
            team_ids,
            team_index,
            amount: NumberInput::new(0, 0, 0, 1),
        })
    }

    /// Moves the form's team picker. On the set form the amount follows the
    /// newly picked team's current XP.
    pub fn cycle_form_team(&mut self, forward: bool) {
        let screen = self.screen;
        let Some(form) = self.form.as_mut() else {
            return;
        };
        let total = form.team_ids.len();
        if total == 0 {
            return;
        }
        form.team_index = if forward {
            (form.team_index + 1) % total
        } else {
            (form.team_index + total - 1) % total
        };
        if screen == Screen::SetForm {
            let id = form.team_ids[form.team_index].clone();
            let current = self.current_xp(&id).unwrap_or(SET_DEFAULT);
            if let Some(form) = self.form.as_mut() {
                form.amount = NumberInput::new(current, SET_MIN, SET_MAX, SET_STEP);
            }
        }
    }

    /// `None` when no form is open or the amount is unfinished.
    pub fn form_request(&self) -> Option<XpRequest> {
        let form = self.form.as_ref()?;
        let team_id = form.selected_team()?.to_string();
        let amount = form.amount.entered()?;
        let op = match self.screen {
            Screen::AddForm => XpOp::Add(amount),
            Screen::SetForm => XpOp::Set(amount),
            _ => return None,
        };
        Some(XpRequest { team_id, op })
    }

    pub fn close_form(&mut self) {
        self.form = None;
        self.screen = Screen::Leaderboard;
    }

    pub fn record_change(&mut self, change: &XpChange) {
        let msg = format!(
            "Updated {}! {} → {} XP",
            change.team_id, change.old_xp, change.new_xp
        );
        self.push_log(format!("[INFO] {msg} (row {})", change.row));
        self.set_status(StatusKind::Success, msg);
    }

    pub fn begin_ledger_id_edit(&mut self) {
        self.ledger_id_draft = self.ledger_id.clone();
        self.screen = Screen::LedgerIdInput;
    }

    /// Applies the drafted id. Returns true when it changed.
    pub fn commit_ledger_id(&mut self) -> bool {
        let draft = self.ledger_id_draft.trim().to_string();
        self.screen = Screen::Leaderboard;
        if draft == self.ledger_id {
            return false;
        }
        self.ledger_id = draft;
        self.snapshot = None;
        self.selected = 0;
        self.last_updated = None;
        true
    }
}
