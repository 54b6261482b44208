use std::io;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use tracing::{error, info};

use xpboost_admin::config::{self, AppConfig};
use xpboost_admin::credential::load_service_account;
use xpboost_admin::error::XpError;
use xpboost_admin::export::{default_export_path, export_leaderboard};
use xpboost_admin::ledger::LedgerService;
use xpboost_admin::logging;
use xpboost_admin::sheets::{self, Connection};
use xpboost_admin::state::{AppState, Screen, StatusKind};
use xpboost_admin::xp_update::{self, RowGuard, XpOp};

/// Work that blocks on the remote ledger. Queued by a key press and run after
/// the next draw so the "working" status is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Reload,
    Submit,
}

struct App {
    state: AppState,
    config: AppConfig,
    connection: Option<Connection>,
    pending: Option<Pending>,
    should_quit: bool,
}

impl App {
    fn new(config: AppConfig) -> Self {
        let state = AppState::new(config.spreadsheet_id.clone());
        Self {
            state,
            config,
            connection: None,
            pending: None,
            should_quit: false,
        }
    }

    fn connect(&mut self) {
        let key = match load_service_account(&self.config.credential_path) {
            Ok(key) => key,
            Err(err) => {
                error!("credential load failed: {err}");
                self.state.push_log(format!("[WARN] {err}"));
                self.state.set_status(
                    StatusKind::Error,
                    format!("Failed to authenticate with Google Sheets: {err}"),
                );
                return;
            }
        };
        match sheets::connect(&key) {
            Ok(conn) => {
                self.state
                    .push_log(format!("[INFO] Authenticated as {}", conn.client_email()));
                self.connection = Some(conn);
            }
            Err(err) => {
                error!("connect failed: {err}");
                self.state.push_log(format!("[WARN] {err}"));
                self.state.set_status(
                    StatusKind::Error,
                    format!("Failed to authenticate with Google Sheets: {err}"),
                );
            }
        }
    }

    fn queue(&mut self, pending: Pending, message: &str) {
        self.pending = Some(pending);
        self.state.set_status(StatusKind::Info, message);
    }

    fn request_reload(&mut self) {
        if !self.state.has_ledger_id() {
            self.state.set_status(
                StatusKind::Info,
                "Please enter your Google Spreadsheet ID (press e)",
            );
            return;
        }
        self.queue(Pending::Reload, "Loading leaderboard data...");
    }

    fn run_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending {
            Pending::Reload => {
                self.reload();
            }
            Pending::Submit => self.submit(),
        }
    }

    fn reload(&mut self) -> bool {
        let Some(conn) = self.connection.as_ref() else {
            self.state
                .set_status(StatusKind::Error, "Not connected to Google Sheets");
            return false;
        };
        match conn.read_all(&self.state.ledger_id) {
            Ok(snapshot) => {
                let rows = snapshot.len();
                self.state.apply_snapshot(snapshot, Local::now());
                self.state.push_log(format!("[INFO] Loaded {rows} rows"));
                if matches!(
                    self.state.status.as_ref().map(|s| s.kind),
                    Some(StatusKind::Info)
                ) {
                    self.state.status = None;
                }
                true
            }
            Err(err) => {
                self.state.push_log(format!("[WARN] Load failed: {err}"));
                self.state
                    .set_status(StatusKind::Error, format!("Failed to load data: {err}"));
                false
            }
        }
    }

    fn submit(&mut self) {
        let Some(request) = self.state.form_request() else {
            if self.state.form.is_some() {
                self.state
                    .set_status(StatusKind::Error, "Enter an amount before applying");
            } else {
                self.state.close_form();
            }
            return;
        };
        let (Some(conn), Some(snapshot)) = (self.connection.as_ref(), self.state.snapshot.as_ref())
        else {
            self.state
                .set_status(StatusKind::Error, "No leaderboard loaded");
            return;
        };

        let result = xp_update::apply(
            conn,
            snapshot,
            &request.team_id,
            request.op,
            RowGuard::VerifyTeamId,
        );
        self.state.close_form();
        match result {
            Ok(change) => {
                self.state.record_change(&change);
                self.reload();
            }
            Err(err) => {
                let verb = match request.op {
                    XpOp::Add(_) => "update",
                    XpOp::Set(_) => "set",
                };
                self.state.push_log(format!("[WARN] {err}"));
                self.state
                    .set_status(StatusKind::Error, format!("Failed to {verb} XP: {err}"));
                if matches!(err, XpError::StaleSnapshot { .. }) {
                    self.reload();
                }
            }
        }
    }

    fn export(&mut self) {
        let Some(snapshot) = self.state.snapshot.as_ref() else {
            self.state
                .set_status(StatusKind::Error, "Nothing to export yet");
            return;
        };
        let path = default_export_path(&self.config.export_dir);
        match export_leaderboard(snapshot, &path) {
            Ok(report) => {
                info!(path = %report.path.display(), teams = report.teams, "exported leaderboard");
                self.state.set_status(
                    StatusKind::Success,
                    format!("Exported {} teams to {}", report.teams, report.path.display()),
                );
            }
            Err(err) => {
                self.state.push_log(format!("[WARN] Export failed: {err:#}"));
                self.state
                    .set_status(StatusKind::Error, format!("Export failed: {err}"));
            }
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.pending.is_some() {
            return;
        }
        match self.state.screen {
            Screen::Leaderboard => self.on_leaderboard_key(key),
            Screen::AddForm | Screen::SetForm => self.on_form_key(key),
            Screen::LedgerIdInput => self.on_ledger_id_key(key),
        }
    }

    fn on_leaderboard_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            KeyCode::Char('r') | KeyCode::Char('R') => self.request_reload(),
            KeyCode::Char('a') | KeyCode::Char('+') => {
                if !self.state.begin_add() {
                    self.state
                        .set_status(StatusKind::Info, "Load a leaderboard with teams first");
                }
            }
            KeyCode::Char('s') | KeyCode::Char('=') => {
                if !self.state.begin_set() {
                    self.state
                        .set_status(StatusKind::Info, "Load a leaderboard with teams first");
                }
            }
            KeyCode::Char('e') => self.state.begin_ledger_id_edit(),
            KeyCode::Char('x') => self.export(),
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            KeyCode::Esc => self.state.help_overlay = false,
            _ => {}
        }
    }

    fn on_form_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.state.close_form(),
            KeyCode::Enter => self.queue(Pending::Submit, "Writing to the leaderboard..."),
            KeyCode::Left | KeyCode::Char('h') => self.state.cycle_form_team(false),
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => {
                self.state.cycle_form_team(true)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if let Some(form) = self.state.form.as_mut() {
                    form.amount.increment();
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if let Some(form) = self.state.form.as_mut() {
                    form.amount.decrement();
                }
            }
            KeyCode::Char('-') => {
                if let Some(form) = self.state.form.as_mut() {
                    form.amount.toggle_sign();
                }
            }
            KeyCode::Backspace => {
                if let Some(form) = self.state.form.as_mut() {
                    form.amount.backspace();
                }
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if let Some(form) = self.state.form.as_mut() {
                    form.amount.push_digit(c);
                }
            }
            _ => {}
        }
    }

    fn on_ledger_id_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.state.screen = Screen::Leaderboard,
            KeyCode::Enter => {
                if self.state.commit_ledger_id() {
                    self.state
                        .push_log(format!("[INFO] Spreadsheet set to {}", self.state.ledger_id));
                }
                self.request_reload();
            }
            KeyCode::Backspace => {
                self.state.ledger_id_draft.pop();
            }
            KeyCode::Char(c) => self.state.ledger_id_draft.push(c),
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    config::load_env_files();
    let config = AppConfig::from_env();
    logging::init_for_console(config.log_file.as_deref())?;

    let mut app = App::new(config);
    app.connect();
    if app.connection.is_some() {
        app.request_reload();
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, &app.state))?;

        if app.pending.is_some() {
            app.run_pending();
            continue;
        }

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, state: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(6),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(state))
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(40), Constraint::Length(42)])
        .split(chunks[1]);
    render_leaderboard(frame, body[0], state);
    render_side_panel(frame, body[1], state);

    render_console(frame, chunks[2], state);
    render_status(frame, chunks[3], state);

    let footer = Paragraph::new(footer_text(state)).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[4]);

    if state.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_text(state: &AppState) -> String {
    let ledger = state
        .snapshot
        .as_ref()
        .map(|s| format!("{} / {}", s.title, s.sheet_title))
        .unwrap_or_else(|| "no spreadsheet loaded".to_string());
    let line1 = format!("  XP BOOST ADMIN | {ledger}");
    let line2 = "  Manage team XP in real time".to_string();
    format!("{line1}\n{line2}")
}

fn footer_text(state: &AppState) -> String {
    let keys = match state.screen {
        Screen::Leaderboard => {
            "j/k Move | a Add XP | s Set XP | r Reload | e Spreadsheet | x Export | ? Help | q Quit"
        }
        Screen::AddForm | Screen::SetForm => {
            "h/l Team | j/k Step | 0-9 Type | - Sign | Enter Apply | Esc Cancel"
        }
        Screen::LedgerIdInput => "Type the spreadsheet id | Enter Load | Esc Cancel",
    };
    let updated = state
        .last_updated
        .map(|t| format!("Last updated: {}", t.format("%Y-%m-%d %H:%M:%S")))
        .unwrap_or_else(|| "Last updated: never".to_string());
    format!("{keys} | {updated}")
}

fn leaderboard_columns() -> [Constraint; 4] {
    [
        Constraint::Length(6),
        Constraint::Length(12),
        Constraint::Min(16),
        Constraint::Length(10),
    ]
}

fn render_leaderboard(frame: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .title("Current Leaderboard")
        .borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let widths = leaderboard_columns();
    let header_cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(widths)
        .split(sections[0]);
    let bold = Style::default().add_modifier(Modifier::BOLD);
    render_cell_text(frame, header_cols[0], "Rank", bold);
    render_cell_text(frame, header_cols[1], "Team ID", bold);
    render_cell_text(frame, header_cols[2], "Team Name", bold);
    render_cell_text(frame, header_cols[3], "Total XP", bold);

    let list_area = sections[1];
    let rows = state.ranked_rows();
    if rows.is_empty() {
        let msg = if state.has_ledger_id() {
            "No teams loaded"
        } else {
            "Please enter your Google Spreadsheet ID (press e)"
        };
        let empty = Paragraph::new(msg).style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, list_area);
        return;
    }
    if list_area.height == 0 {
        return;
    }

    let visible = list_area.height as usize;
    let (start, end) = visible_range(state.selected, rows.len(), visible);
    for (i, idx) in (start..end).enumerate() {
        let row_area = Rect {
            x: list_area.x,
            y: list_area.y + i as u16,
            width: list_area.width,
            height: 1,
        };
        let selected = idx == state.selected;
        let row_style = if selected {
            Style::default().fg(Color::White).bg(Color::DarkGray)
        } else {
            Style::default()
        };
        if selected {
            frame.render_widget(Block::default().style(row_style), row_area);
        }

        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(widths)
            .split(row_area);
        let team = rows[idx];
        render_cell_text(frame, cols[0], &(idx + 1).to_string(), row_style);
        render_cell_text(frame, cols[1], team.trimmed_id(), row_style);
        render_cell_text(frame, cols[2], &team.team_name, row_style);
        render_cell_text(
            frame,
            cols[3],
            &team.total_xp.to_string(),
            row_style.fg(Color::Yellow),
        );
    }
}

fn render_side_panel(frame: &mut Frame, area: Rect, state: &AppState) {
    let (title, lines) = match state.screen {
        Screen::AddForm | Screen::SetForm => form_lines(state),
        Screen::LedgerIdInput => (
            "Configuration",
            vec![
                "Google Sheet ID:".to_string(),
                format!("{}_", state.ledger_id_draft),
                String::new(),
                "Paste the id from the spreadsheet URL".to_string(),
            ],
        ),
        Screen::Leaderboard => ("Team", team_lines(state)),
    };
    let panel = Paragraph::new(lines.join("\n"))
        .block(Block::default().title(title).borders(Borders::ALL))
        .wrap(Wrap { trim: false });
    frame.render_widget(panel, area);
}

fn team_lines(state: &AppState) -> Vec<String> {
    let mut lines = Vec::new();
    match state.selected_team() {
        Some(team) => {
            lines.push(format!("{} ({})", team.team_name, team.trimmed_id()));
            lines.push(format!("Current XP: {}", team.total_xp));
        }
        None => lines.push("No team selected".to_string()),
    }
    lines.push(String::new());
    lines.push("Instructions:".to_string());
    lines.push("1. Enter your Spreadsheet ID (e)".to_string());
    lines.push("2. Select a team".to_string());
    lines.push("3. Add (a) or set (s) XP".to_string());
    lines.push("4. Changes are instant!".to_string());
    lines
}

fn form_lines(state: &AppState) -> (&'static str, Vec<String>) {
    let title = if state.screen == Screen::AddForm {
        "Add XP to Team"
    } else {
        "Set Absolute XP"
    };
    let Some(form) = state.form.as_ref() else {
        return (title, Vec::new());
    };
    let team_id = form.selected_team().unwrap_or("-");
    let name = state.team_name(team_id).unwrap_or("-");
    let current = state
        .current_xp(team_id)
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    let label = if state.screen == Screen::AddForm {
        "XP to Add"
    } else {
        "New XP Value"
    };
    let lines = vec![
        format!("Team: < {team_id} >"),
        format!("{name} | Current XP: {current}"),
        String::new(),
        format!("{label}: {}", form.amount.display()),
        format!(
            "Range {}..{} step {}",
            form.amount.min, form.amount.max, form.amount.step
        ),
        String::new(),
        "Enter to apply, Esc to cancel".to_string(),
    ];
    (title, lines)
}

fn render_console(frame: &mut Frame, area: Rect, state: &AppState) {
    let height = area.height.saturating_sub(2) as usize;
    let start = state.logs.len().saturating_sub(height);
    let text = state
        .logs
        .iter()
        .skip(start)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let console = Paragraph::new(text)
        .block(Block::default().title("Console").borders(Borders::ALL))
        .style(Style::default().fg(Color::Gray));
    frame.render_widget(console, area);
}

fn render_status(frame: &mut Frame, area: Rect, state: &AppState) {
    let Some(status) = state.status.as_ref() else {
        return;
    };
    let style = match status.kind {
        StatusKind::Info => Style::default().fg(Color::Cyan),
        StatusKind::Success => Style::default().fg(Color::Green),
        StatusKind::Error => Style::default().fg(Color::Red),
    };
    frame.render_widget(Paragraph::new(status.text.as_str()).style(style), area);
}

fn render_cell_text(frame: &mut Frame, area: Rect, text: &str, style: Style) {
    let paragraph = Paragraph::new(text.to_string()).style(style);
    frame.render_widget(paragraph, area);
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 60, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "XP Boost Admin - Help",
        "",
        "Leaderboard:",
        "  j/k or ↑/↓   Move selection",
        "  a            Add XP to the selected team",
        "  s            Set absolute XP",
        "  r            Reload from the spreadsheet",
        "  e            Change spreadsheet id",
        "  x            Export leaderboard to xlsx",
        "  ?            Toggle help",
        "  q            Quit",
        "",
        "Forms:",
        "  h/l or ←/→   Pick team",
        "  j/k or ↑/↓   Step amount",
        "  0-9, -, ⌫    Type amount",
        "  Enter / Esc  Apply / cancel",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
