use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;

use xpboost_admin::config::{self, AppConfig};
use xpboost_admin::credential::ServiceAccountKey;
use xpboost_admin::diagnostic::{CheckStatus, DiagnosticEnv, run_diagnostic};
use xpboost_admin::error::LedgerResult;
use xpboost_admin::ledger::LedgerService;
use xpboost_admin::logging;
use xpboost_admin::sheets;

struct ConsoleEnv {
    credential_path: PathBuf,
    ledger_id_arg: Option<String>,
}

impl DiagnosticEnv for ConsoleEnv {
    fn credential_location(&self) -> String {
        self.credential_path.display().to_string()
    }

    fn read_credential(&self) -> io::Result<Option<String>> {
        if !self.credential_path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.credential_path).map(Some)
    }

    fn connect(&self, key: &ServiceAccountKey) -> LedgerResult<Box<dyn LedgerService>> {
        let conn = sheets::connect(key)?;
        Ok(Box::new(conn))
    }

    fn ledger_id(&mut self) -> Option<String> {
        if let Some(id) = self.ledger_id_arg.take() {
            return Some(id);
        }
        print!("   Enter your Spreadsheet ID: ");
        io::stdout().flush().ok()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        Some(line.trim().to_string())
    }
}

fn main() -> Result<()> {
    config::load_env_files();
    logging::init_stderr();
    let config = AppConfig::from_env();

    let mut env = ConsoleEnv {
        credential_path: parse_path_arg("--credentials").unwrap_or(config.credential_path),
        ledger_id_arg: parse_string_arg("--id"),
    };

    println!("Debugging Google Sheets connection\n");
    println!("{}", "=".repeat(60));

    let mut step = 0usize;
    let report = run_diagnostic(&mut env, |result| {
        step += 1;
        println!("\n{step}. {}", result.id.label());
        let marker = match result.status {
            CheckStatus::Pass => "OK  ",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fatal => "ERR ",
        };
        for (idx, line) in result.lines.iter().enumerate() {
            if idx == 0 {
                println!("   [{marker}] {line}");
            } else {
                println!("          {line}");
            }
        }
    });

    println!("\n{}", "=".repeat(60));
    if report.passed() {
        println!("All checks completed.");
        Ok(())
    } else {
        let failed = report
            .fatal()
            .map(|r| r.id.label())
            .unwrap_or("unknown check");
        Err(anyhow::anyhow!("diagnostic stopped at '{failed}'"))
    }
}

fn parse_string_arg(flag: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    parse_string_arg(flag).map(PathBuf::from)
}
