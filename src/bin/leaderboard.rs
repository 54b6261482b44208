use anyhow::{Context, Result};

use xpboost_admin::config::{self, AppConfig};
use xpboost_admin::logging;
use xpboost_admin::public_board::{BoardSource, fetch_public_board};

fn main() -> Result<()> {
    config::load_env_files();
    logging::init_stderr();
    let config = AppConfig::from_env();

    let board = fetch_public_board(&config.public_board()).context("fetch leaderboard")?;
    let source = match board.source {
        BoardSource::SheetsApi => "sheets api",
        BoardSource::PublishedCsv => "published csv",
    };

    println!("Leaderboard ({} teams, via {source})", board.teams.len());
    println!("{:>4}  {:<10}  {:<28}  {:>9}", "Rank", "Team ID", "Team Name", "Total XP");
    for (idx, team) in board.ranked().into_iter().enumerate() {
        println!(
            "{:>4}  {:<10}  {:<28}  {:>9}",
            idx + 1,
            team.team_id,
            team.team_name,
            team.total_xp
        );
    }
    Ok(())
}
