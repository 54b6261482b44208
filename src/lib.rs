pub mod config;
pub mod credential;
pub mod diagnostic;
pub mod error;
pub mod export;
pub mod http_client;
pub mod ledger;
pub mod logging;
pub mod public_board;
pub mod sheets;
pub mod state;
pub mod xp_update;
