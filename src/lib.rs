pub mod bot;
pub mod config;
pub mod errors;

pub use config::BotConfig;
pub use errors::{AppError, Result};
