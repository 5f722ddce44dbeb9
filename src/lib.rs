// basic
pub mod config;
pub mod error;

// startup checks
pub mod instance;

// telegram side
pub mod bot;

pub use config::Config;
pub use error::{BotError, Outcome};
