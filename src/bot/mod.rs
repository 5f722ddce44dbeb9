use log::info;

use crate::config::Config;
use crate::error::{BotError, Outcome};

pub mod command;
pub mod telegram;

/// Runs the bot on a fresh tokio runtime, blocking the calling thread until
/// polling ends.
pub fn run_bot(config: &Config) -> Result<Outcome, BotError> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("bot-runtime")
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)?;

    rt.block_on(async {
        let bot = telegram::TelegramBot::new(config);
        info!("[bot] echobot runs");
        bot.run().await
    })
}
