use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use teloxide::dispatching::ShutdownToken;
use teloxide::error_handlers::ErrorHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use teloxide::{ApiError, RequestError};

use crate::bot::command::{Replies, schema};
use crate::config::Config;
use crate::error::{BotError, Outcome};

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TelegramBot {
    bot: Bot,
    replies: Arc<Replies>,
    drop_webhook: bool,
}

impl TelegramBot {
    pub fn new(config: &Config) -> Self {
        TelegramBot {
            bot: Bot::new(&config.token),
            replies: Arc::new(Replies {
                echo_prefix: config.echo_prefix.clone(),
            }),
            drop_webhook: config.drop_webhook,
        }
    }

    pub async fn run(&self) -> Result<Outcome, BotError> {
        let me = self.bot.get_me().await.context("get_me failed, is TOKEN valid?")?;
        info!(
            "[bot] authorized as @{}",
            me.username.as_deref().unwrap_or("unknown")
        );

        if self.drop_webhook {
            self.clear_webhook().await;
        }

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), schema())
            .dependencies(dptree::deps![self.replies.clone()])
            .default_handler(|upd| async move {
                debug!("[bot] unhandled update {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "[bot] an error from the update handler",
            ))
            .enable_ctrlc_handler()
            .build();

        let conflict = Arc::new(ConflictWatch::new(dispatcher.shutdown_token()));
        let listener = Polling::builder(self.bot.clone())
            .timeout(POLL_TIMEOUT)
            .build();

        info!("[bot] polling for updates");
        dispatcher
            .dispatch_with_listener(listener, conflict.clone())
            .await;

        if conflict.detected() {
            warn!("[bot] stopped: another instance is polling with this token");
            Ok(Outcome::Conflicted)
        } else {
            info!("[bot] stopped");
            Ok(Outcome::Stopped)
        }
    }

    async fn clear_webhook(&self) {
        info!("[bot] clearing webhook (if any)");
        if let Err(e) = self.bot.delete_webhook().await {
            warn!("[bot] failed to delete webhook: {} (continuing anyway)", e);
        }
    }
}

/// Listener error handler that stops dispatching once Telegram reports a
/// second `getUpdates` consumer for our token.
pub struct ConflictWatch {
    token: ShutdownToken,
    detected: AtomicBool,
}

impl ConflictWatch {
    pub fn new(token: ShutdownToken) -> Self {
        ConflictWatch {
            token,
            detected: AtomicBool::new(false),
        }
    }

    pub fn detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }
}

impl ErrorHandler<RequestError> for ConflictWatch {
    fn handle_error(self: Arc<Self>, error: RequestError) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !is_conflict(&error) {
                error!("[bot] polling error: {}", error);
                return;
            }
            if self.detected.swap(true, Ordering::SeqCst) {
                return;
            }
            error!("[bot] conflict: {}", error);
            // the returned future only waits for completion; dropping it is fine
            if self.token.shutdown().is_err() {
                warn!("[bot] dispatcher was idle when the conflict arrived");
            }
        })
    }
}

pub fn is_conflict(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_conflict() {
        let err = RequestError::Api(ApiError::TerminatedByOtherGetUpdates);
        assert!(is_conflict(&err));
    }

    #[test]
    fn other_errors_are_not_conflicts() {
        assert!(!is_conflict(&RequestError::Api(ApiError::InvalidToken)));
        assert!(!is_conflict(&RequestError::Api(ApiError::BotBlocked)));
    }

    #[tokio::test]
    async fn conflict_is_recorded_once_and_idle_dispatcher_is_tolerated() {
        let dispatcher = Dispatcher::builder(Bot::new("1:a"), schema()).build();
        let watch = Arc::new(ConflictWatch::new(dispatcher.shutdown_token()));

        watch
            .clone()
            .handle_error(RequestError::Api(ApiError::BotBlocked))
            .await;
        assert!(!watch.detected());

        for _ in 0..2 {
            watch
                .clone()
                .handle_error(RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
                .await;
        }
        assert!(watch.detected());
    }

    #[test]
    fn bot_takes_settings_from_config() {
        let config = Config {
            token: "123:abc".to_string(),
            env_file: ".env".into(),
            single_instance: true,
            drop_webhook: false,
            echo_prefix: Some("> ".to_string()),
        };
        let bot = TelegramBot::new(&config);
        assert_eq!(bot.bot.token(), "123:abc");
        assert!(!bot.drop_webhook);
        assert_eq!(bot.replies.echo_prefix.as_deref(), Some("> "));
    }
}
