use std::sync::Arc;

use log::info;
use teloxide::dispatching::UpdateHandler;
use teloxide::types::{MessageEntityKind, ParseMode, User, UserId};
use teloxide::utils::markdown;
use teloxide::{RequestError, prelude::*, utils::command::BotCommands};

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
#[derive(Debug)]
pub enum Command {
    #[command(description = "say hello.")]
    Start,
    #[command(description = "display this text.")]
    Help,
}

/// Reply settings shared read-only by every handler invocation.
#[derive(Debug, Clone, Default)]
pub struct Replies {
    pub echo_prefix: Option<String>,
}

pub fn schema() -> UpdateHandler<RequestError> {
    Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(answer))
        .branch(dptree::filter_map(echo_text_of).endpoint(echo))
}

pub async fn answer(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    info!("[bot] {:?} from chat {}", cmd, msg.chat.id);
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, start_text(msg.from.as_ref()))
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, help_text()).await?;
        }
    };

    Ok(())
}

pub async fn echo(
    bot: Bot,
    msg: Message,
    text: String,
    replies: Arc<Replies>,
) -> ResponseResult<()> {
    info!("[bot] echo {} chars to chat {}", text.chars().count(), msg.chat.id);
    bot.send_message(msg.chat.id, echo_text(&text, replies.echo_prefix.as_deref()))
        .await?;
    Ok(())
}

/// MarkdownV2 greeting mentioning `user`, or a generic one without a name.
pub fn start_text(user: Option<&User>) -> String {
    match user {
        Some(user) => greeting(user.id, &user.full_name()),
        None => greeting(UserId(0), ""),
    }
}

pub fn greeting(user_id: UserId, name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return "Hi there\\!".to_string();
    }
    format!("Hi {}\\!", markdown::user_mention(user_id, &markdown::escape(name)))
}

pub fn help_text() -> String {
    Command::descriptions().to_string()
}

pub fn echo_text(text: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{text}"),
        None => text.to_string(),
    }
}

/// Text to echo back: plain text messages only. Messages without text and
/// messages opening with a bot command are left alone.
pub fn echo_text_of(msg: Message) -> Option<String> {
    if starts_with_command(&msg) {
        return None;
    }
    msg.text().map(str::to_owned)
}

pub fn starts_with_command(msg: &Message) -> bool {
    msg.entities().is_some_and(|entities| {
        entities
            .iter()
            .any(|e| e.offset == 0 && matches!(e.kind, MessageEntityKind::BotCommand))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn greeting_mentions_the_user() {
        let text = greeting(UserId(42), "Ana Souza");
        assert!(text.starts_with("Hi "));
        assert!(text.contains("Ana Souza"));
        assert!(text.contains("tg://user?id=42"));
        assert!(text.ends_with("\\!"));
    }

    #[test]
    fn greeting_escapes_markdown_in_names() {
        let text = greeting(UserId(7), "a_b*c");
        assert!(text.contains("a\\_b\\*c"));
    }

    #[test]
    fn greeting_without_name_falls_back() {
        assert_eq!(greeting(UserId(42), ""), "Hi there\\!");
        assert_eq!(greeting(UserId(42), "   "), "Hi there\\!");
        assert_eq!(start_text(None), "Hi there\\!");
    }

    #[test]
    fn help_is_constant() {
        let first = help_text();
        let second = help_text();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert!(first.starts_with("These commands are supported:"));
        assert!(first.contains("/start"));
        assert!(first.contains("/help"));
    }

    #[test]
    fn echo_returns_the_text() {
        assert_eq!(echo_text("hello", None), "hello");
        assert!(echo_text("hello", Some("You said: ")).contains("hello"));
        assert_eq!(echo_text("hello", Some("You said: ")), "You said: hello");
    }

    fn message(content: serde_json::Value) -> Message {
        let mut value = json!({
            "message_id": 1,
            "date": 1706529600,
            "chat": {"id": 123, "type": "private", "first_name": "Ana"},
            "from": {"id": 123, "is_bot": false, "first_name": "Ana"}
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), content.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn plain_text_is_echoed() {
        let msg = message(json!({"text": "hello"}));
        assert_eq!(echo_text_of(msg).as_deref(), Some("hello"));
    }

    #[test]
    fn messages_without_text_are_skipped() {
        let msg = message(json!({"location": {"latitude": 38.7, "longitude": -9.1}}));
        assert!(msg.text().is_none());
        assert_eq!(echo_text_of(msg), None);
    }

    #[test]
    fn commands_are_not_echoed() {
        let start = message(json!({
            "text": "/start",
            "entities": [{"type": "bot_command", "offset": 0, "length": 6}]
        }));
        assert!(starts_with_command(&start));
        assert_eq!(echo_text_of(start), None);

        let unknown = message(json!({
            "text": "/unknown arg",
            "entities": [{"type": "bot_command", "offset": 0, "length": 8}]
        }));
        assert_eq!(echo_text_of(unknown), None);
    }

    #[test]
    fn slash_without_command_entity_is_echoed() {
        let msg = message(json!({"text": "/ hi"}));
        assert!(!starts_with_command(&msg));
        assert_eq!(echo_text_of(msg).as_deref(), Some("/ hi"));

        let later = message(json!({
            "text": "hello /start",
            "entities": [{"type": "bot_command", "offset": 6, "length": 6}]
        }));
        assert_eq!(echo_text_of(later).as_deref(), Some("hello /start"));
    }

    #[test]
    fn commands_parse() {
        assert!(matches!(Command::parse("/start", "echobot"), Ok(Command::Start)));
        assert!(matches!(Command::parse("/help@echobot", "echobot"), Ok(Command::Help)));
        assert!(Command::parse("/echo", "echobot").is_err());
    }
}
