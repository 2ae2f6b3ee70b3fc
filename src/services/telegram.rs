use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::commands::{CommandContext, CommandRouter};
use crate::config::Settings;
use crate::error::CapabilityError;
use crate::services::ChatTransport;
use crate::utils::format::{floor_char_boundary, safe_prefix};

const TELEGRAM_MSG_LIMIT: usize = 4096;
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Log a Telegram API call result at debug level
macro_rules! tg {
    ($name:expr, $fut:expr) => {{
        let r = $fut;
        if let Err(e) = &r {
            debug!(call = $name, error = %e, "telegram api call failed");
        }
        r
    }};
}

/// Chat transport backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Self {
        Self { bot: Bot::new(token) }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

/// Telegram chats are addressed by signed integers
fn parse_chat_id(chat_id: &str) -> Result<ChatId, CapabilityError> {
    chat_id
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| CapabilityError::Transport(format!("not a Telegram chat id: {}", chat_id)))
}

/// Split text into chunks that fit one Telegram message, preferring line breaks
fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while remaining.len() > limit {
        let boundary = floor_char_boundary(remaining, limit);
        let cut = remaining[..boundary]
            .rfind('\n')
            .filter(|&i| i > 0)
            .unwrap_or(boundary);
        chunks.push(&remaining[..cut]);
        remaining = remaining[cut..].trim_start_matches('\n');
    }
    if !remaining.is_empty() {
        chunks.push(remaining);
    }
    chunks
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_media(&self, chat_id: &str, file_path: &Path, caption: &str) -> Result<(), CapabilityError> {
        let chat = parse_chat_id(chat_id)?;
        tg!(
            "send_document",
            self.bot
                .send_document(chat, InputFile::file(file_path))
                .caption(safe_prefix(caption, TELEGRAM_CAPTION_LIMIT))
                .await
        )
        .map_err(|e| CapabilityError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), CapabilityError> {
        let chat = parse_chat_id(chat_id)?;
        for chunk in split_message(text, TELEGRAM_MSG_LIMIT) {
            tg!("send_message", self.bot.send_message(chat, chunk).await)
                .map_err(|e| CapabilityError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    fn validate_chat_id(&self, chat_id: &str) -> bool {
        parse_chat_id(chat_id).is_ok()
    }
}

type SharedSettings = Arc<Mutex<Settings>>;

/// Listen for chat messages and route prefix commands until the process is interrupted
pub async fn run_bot(transport: TelegramTransport, router: Arc<CommandRouter>, settings: Settings) {
    let bot = transport.bot();

    // Command autocomplete only applies to Telegram's own "/" prefix
    if router.prefix() == "/" {
        let commands = vec![
            teloxide::types::BotCommand::new("help", "Show help"),
            teloxide::types::BotCommand::new("getchatid", "Show this chat's id"),
            teloxide::types::BotCommand::new("setfolder", "Monitor a drive folder"),
            teloxide::types::BotCommand::new("stopfolder", "Stop monitoring a folder"),
            teloxide::types::BotCommand::new("showfolders", "List folder monitors"),
            teloxide::types::BotCommand::new("pausefolder", "Pause a folder monitor"),
            teloxide::types::BotCommand::new("resumefolder", "Resume a folder monitor"),
            teloxide::types::BotCommand::new("fetchfolder", "Send a folder's latest file now"),
            teloxide::types::BotCommand::new("interval", "Show the check interval"),
            teloxide::types::BotCommand::new("ownerset", "Set this group's owner"),
            teloxide::types::BotCommand::new("ownerreset", "Remove this group's owner"),
        ];
        if let Err(e) = tg!("set_my_commands", bot.set_my_commands(commands).await) {
            println!("  ⚠ Failed to set bot commands: {e}");
        }
    }

    match &settings.bot.owner_id {
        Some(owner_id) => println!("  ✓ Owner: {owner_id}"),
        None => println!("  ⚠ No owner registered, first user will be registered as owner"),
    }
    println!("  ✓ Bot connected, listening for messages");

    let state: SharedSettings = Arc::new(Mutex::new(settings));
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let state = state.clone();
        let router = router.clone();
        let transport = TelegramTransport { bot };
        async move { handle_message(&transport, msg, &state, &router).await }
    })
    .await;
}

/// Imprint the owner, then hand prefix commands to the router
async fn handle_message(
    transport: &TelegramTransport,
    msg: Message,
    state: &SharedSettings,
    router: &CommandRouter,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    // No user info (e.g. channel post)
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let uid = user.id.0.to_string();
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    let user_name = format!("{}({})", user.first_name, uid);

    let is_owner = {
        let mut settings = state.lock().await;
        match settings.bot.owner_id.clone() {
            Some(owner_id) => owner_id == uid,
            None => {
                settings.bot.owner_id = Some(uid.clone());
                if let Err(e) = settings.save() {
                    warn!(error = %e, "failed to save owner registration");
                }
                println!("  [{timestamp}] ★ Owner registered: {user_name}");
                true
            }
        }
    };

    let chat_id = msg.chat.id.0.to_string();
    let ctx = CommandContext {
        chat_id: &chat_id,
        sender_id: &uid,
        is_owner,
        is_group: matches!(msg.chat.kind, teloxide::types::ChatKind::Public(_)),
    };
    let Some(reply) = router.dispatch(ctx, text).await else {
        return Ok(());
    };
    println!("  [{timestamp}] ◀ [{user_name}] {}", safe_prefix(text, 60));

    if let Err(e) = transport.send_text(&chat_id, &reply).await {
        println!("  [{timestamp}] ⚠ Reply failed: {e}");
    }
    Ok(())
}
