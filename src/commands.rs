//! Prefix-triggered operator commands for managing folder monitors.
//!
//! Parsing and replies are transport-agnostic: the chat adapter passes the
//! raw message text plus a [`CommandContext`] and sends back whatever reply
//! string it receives.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{info, warn};

use crate::autofetch::FolderMonitor;
use crate::error::MappingError;
use crate::owners::GroupOwners;
use crate::services::ChatTransport;
use crate::utils::format::format_interval;

/// Who sent a command and where
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub chat_id: &'a str,
    pub sender_id: &'a str,
    /// Sender is the bot owner
    pub is_owner: bool,
    pub is_group: bool,
}

/// How much of the monitor set a sender may manage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    None,
    /// Only mappings delivering to the current group
    Group,
    All,
}

/// Cached folder id pattern
fn folder_id_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("Invalid folder id regex pattern"))
}

/// Cached chat address patterns: personal, group, linked device, numeric
fn chat_id_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(\d+@c\.us|\d+-\d+@g\.us|\d+@g\.us|\d+@lid|-?\d+)$").expect("Invalid chat id regex pattern")
    })
}

pub fn is_valid_folder_id(folder_id: &str) -> bool {
    folder_id_regex().is_match(folder_id)
}

/// Cached user id patterns: personal address, linked device, numeric
fn user_id_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^(\d+@c\.us|\d+@lid|\d+)$").expect("Invalid user id regex pattern"))
}

pub fn is_valid_chat_id(chat_id: &str) -> bool {
    chat_id_regex().is_match(chat_id)
}

pub fn is_valid_user_id(user_id: &str) -> bool {
    user_id_regex().is_match(user_id)
}

/// Split `<prefix><name>[@bot] args...` into a lowercase name and its arguments.
/// Returns None when the text is not a command.
pub fn parse_command(prefix: &str, text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let raw_name = parts.next()?;
    // "/cmd@mybot" -> "cmd"
    let name = raw_name.split('@').next().unwrap_or(raw_name).to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, parts.map(String::from).collect()))
}

/// Executes operator commands against the folder monitor
pub struct CommandRouter {
    prefix: String,
    bot_name: String,
    monitor: FolderMonitor,
    transport: Arc<dyn ChatTransport>,
    owners: Arc<GroupOwners>,
}

impl CommandRouter {
    pub fn new(
        prefix: impl Into<String>,
        bot_name: impl Into<String>,
        monitor: FolderMonitor,
        transport: Arc<dyn ChatTransport>,
        owners: Arc<GroupOwners>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            bot_name: bot_name.into(),
            monitor,
            transport,
            owners,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn access(&self, ctx: CommandContext<'_>) -> Access {
        if ctx.is_owner {
            Access::All
        } else if ctx.is_group && self.owners.is_owner(ctx.chat_id, ctx.sender_id) {
            Access::Group
        } else {
            Access::None
        }
    }

    /// Handle one incoming message. Returns the reply, or None if the text is not a command.
    pub async fn dispatch(&self, ctx: CommandContext<'_>, text: &str) -> Option<String> {
        let (name, args) = parse_command(&self.prefix, text)?;
        info!(command = %name, sender = ctx.sender_id, chat_id = ctx.chat_id, "command received");
        let access = self.access(ctx);

        let reply = match name.as_str() {
            "help" => self.help(),
            "getchatid" => format!(
                "💬 Chat ID: {}\n\nUse it with {}setfolder <folderId> <chatId> [nickname]",
                ctx.chat_id, self.prefix
            ),
            "interval" => format!(
                "⏱️ Check interval: {}\n🔁 Monitors pause after {} consecutive failed checks",
                format_interval(self.monitor.check_interval()),
                self.monitor.max_retries()
            ),
            "ownerset" | "ownerreset" if !ctx.is_owner => "❌ Only the bot owner can manage group owners!".to_string(),
            "ownerset" | "ownerreset" if !ctx.is_group => "❌ This command can only be used in groups!".to_string(),
            "ownerset" => self.owner_set(ctx, &args),
            "ownerreset" => self.owner_reset(ctx, &args),
            "setfolder" | "stopfolder" | "showfolders" | "pausefolder" | "resumefolder" | "fetchfolder"
                if access == Access::None =>
            {
                "❌ Only the bot owner or this group's owner can manage folder monitors!".to_string()
            }
            "setfolder" => self.set_folder(ctx, access, &args).await,
            "stopfolder" => self.stop_folder(ctx, access, &args).await,
            "showfolders" => self.show_folders(),
            "pausefolder" => self.toggle_folder(ctx, access, &args, false).await,
            "resumefolder" => self.toggle_folder(ctx, access, &args, true).await,
            "fetchfolder" => self.fetch_folder(ctx, access, &args).await,
            _ => format!("❓ Unknown command. Use {}help to see available commands", self.prefix),
        };
        Some(reply)
    }

    fn help(&self) -> String {
        let p = &self.prefix;
        format!(
            "🤖 {name}\n\
             Watches drive folders and delivers new spreadsheets to chats.\n\n\
             General\n\
             {p}help - Show this help\n\
             {p}getchatid - Show the current chat id\n\
             {p}interval - Show the folder check interval\n\n\
             Folder monitors (bot or group owner)\n\
             {p}setfolder <folderId> [chatId|here] [nickname] - Start monitoring a folder\n\
             {p}stopfolder <folderId|nickname> - Stop and remove a monitor\n\
             {p}showfolders - List all monitors\n\
             {p}pausefolder <folderId|nickname> - Pause a monitor\n\
             {p}resumefolder <folderId|nickname> - Resume a paused monitor\n\
             {p}fetchfolder <folderId|nickname> - Send the latest file now\n\n\
             Group owners (bot owner, in a group)\n\
             {p}ownerset <userId> - Let a user manage this group's monitors\n\
             {p}ownerreset [confirm] - Remove this group's owner",
            name = self.bot_name,
        )
    }

    /// Resolve `identifier` to a folder id the sender may act on
    fn target_folder(&self, ctx: CommandContext<'_>, access: Access, identifier: &str) -> Result<String, String> {
        let folder_id = self
            .monitor
            .resolve_folder(identifier)
            .unwrap_or_else(|| identifier.to_string());
        if access == Access::Group {
            let delivers_here = self
                .monitor
                .mapping(&folder_id)
                .is_some_and(|mapping| mapping.chat_id == ctx.chat_id);
            if !delivers_here {
                return Err("❌ Group owners can only manage monitors that deliver to this group!".to_string());
            }
        }
        Ok(folder_id)
    }

    async fn set_folder(&self, ctx: CommandContext<'_>, access: Access, args: &[String]) -> String {
        let Some(folder_id) = args.first() else {
            return format!(
                "❌ Usage: {p}setfolder <folderId> [chatId|here] [nickname]\n\n\
                 Example: {p}setfolder 1BxiMVs0XRA5nFMdKvBdBZjg 1234567890@c.us reports",
                p = self.prefix
            );
        };
        if !is_valid_folder_id(folder_id) {
            return "❌ Invalid folder id! Use letters, digits, '-' or '_' (up to 64 characters).".to_string();
        }
        let chat_id = match args.get(1).map(String::as_str) {
            None | Some("here") => ctx.chat_id,
            Some(chat_id) => chat_id,
        };
        if !is_valid_chat_id(chat_id) {
            return "❌ Invalid chat id format!\n\n\
                    Expected formats:\n\
                    • 1234567890@c.us (personal)\n\
                    • 1234567890-1234567890@g.us (group)\n\
                    • -1001234567890 (numeric)"
                .to_string();
        }
        if !self.transport.validate_chat_id(chat_id) {
            return format!(
                "❌ This chat id cannot receive files through the current chat service: {}\n\n\
                 💡 Use {}getchatid in the destination chat to get its id.",
                chat_id, self.prefix
            );
        }
        if access == Access::Group && chat_id != ctx.chat_id {
            return "❌ Group owners can only set up monitors that deliver to this group!".to_string();
        }
        let nickname = args.get(2).map(String::as_str);

        match self.monitor.add_mapping(folder_id, chat_id, nickname).await {
            Ok(mapping) => format!(
                "✅ Auto-Fetch Setup Complete!\n\n\
                 📁 Folder ID: {}\n\
                 💬 Chat ID: {}\n\
                 🏷️ Nickname: {}\n\
                 ⏱️ Check Interval: {}\n\n\
                 The latest spreadsheet will be sent shortly, then every new one as it appears.\n\
                 💡 Use {}showfolders to see all monitors",
                mapping.folder_id,
                mapping.chat_id,
                mapping.nickname,
                format_interval(self.monitor.check_interval()),
                self.prefix,
            ),
            Err(e) => failure_reply("Failed to set up auto-fetch", &e),
        }
    }

    async fn stop_folder(&self, ctx: CommandContext<'_>, access: Access, args: &[String]) -> String {
        let Some(identifier) = args.first() else {
            return format!("❌ Usage: {}stopfolder <folderId|nickname>", self.prefix);
        };
        let folder_id = match self.target_folder(ctx, access, identifier) {
            Ok(folder_id) => folder_id,
            Err(reply) => return reply,
        };
        match self.monitor.remove_mapping(&folder_id).await {
            Ok(mapping) => format!(
                "✅ Auto-Fetch Stopped\n\n\
                 📁 Folder: {}\n\
                 💬 Chat: {}\n\n\
                 💡 Use {}showfolders to see remaining monitors",
                mapping.nickname, mapping.chat_id, self.prefix
            ),
            Err(e) => failure_reply("Failed to stop monitoring", &e),
        }
    }

    fn show_folders(&self) -> String {
        let storage = if self.monitor.storage_available() {
            "✅ Configured"
        } else {
            "❌ Not Configured"
        };
        format!("{}\n📂 Drive: {}", self.monitor.format_mapping_list(), storage)
    }

    async fn toggle_folder(&self, ctx: CommandContext<'_>, access: Access, args: &[String], active: bool) -> String {
        let verb = if active { "resumefolder" } else { "pausefolder" };
        let Some(identifier) = args.first() else {
            return format!("❌ Usage: {}{} <folderId|nickname>", self.prefix, verb);
        };
        let folder_id = match self.target_folder(ctx, access, identifier) {
            Ok(folder_id) => folder_id,
            Err(reply) => return reply,
        };
        match self.monitor.toggle_monitoring(&folder_id, active).await {
            Ok(mapping) if active => format!("▶️ Monitoring resumed for {}", mapping.nickname),
            Ok(mapping) => format!("⏸️ Monitoring paused for {}", mapping.nickname),
            Err(e) => failure_reply("Failed to update monitor", &e),
        }
    }

    async fn fetch_folder(&self, ctx: CommandContext<'_>, access: Access, args: &[String]) -> String {
        let Some(identifier) = args.first() else {
            return format!("❌ Usage: {}fetchfolder <folderId|nickname>", self.prefix);
        };
        let folder_id = match self.target_folder(ctx, access, identifier) {
            Ok(folder_id) => folder_id,
            Err(reply) => return reply,
        };
        match self.monitor.fetch_latest(&folder_id).await {
            Ok(Some(file)) => format!("📤 Sent the latest file: {}", file.name),
            Ok(None) => format!("📭 No spreadsheets found in folder {}", folder_id),
            Err(e) => failure_reply("Failed to fetch the latest file", &e),
        }
    }

    fn owner_set(&self, ctx: CommandContext<'_>, args: &[String]) -> String {
        let Some(user_id) = args.first() else {
            return format!(
                "❌ Usage: {p}ownerset <userId>\n\nExample: {p}ownerset 1234567890",
                p = self.prefix
            );
        };
        if !is_valid_user_id(user_id) {
            return "❌ Invalid user id format!\n\n\
                    Expected formats:\n\
                    • 1234567890@c.us\n\
                    • 1234567890"
                .to_string();
        }
        if self.owners.is_owner(ctx.chat_id, user_id) {
            return format!("ℹ️ {} is already the group owner!", user_id);
        }
        match self.owners.set_owner(ctx.chat_id, user_id) {
            Ok(previous) => {
                let mut reply = format!(
                    "👑 Group Owner Set Successfully!\n\n\
                     👤 Owner: {}\n\
                     💬 Group: {}\n\n\
                     They can now manage folder monitors that deliver to this group.",
                    user_id, ctx.chat_id
                );
                if let Some(previous) = previous {
                    reply.push_str(&format!("\n\n🔄 Previous owner {} was removed.", previous));
                }
                reply
            }
            Err(e) => {
                warn!(group_id = ctx.chat_id, error = %e, "failed to save group owner");
                "❌ Failed to set group owner. Please try again later.".to_string()
            }
        }
    }

    fn owner_reset(&self, ctx: CommandContext<'_>, args: &[String]) -> String {
        let Some(current) = self.owners.owner_of(ctx.chat_id) else {
            return "❌ No group owner is currently set for this group!".to_string();
        };
        if !args.first().is_some_and(|arg| arg.eq_ignore_ascii_case("confirm")) {
            return format!(
                "⚠️ Remove {} as owner of this group?\n\n\
                 Send {}ownerreset confirm to proceed.",
                current, self.prefix
            );
        }
        match self.owners.remove_owner(ctx.chat_id) {
            Ok(_) => format!("✅ Group owner {} removed.", current),
            Err(e) => {
                warn!(group_id = ctx.chat_id, error = %e, "failed to save group owner removal");
                "❌ Failed to reset group owner. Please try again later.".to_string()
            }
        }
    }
}

fn failure_reply(action: &str, err: &MappingError) -> String {
    format!("❌ {}: {}\n\n💡 {}", action, err, err.remediation())
}
