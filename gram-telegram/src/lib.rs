//! Telegram delivery for gitgram.
//!
//! [`TelegramBot`] is a thin Bot API client; [`Notifier`] is the delivery
//! path that owns chat registrations and routes pipeline updates through the
//! coalescing store; [`BotFrontend`] answers inbound bot commands.

mod bot;
mod error;
mod notifier;
mod update;

pub use bot::{BotCommand, BotProfile, TelegramBot};
pub use error::{Result, TelegramError};
pub use notifier::Notifier;
pub use update::{BotFrontend, UpdateProcessor};

pub const BOT_COMMANDS: [BotCommand; 3] = [
    BotCommand {
        command: "start",
        description: "Start the bot",
    },
    BotCommand {
        command: "help",
        description: "Show help information",
    },
    BotCommand {
        command: "webhook",
        description: "Get your unique webhook URL",
    },
];
