//! Telegram I/O: the outbound signal sink and the inbound read-only
//! command handler.

pub mod client;
pub mod commands;
pub mod error;

pub use client::{TelegramClient, TelegramConfig};
pub use commands::{CommandContext, CommandHandler};
pub use error::{TelegramError, TelegramResult};
