//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static THINKING: Emoji<'_, '_> = Emoji("💭 ", "..");

pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");
pub static FILE_MOD: Emoji<'_, '_> = Emoji("📝 ", "~");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "[PKG]");
pub static COMMAND: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
