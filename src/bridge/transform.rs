//! Message text transforms.
//!
//! - Game -> Discord: markdown escaping and @mention substitution
//! - Discord -> game: markup tag stripping
//! - Channel labels

use std::collections::BTreeMap;
use std::sync::LazyLock;

use fancy_regex::Regex;
use tracing::warn;

use crate::common::ChannelIdentity;

/// Characters Discord interprets as markdown or mention syntax.
const MARKDOWN_CHARS: &[char] = &['\\', '*', '_', '~', '`', '|', '>', '<', '#', '[', ']'];

/// Tag-like spans such as `<b>` or `<color=#fff>`.
static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("tag pattern is valid"));

/// Label for a BitCraft channel id.
pub fn channel_name(channel_id: i32) -> String {
    ChannelIdentity::from_id(channel_id).to_string()
}

/// Escape game text so it renders literally in Discord.
///
/// `@everyone` and `@here` are broken up with a zero-width space.
pub fn sanitize_outbound(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if MARKDOWN_CHARS.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
        .replace("@everyone", "@\u{200B}everyone")
        .replace("@here", "@\u{200B}here")
}

/// Strip markup from Discord text before it goes into the game.
pub fn sanitize_inbound(text: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(text, "").to_string();

    if stripped.contains('<') && stripped.contains('>') {
        stripped.chars().filter(|c| *c != '<' && *c != '>').collect()
    } else {
        stripped
    }
}

/// Replace known in-game names with Discord mentions.
pub fn resolve_mentions(text: &str, mentions: &MentionTable) -> String {
    mentions.resolve(text)
}

/// Case-insensitive whole-word name -> Discord user mapping.
///
/// Matches text that already went through `sanitize_outbound`, so names
/// are escaped the same way and an escaped `\_` still counts as part of
/// the surrounding word. Entries apply in name order; a later entry can
/// rewrite text produced by an earlier one when names overlap.
#[derive(Debug, Clone, Default)]
pub struct MentionTable {
    entries: Vec<MentionEntry>,
}

#[derive(Debug, Clone)]
struct MentionEntry {
    pattern: Regex,
    mention: String,
}

impl MentionTable {
    /// Build the table from `name -> user id` pairs.
    ///
    /// Empty names are logged and skipped.
    pub fn new(mentions: &BTreeMap<String, String>) -> Self {
        let entries = mentions
            .iter()
            .filter_map(|(name, user_id)| {
                let name = name.trim();
                if name.is_empty() {
                    warn!("Ignoring mention with empty name for user {}", user_id);
                    return None;
                }
                let escaped = sanitize_outbound(name);
                let source = format!(
                    r"(?i)(?<!\w){}(?!\w|\\_)",
                    fancy_regex::escape(&escaped)
                );
                match Regex::new(&source) {
                    Ok(pattern) => Some(MentionEntry {
                        pattern,
                        mention: format!("<@{}>", user_id.trim()),
                    }),
                    Err(e) => {
                        warn!("Invalid mention name '{}': {}", name, e);
                        None
                    }
                }
            })
            .collect();

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn resolve(&self, text: &str) -> String {
        let mut result = text.to_string();
        for entry in &self.entries {
            result = entry
                .pattern
                .replace_all(&result, |_: &fancy_regex::Captures| entry.mention.clone())
                .to_string();
        }
        result
    }
}
