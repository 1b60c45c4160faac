//! User-agent classification for LLM bot traffic.
//!
//! Maps known bot name substrings to their provider and traffic category.
//! The engine core treats `provider` opaquely; this table exists for
//! drivers whose input records do not already carry a provider label.
//!
//! bingbot is a search-engine crawler, not Copilot user traffic; it
//! classifies as `Other` and the default exclusion set drops Microsoft
//! from optimization.

use crate::types::{BotCategory, Provider};

/// Known bot user-agent substrings with their provider and category.
const BOT_CLASSIFICATION: &[(&str, &str, BotCategory)] = &[
    // OpenAI
    ("GPTBot", "OpenAI", BotCategory::Crawler),
    ("ChatGPT-User", "OpenAI", BotCategory::UserRequest),
    ("OAI-SearchBot", "OpenAI", BotCategory::UserRequest),
    // Anthropic
    ("ClaudeBot", "Anthropic", BotCategory::Crawler),
    ("Claude-User", "Anthropic", BotCategory::UserRequest),
    ("Claude-SearchBot", "Anthropic", BotCategory::UserRequest),
    // Google
    ("Google-Extended", "Google", BotCategory::Crawler),
    // Perplexity
    ("PerplexityBot", "Perplexity", BotCategory::UserRequest),
    // Apple
    ("Applebot-Extended", "Apple", BotCategory::Crawler),
    // Microsoft
    ("bingbot", "Microsoft", BotCategory::Other),
];

/// Classify a raw user-agent string.
///
/// Longest matching bot name wins, so `Claude-SearchBot` is not shadowed
/// by a shorter overlapping pattern. Unknown agents classify as
/// `Other`/`Other`.
pub fn classify_user_agent(user_agent: &str) -> (Provider, BotCategory) {
    let mut best: Option<(&str, &str, BotCategory)> = None;
    for &(pattern, provider, category) in BOT_CLASSIFICATION {
        if user_agent.contains(pattern) {
            let replace = match best {
                Some((current, _, _)) => pattern.len() > current.len(),
                None => true,
            };
            if replace {
                best = Some((pattern, provider, category));
            }
        }
    }

    match best {
        Some((_, provider, category)) => (Provider::from(provider), category),
        None => (Provider::from("Other"), BotCategory::Other),
    }
}

/// All bot name patterns the classifier recognizes.
pub fn known_bot_names() -> impl Iterator<Item = &'static str> {
    BOT_CLASSIFICATION.iter().map(|&(pattern, _, _)| pattern)
}
