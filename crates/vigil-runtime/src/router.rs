//! Deterministic intent router. High-confidence patterns map straight to a
//! tool invocation, returning its output as the reply with no LLM call, so
//! the model cannot hallucinate an answer it never generates.

use serde_json::{json, Value};

/// A routed intent and the tool invocation it maps to.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedIntent {
    DateTime,
    WalletAddress,
    WalletBalance,
    ScheduleReminder { minutes: u64, prompt: String },
    ListReminders,
    CancelReminder { id: String },
    SocialPost { text: String },
    SocialMentions,
}

impl RoutedIntent {
    /// The tool name + arguments this intent invokes.
    pub fn invocation(&self) -> (&'static str, Value) {
        match self {
            RoutedIntent::DateTime => ("get_datetime", json!({})),
            RoutedIntent::WalletAddress => ("wallet_address", json!({})),
            RoutedIntent::WalletBalance => ("wallet_balance", json!({})),
            RoutedIntent::ScheduleReminder { minutes, prompt } => (
                "schedule_reminder",
                json!({ "minutes": minutes, "prompt": prompt }),
            ),
            RoutedIntent::ListReminders => ("list_reminders", json!({})),
            RoutedIntent::CancelReminder { id } => ("cancel_reminder", json!({ "id": id })),
            RoutedIntent::SocialPost { text } => ("social_post", json!({ "text": text })),
            RoutedIntent::SocialMentions => ("social_mentions", json!({})),
        }
    }
}

/// Match the user text against the high-confidence patterns. Returns `None`
/// for anything ambiguous; the full agent loop handles those.
pub fn route(text: &str) -> Option<RoutedIntent> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    // Date/time.
    if ["what time is it", "what's the time", "current time", "what day is it", "today's date", "what's the date", "what date is it"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(RoutedIntent::DateTime);
    }

    // Wallet.
    if ["wallet address", "your address", "deposit address"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(RoutedIntent::WalletAddress);
    }
    if lower.contains("balance")
        && ["wallet", "your", "my"].iter().any(|p| lower.contains(p))
    {
        return Some(RoutedIntent::WalletBalance);
    }
    if lower.contains("how much eth") || lower.contains("how much money do you have") {
        return Some(RoutedIntent::WalletBalance);
    }

    // Scheduler verbs.
    if let Some(intent) = parse_remind_me(&lower, trimmed) {
        return Some(intent);
    }
    if ["list reminders", "show reminders", "what reminders", "pending reminders"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(RoutedIntent::ListReminders);
    }
    if let Some(rest) = lower.strip_prefix("cancel reminder ") {
        let id = rest.trim().to_string();
        if !id.is_empty() {
            return Some(RoutedIntent::CancelReminder { id });
        }
    }

    // Social-network verbs.
    for prefix in ["post: ", "post \"", "tweet: ", "tweet \""] {
        if lower.starts_with(prefix) {
            let text = trimmed[prefix.len()..].trim_end_matches('"').trim().to_string();
            if !text.is_empty() {
                return Some(RoutedIntent::SocialPost { text });
            }
        }
    }
    if ["check mentions", "any mentions", "new mentions", "read mentions"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(RoutedIntent::SocialMentions);
    }

    None
}

/// Parse "remind me in <n> minutes/hours to <prompt>".
fn parse_remind_me(lower: &str, original: &str) -> Option<RoutedIntent> {
    let pos = lower.find("remind me in ")?;
    let rest_lower = &lower[pos + "remind me in ".len()..];
    let rest_original = &original[pos + "remind me in ".len()..];

    let mut parts = rest_lower.splitn(2, ' ');
    let amount: u64 = parts.next()?.parse().ok()?;
    let after_number = parts.next()?;

    let (unit_len, multiplier) = if after_number.starts_with("minutes")
        || after_number.starts_with("minute")
        || after_number.starts_with("mins")
        || after_number.starts_with("min")
    {
        (after_number.split(' ').next()?.len(), 1)
    } else if after_number.starts_with("hours") || after_number.starts_with("hour") {
        (after_number.split(' ').next()?.len(), 60)
    } else {
        return None;
    };

    // Locate the prompt after "to " in the original-cased text.
    let number_len = rest_lower.len() - after_number.len();
    let after_unit = &rest_original[number_len + unit_len..];
    let prompt = after_unit
        .trim_start()
        .strip_prefix("to ")
        .unwrap_or(after_unit.trim_start())
        .trim()
        .trim_end_matches(['.', '!'])
        .to_string();
    if prompt.is_empty() {
        return None;
    }

    Some(RoutedIntent::ScheduleReminder {
        minutes: (amount * multiplier).max(1),
        prompt,
    })
}
