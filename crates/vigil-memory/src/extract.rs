//! Deterministic per-turn extraction: goal candidates, user preferences,
//! and operating rules mined from plain text with fixed patterns. No LLM
//! calls happen here; everything is reproducible from the turn text alone.

use crate::goals::GoalStatus;

/// Upper bound on goal candidates mined from one message.
const MAX_GOAL_CANDIDATES: usize = 5;
/// Upper bound on rules mined from one turn.
const MAX_RULES_PER_TURN: usize = 4;
/// Titles longer than this are truncated.
const MAX_TITLE_CHARS: usize = 120;

/// Phrases that introduce a goal. The candidate runs from the end of the
/// phrase to the end of the sentence.
const GOAL_PHRASES: &[&str] = &[
    "we need to ",
    "i want to ",
    "let's ",
    "lets ",
    "goal: ",
    "mission: ",
    "priority: ",
];

/// Split into sentences on terminators and newlines.
fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean_candidate(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches(['.', '!', '?', ',', ';', ':'])
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.split_whitespace().count() >= 2 {
        Some(cleaned)
    } else {
        None
    }
}

/// Extract candidate goal titles from a user message.
///
/// Two shapes are recognized: inline phrases ("we need to X", "goal: X", …)
/// and bulleted lists under a "priorities" line.
pub fn extract_goal_candidates(user_text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for sentence in sentences(user_text) {
        let lower = sentence.to_lowercase();
        for phrase in GOAL_PHRASES {
            if let Some(pos) = lower.find(phrase) {
                let tail = &sentence[pos + phrase.len()..];
                if let Some(candidate) = clean_candidate(tail) {
                    if !candidates.iter().any(|c| c == &candidate) {
                        candidates.push(candidate);
                    }
                }
                break;
            }
        }
        if candidates.len() >= MAX_GOAL_CANDIDATES {
            return candidates;
        }
    }

    // Bulleted "priorities" list: every bullet after the marker line.
    let mut in_list = false;
    for line in user_text.lines() {
        let trimmed = line.trim();
        if trimmed.to_lowercase().contains("priorit") && trimmed.ends_with(':') {
            in_list = true;
            continue;
        }
        if in_list {
            let bullet = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| {
                    trimmed
                        .split_once(". ")
                        .filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit()))
                        .map(|(_, rest)| rest)
                });
            match bullet {
                Some(item) => {
                    if let Some(candidate) = clean_candidate(item) {
                        if !candidates.iter().any(|c| c == &candidate) {
                            candidates.push(candidate);
                        }
                    }
                    if candidates.len() >= MAX_GOAL_CANDIDATES {
                        break;
                    }
                }
                None if trimmed.is_empty() => {}
                None => in_list = false,
            }
        }
    }

    candidates
}

/// Mine "User Preferences" bullets from a user message.
pub fn extract_preferences(user_text: &str) -> Vec<String> {
    let mut prefs = Vec::new();
    for sentence in sentences(user_text) {
        let lower = sentence.to_lowercase();
        let patterns: &[(&str, &str)] = &[
            ("i prefer ", "Prefers"),
            ("i like ", "Prefers"),
            ("i dislike ", "Dislikes"),
            ("i hate ", "Dislikes"),
            ("i live in ", "Location:"),
            ("i'm based in ", "Location:"),
            ("i am based in ", "Location:"),
            ("my timezone is ", "Timezone:"),
        ];
        for (pattern, label) in patterns {
            if let Some(pos) = lower.find(pattern) {
                let tail = sentence[pos + pattern.len()..]
                    .trim()
                    .trim_end_matches(['.', '!', '?', ',']);
                if !tail.is_empty() {
                    prefs.push(format!("{label} {tail}"));
                }
                break;
            }
        }
    }
    prefs
}

/// Mine "Learned Behaviors" bullets: imperative sentences containing a
/// rule keyword. Capped at 4 per turn.
pub fn extract_rules(user_text: &str) -> Vec<String> {
    const KEYWORDS: &[&str] = &["always", "never", "should", "must", "don't", "do not"];
    let mut rules = Vec::new();
    for sentence in sentences(user_text) {
        let lower = sentence.to_lowercase();
        if KEYWORDS.iter().any(|k| lower.contains(k)) {
            let rule: String = sentence.chars().take(200).collect();
            rules.push(rule.trim().to_string());
            if rules.len() >= MAX_RULES_PER_TURN {
                break;
            }
        }
    }
    rules
}

/// Detect lifecycle words in a turn's text: completion, pause, or
/// cancellation. Returns the strongest match, completion first.
pub fn detect_status_words(text: &str) -> Option<GoalStatus> {
    let lower = text.to_lowercase();
    const COMPLETED: &[&str] = &["is done", "all done", "completed", "finished", "shipped"];
    const CANCELLED: &[&str] = &["cancel", "cancelled", "abandon", "scrap that", "drop that"];
    const PAUSED: &[&str] = &["pause", "on hold", "put off", "postpone"];

    if COMPLETED.iter().any(|w| lower.contains(w)) {
        return Some(GoalStatus::Completed);
    }
    if CANCELLED.iter().any(|w| lower.contains(w)) {
        return Some(GoalStatus::Cancelled);
    }
    if PAUSED.iter().any(|w| lower.contains(w)) {
        return Some(GoalStatus::Paused);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn we_need_to_yields_a_goal() {
        let candidates = extract_goal_candidates("We need to ship the dashboard by Friday.");
        assert_eq!(candidates, vec!["ship the dashboard by Friday"]);
    }

    #[test]
    fn priority_prefix_yields_a_goal() {
        let candidates = extract_goal_candidates("Priority: ship dashboard by Friday.");
        assert_eq!(candidates, vec!["ship dashboard by Friday"]);
    }

    #[test]
    fn bulleted_priorities_list() {
        let text = "Here are this week's priorities:\n- grow the follower count\n- rotate the api keys\nthanks!";
        let candidates = extract_goal_candidates(text);
        assert!(candidates.contains(&"grow the follower count".to_string()));
        assert!(candidates.contains(&"rotate the api keys".to_string()));
    }

    #[test]
    fn single_word_candidates_are_rejected() {
        assert!(extract_goal_candidates("Let's go.").is_empty());
    }

    #[test]
    fn candidates_are_capped() {
        let text = "goal: a b\ngoal: c d\ngoal: e f\ngoal: g h\ngoal: i j\ngoal: k l";
        assert_eq!(extract_goal_candidates(text).len(), MAX_GOAL_CANDIDATES);
    }

    #[test]
    fn preference_mining() {
        let prefs = extract_preferences("I prefer short answers. Also, I live in Lisbon.");
        assert_eq!(prefs, vec!["Prefers short answers", "Location: Lisbon"]);
    }

    #[test]
    fn timezone_mining() {
        let prefs = extract_preferences("my timezone is UTC+1");
        assert_eq!(prefs, vec!["Timezone: UTC+1"]);
    }

    #[test]
    fn rules_are_capped_at_four() {
        let text = "Always check twice. Never deploy on Friday. You should log errors. \
                    You must ask first. Don't guess. Do not leak keys.";
        let rules = extract_rules(text);
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0], "Always check twice");
    }

    #[test]
    fn status_words() {
        assert_eq!(detect_status_words("the dashboard is done"), Some(GoalStatus::Completed));
        assert_eq!(detect_status_words("let's put that on hold"), Some(GoalStatus::Paused));
        assert_eq!(detect_status_words("cancel the migration"), Some(GoalStatus::Cancelled));
        assert_eq!(detect_status_words("keep going"), None);
    }
}
