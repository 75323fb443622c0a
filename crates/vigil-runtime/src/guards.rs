//! Integrity guards: post-final-text rules that coerce the model's reply
//! to reflect tool-verified facts. Each guard has a narrow precondition and
//! an idempotent action, so several can fire in one turn without
//! double-coercing the reply.

use serde_json::json;

use vigil_memory::text::first_sentence;

use crate::tools::ToolRegistry;

/// What actually happened during the tool loop this turn.
#[derive(Debug, Default, Clone)]
pub struct TurnTrace {
    pub tools_called: Vec<String>,
    pub tool_outputs: Vec<String>,
}

impl TurnTrace {
    pub fn record(&mut self, tool: &str, output: &str) {
        self.tools_called.push(tool.to_string());
        self.tool_outputs.push(output.chars().take(200).collect());
    }

    pub fn called_with_prefix(&self, prefix: &str) -> bool {
        self.tools_called.iter().any(|t| t.starts_with(prefix))
    }

    pub fn called(&self, name: &str) -> bool {
        self.tools_called.iter().any(|t| t == name)
    }

    /// Flattened trace text for plan-step matching.
    pub fn trace_text(&self, reply: &str) -> String {
        let mut out = self.tools_called.join(" ");
        out.push(' ');
        out.push_str(&self.tool_outputs.join(" "));
        out.push(' ');
        out.push_str(reply);
        out
    }
}

/// Wallet questions the wallet guard recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletQuestion {
    Address,
    Balance,
}

/// Does the user text ask about the wallet?
pub fn wallet_question(user_text: &str) -> Option<WalletQuestion> {
    let lower = user_text.to_lowercase();
    if !lower.contains("wallet") && !lower.contains("balance") && !lower.contains("address") {
        return None;
    }
    if lower.contains("address") {
        return Some(WalletQuestion::Address);
    }
    if lower.contains("balance")
        || lower.contains("how much eth")
        || lower.contains("how much money")
    {
        return Some(WalletQuestion::Balance);
    }
    None
}

/// Does the user text ask for current/live facts?
pub fn wants_live_facts(user_text: &str) -> bool {
    let lower = user_text.to_lowercase();
    ["latest", "news", "current price", "price of", "today's", "right now", "happening", "trending"]
        .iter()
        .any(|k| lower.contains(k))
}

/// Tool families the reply can falsely claim to have used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimedFamily {
    Search,
    Social,
    Scheduler,
}

/// Families the draft reply claims to have used.
pub fn claimed_families(reply: &str) -> Vec<ClaimedFamily> {
    let lower = reply.to_lowercase();
    let mut claims = Vec::new();
    if ["i searched", "search results show", "according to perplexity", "my search found"]
        .iter()
        .any(|p| lower.contains(p))
    {
        claims.push(ClaimedFamily::Search);
    }
    if ["i posted", "i've posted", "i tweeted", "just posted"]
        .iter()
        .any(|p| lower.contains(p))
    {
        claims.push(ClaimedFamily::Social);
    }
    if ["i scheduled", "i've scheduled", "i set a reminder", "reminder is set"]
        .iter()
        .any(|p| lower.contains(p))
    {
        claims.push(ClaimedFamily::Scheduler);
    }
    claims
}

/// Is the request one a tool could satisfy? Used by the action-promise
/// guard to decide whether an unfulfilled promise matters.
pub fn is_tool_capable(user_text: &str) -> bool {
    let lower = user_text.to_lowercase();
    [
        "check", "search", "look up", "fetch", "schedule", "remind", "post", "tweet",
        "balance", "wallet", "mentions", "news", "price", "remember",
    ]
    .iter()
    .any(|k| lower.contains(k))
}

/// Does the draft reply promise an action instead of performing one?
pub fn has_action_promise(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    [
        "i'll check", "i will check", "i'll look", "i will look", "let me check",
        "let me look", "let me search", "i'll get back", "one moment", "i'll find out",
        "i'll search",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// First guard (wallet). If the user asked a wallet question and no wallet
/// tool ran, run the right one and prepend its output.
pub async fn apply_wallet_guard(
    registry: &ToolRegistry,
    user_text: &str,
    trace: &mut TurnTrace,
    reply: &mut String,
) -> bool {
    let Some(question) = wallet_question(user_text) else {
        return false;
    };
    if trace.called_with_prefix("wallet_") {
        return false;
    }
    let tool = match question {
        WalletQuestion::Address => "wallet_address",
        WalletQuestion::Balance => "wallet_balance",
    };
    let output = registry.invoke(tool, json!({})).await;
    trace.record(tool, &output);
    *reply = if reply.is_empty() {
        output
    } else {
        format!("{output}\n\n{reply}")
    };
    true
}

/// Third guard (claims). For each tool family the reply claims to have used
/// without a matching call, invoke the deterministic-route equivalent and
/// prepend its output.
pub async fn apply_claim_guards(
    registry: &ToolRegistry,
    user_text: &str,
    trace: &mut TurnTrace,
    reply: &mut String,
) -> bool {
    let mut fired = false;
    for claim in claimed_families(reply) {
        let (tool, args) = match claim {
            ClaimedFamily::Search => {
                if trace.called("perplexity_search") {
                    continue;
                }
                (
                    "perplexity_search",
                    json!({ "query": user_text, "max_results": 5 }),
                )
            }
            ClaimedFamily::Social => {
                if trace.called_with_prefix("social_") {
                    continue;
                }
                // Make the claim true: publish what the reply says was posted.
                ("social_post", json!({ "text": first_sentence(reply, 240) }))
            }
            ClaimedFamily::Scheduler => {
                if trace.called("schedule_reminder") || trace.called("list_reminders") {
                    continue;
                }
                ("list_reminders", json!({}))
            }
        };
        let output = registry.invoke(tool, args).await;
        trace.record(tool, &output);
        *reply = format!("{output}\n\n{reply}");
        fired = true;
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_question_detection() {
        assert_eq!(wallet_question("what is your balance?"), Some(WalletQuestion::Balance));
        assert_eq!(
            wallet_question("what's the wallet address"),
            Some(WalletQuestion::Address)
        );
        assert_eq!(wallet_question("balance of power in the senate"), Some(WalletQuestion::Balance));
        assert_eq!(wallet_question("how was your day"), None);
    }

    #[test]
    fn live_fact_detection() {
        assert!(wants_live_facts("what's the latest on the merge?"));
        assert!(wants_live_facts("price of eth right now"));
        assert!(!wants_live_facts("explain how hashing works"));
    }

    #[test]
    fn claim_detection() {
        let claims = claimed_families("I searched the web and I posted the update.");
        assert!(claims.contains(&ClaimedFamily::Search));
        assert!(claims.contains(&ClaimedFamily::Social));
        assert!(claimed_families("I set a reminder for tomorrow.")
            .contains(&ClaimedFamily::Scheduler));
        assert!(claimed_families("Here is an explanation.").is_empty());
    }

    #[test]
    fn promise_detection() {
        assert!(has_action_promise("I'll check the balance and get back to you."));
        assert!(has_action_promise("Let me search for that."));
        assert!(!has_action_promise("The balance is 1.2 ETH."));
        assert!(is_tool_capable("check my balance"));
        assert!(!is_tool_capable("tell me a story"));
    }
}
