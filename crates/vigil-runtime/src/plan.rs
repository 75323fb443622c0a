//! Execution plans. Plan generation is a separate LLM call returning JSON;
//! anything unparseable yields no plan rather than an error.

use serde::Deserialize;
use tracing::debug;

use vigil_config::PlanningMode;
use vigil_llm::{LlmProvider, LlmRequest};
use vigil_core::{Message, Role};
use vigil_memory::text::jaccard;

/// Overlap at which a plan step counts as touched by the turn's trace.
const STEP_DONE_JACCARD: f64 = 0.15;

/// Output cap on the plan-generation call; also bounds how many tokens a
/// rendered plan can add to the system prompt.
pub const PLAN_MAX_TOKENS: u32 = 600;

const PLAN_PROMPT: &str = "Produce an execution plan for the user's request as JSON with \
exactly these fields: {\"goal\": string, \"steps\": [3..6 strings], \
\"completion_criteria\": [up to 6 strings]}. Output only the JSON object.";

/// Keywords that signal a multi-step request in `auto` planning mode.
const PLAN_SIGNALS: &[&str] = &[
    "plan",
    "step by step",
    "organize",
    "set up",
    "build",
    "research and",
    "and then",
    "workflow",
];

#[derive(Debug, Clone, Deserialize)]
struct PlanJson {
    goal: String,
    steps: Vec<String>,
    #[serde(default)]
    completion_criteria: Vec<String>,
}

/// A generated plan, carried through the turn and rendered as a status
/// footer at the end.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub goal: String,
    pub steps: Vec<String>,
    pub completion_criteria: Vec<String>,
}

impl ExecutionPlan {
    /// Block injected into the system prompt.
    pub fn render(&self) -> String {
        let mut out = format!("Execution plan goal: {}\n", self.goal);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
        if !self.completion_criteria.is_empty() {
            out.push_str("Completion criteria:\n");
            for c in &self.completion_criteria {
                out.push_str(&format!("- {c}\n"));
            }
        }
        out
    }

    /// Per-step `[done]/[pending]` footer. A step counts as done when its
    /// text overlaps the turn's trace (tool names + outputs + reply).
    pub fn render_footer(&self, turn_trace: &str) -> String {
        let mut out = String::from("\n\nPlan status:");
        for step in &self.steps {
            let done = jaccard(step, turn_trace) >= STEP_DONE_JACCARD;
            out.push_str(&format!(
                "\n- [{}] {}",
                if done { "done" } else { "pending" },
                step
            ));
        }
        out
    }
}

/// Whether this turn should generate a plan.
pub fn wants_plan(mode: PlanningMode, user_text: &str) -> bool {
    match mode {
        PlanningMode::Fast => false,
        PlanningMode::Autonomous => true,
        PlanningMode::Auto => {
            let lower = user_text.to_lowercase();
            PLAN_SIGNALS.iter().any(|s| lower.contains(s))
        }
    }
}

/// Generate a plan with a separate LLM call. Invalid JSON or an
/// out-of-range step count yields `None`.
pub async fn generate_plan(
    provider: &dyn LlmProvider,
    model: &str,
    user_text: &str,
) -> Option<ExecutionPlan> {
    let request = LlmRequest {
        model: model.to_string(),
        messages: vec![
            Message::text(Role::System, PLAN_PROMPT),
            Message::text(Role::User, user_text),
        ],
        tools: vec![],
        temperature: 0.2,
        max_tokens: PLAN_MAX_TOKENS,
    };
    let response = provider.complete(&request).await.ok()?;
    parse_plan(&response.content)
}

/// Parse the model's JSON (tolerating markdown fences).
pub fn parse_plan(raw: &str) -> Option<ExecutionPlan> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let parsed: PlanJson = match serde_json::from_str(cleaned) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "plan JSON unparseable, proceeding without a plan");
            return None;
        }
    };
    if parsed.goal.trim().is_empty() || !(3..=6).contains(&parsed.steps.len()) {
        return None;
    }
    let mut criteria = parsed.completion_criteria;
    criteria.truncate(6);
    Some(ExecutionPlan {
        goal: parsed.goal,
        steps: parsed.steps,
        completion_criteria: criteria,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_mode_needs_a_signal() {
        assert!(wants_plan(PlanningMode::Auto, "set up a weekly posting workflow"));
        assert!(!wants_plan(PlanningMode::Auto, "what's the weather"));
        assert!(wants_plan(PlanningMode::Autonomous, "hello"));
        assert!(!wants_plan(PlanningMode::Fast, "plan my week"));
    }

    #[test]
    fn valid_plan_parses() {
        let raw = r#"{"goal": "ship it", "steps": ["a b", "c d", "e f"], "completion_criteria": ["done"]}"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.goal, "ship it");
        assert_eq!(plan.steps.len(), 3);
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "```json\n{\"goal\": \"g\", \"steps\": [\"one\", \"two\", \"three\"]}\n```";
        assert!(parse_plan(raw).is_some());
    }

    #[test]
    fn invalid_json_or_step_count_yields_none() {
        assert!(parse_plan("not json").is_none());
        assert!(parse_plan(r#"{"goal": "g", "steps": ["only", "two"]}"#).is_none());
        assert!(parse_plan(
            r#"{"goal": "g", "steps": ["1","2","3","4","5","6","7"]}"#
        )
        .is_none());
        assert!(parse_plan(r#"{"goal": "", "steps": ["a","b","c"]}"#).is_none());
    }

    #[test]
    fn criteria_are_capped_at_six() {
        let raw = r#"{"goal": "g", "steps": ["a","b","c"],
            "completion_criteria": ["1","2","3","4","5","6","7","8"]}"#;
        assert_eq!(parse_plan(raw).unwrap().completion_criteria.len(), 6);
    }

    #[test]
    fn footer_marks_touched_steps_done() {
        let plan = ExecutionPlan {
            goal: "post the update".into(),
            steps: vec![
                "check wallet balance".into(),
                "write the social post".into(),
                "verify publication".into(),
            ],
            completion_criteria: vec![],
        };
        let trace = "wallet_balance Balance: 1.2 ETH checked the wallet balance for you";
        let footer = plan.render_footer(trace);
        assert!(footer.contains("[done] check wallet balance"));
        assert!(footer.contains("[pending] verify publication"));
    }
}
