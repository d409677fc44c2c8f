//! Compact prompt construction.

use stepgate_core_types::Snapshot;

/// System prompt for the default builder. Enumerates the compact line
/// schema and the action grammar, and demands exactly one action back.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a browser automation executor. Each turn you receive the task goal, the current step goal, and a compact list of interactive elements.

## Element lines
One element per line, pipe-delimited:
id|role|text|importance|is_primary|docYq|ord|DG|href

- id: number you pass to CLICK/TYPE
- role: ARIA-like role
- text: visible text, truncated
- importance: higher means more actionable
- is_primary: 1 for visually primary elements
- docYq: vertical position bucket (0 = top of page)
- ord: position within the dominant group (0-based), or -
- DG: 1 when the element belongs to the dominant group (result rows, list items)
- href: shortened link target, or -

## Actions
Reply with EXACTLY ONE action and nothing else:
- CLICK(id)
- TYPE(id,"text to type")
- PRESS("key")           e.g. PRESS("Enter")
- FINISH()               when the step goal is already satisfied

Use ordinals for instructions like "the 3rd result": pick the element with DG=1 and ord=2."#;

/// Everything a prompt builder may use.
#[derive(Clone, Debug)]
pub struct PromptInputs<'a> {
    pub task_goal: &'a str,
    pub step_goal: &'a str,
    pub snapshot: &'a Snapshot,
    pub compact_lines: &'a [String],
    pub history_summary: Option<&'a str>,
}

/// (system, user) pair handed to the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Hook for embedders that want their own prompt shape.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, inputs: &PromptInputs<'_>) -> PromptPair;
}

/// Default builder: compact lines plus a one-action instruction.
#[derive(Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, inputs: &PromptInputs<'_>) -> PromptPair {
        let mut user = String::new();
        user.push_str(&format!("Task: {}\n", inputs.task_goal));
        user.push_str(&format!("Current step: {}\n", inputs.step_goal));
        user.push_str(&format!("URL: {}\n", inputs.snapshot.url));
        if let Some(history) = inputs.history_summary {
            user.push_str(&format!("History: {history}\n"));
        }
        user.push_str("\nInteractive elements:\n");
        for line in inputs.compact_lines {
            user.push_str(line);
            user.push('\n');
        }
        user.push_str("\nReply with exactly one action.");
        PromptPair {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}
