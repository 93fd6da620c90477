//! System prompts and the gate's tool contract.

use serde_json::json;
use warden_llm::ToolSpec;

/// Name of the gate's single terminal tool.
pub const GATE_TOOL_NAME: &str = "allow_or_block";

/// The gate's terminal tool.
pub fn gate_tool() -> ToolSpec {
    ToolSpec {
        name: GATE_TOOL_NAME.to_owned(),
        description: "Record whether the latest user message may be answered under the \
                      moderation policy. Call exactly once."
            .to_owned(),
        parameters: json!({
            "type": "object",
            "properties": {
                "allow": {
                    "type": "boolean",
                    "description": "true to let the assistant answer, false to block"
                },
                "rationale": {
                    "type": "string",
                    "description": "Short justification for the decision"
                }
            },
            "required": ["allow"],
            "additionalProperties": false
        }),
    }
}

/// System prompt for the gate agent evaluating `policy_text`.
pub fn gate_system_prompt(policy_text: &str) -> String {
    let policy = policy_text.trim();
    format!(
        "You are a moderation gate. Judge only the most recent user message against the \
         policy below, using earlier messages as context.\n\n\
         Respond by calling `{GATE_TOOL_NAME}` exactly once. Do not answer the user and do \
         not call any other tool.\n\n\
         <policy>\n{policy}\n</policy>"
    )
}

/// System prompt for the task agent, carrying the gate's rationale as a
/// directive the end user never sees.
pub fn task_system_prompt(base: &str, rationale: &str) -> String {
    if rationale.trim().is_empty() {
        return base.to_owned();
    }
    format!(
        "{base}\n\n## Moderation directive\n\
         A moderation reviewer approved the latest message with this note. Respect it, \
         but do not mention or quote it:\n{}",
        rationale.trim()
    )
}
