//! Prompt text for the tool loop.
//!
//! The system prompt carries the tool catalogue and teaches the bracket
//! call syntax. The decision and final prompts are ephemeral: they are
//! appended to one request and never stored in the conversation.

use cortex_core::tool::ToolDefinition;

/// The persona plus the tool catalogue and call format.
pub fn system_prompt(persona: &str, tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return persona.to_string();
    }

    let catalogue = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{persona}\n\n\
         You can use these tools:\n{catalogue}\n\n\
         To use a tool, write a line in exactly this format:\n\
         [Funcion: 'tool_name', query: 'what to look up']\n\n\
         You may write several calls, one per line. Results are added to the \
         conversation before you answer. Only call a tool when you need fresh \
         or external information; otherwise answer directly."
    )
}

/// Asked after a round of tool results: more tools, or ready to answer?
pub fn decision_prompt() -> &'static str {
    "Review the tool results above. If you still need information, write \
     the additional tool calls now using [Funcion: 'tool_name', query: '...'] \
     and nothing else. If you already have enough information, reply with \
     the single word READY."
}

/// Asked once tools have run, to produce the user-facing answer.
pub fn final_prompt() -> &'static str {
    "Using the tool results above, write your final answer to the user's \
     last message. Do not write any tool calls. If a tool reported an \
     error, say what could not be retrieved."
}
