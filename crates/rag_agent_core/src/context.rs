//! crates/rag_agent_core/src/context.rs
//!
//! Assembles retrieved passages, session history and the new question into a
//! single generation request. Pure and side-effect-free: no network or
//! storage access happens here.

use crate::domain::{Message, RetrievedDocument, Role};

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a helpful AI assistant. Use the following pieces of retrieved context to answer the user's question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.
Keep the answer concise and well-structured using markdown formatting where appropriate.

Context:
{context}
"#;

/// One prior conversation turn, mapped to the generator's speaker roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// Everything the generator needs for one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// System instructions with the retrieved context substituted in.
    pub system_prompt: String,
    /// Prior turns, chronological.
    pub history: Vec<PromptMessage>,
    /// The new user question.
    pub question: String,
}

/// Builds a generation request from retrieved passages, chat history and the
/// user's question.
pub fn assemble(
    passages: &[RetrievedDocument],
    history: &[Message],
    question: &str,
) -> GenerationRequest {
    let context = format_context(passages);
    let system_prompt = SYSTEM_PROMPT_TEMPLATE.replace("{context}", &context);

    let history = history
        .iter()
        .map(|m| PromptMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect();

    GenerationRequest {
        system_prompt,
        history,
        question: question.to_string(),
    }
}

/// Concatenates passage text into one context block, each passage labelled
/// with its source.
fn format_context(passages: &[RetrievedDocument]) -> String {
    passages
        .iter()
        .map(|doc| {
            format!(
                "Source: {}\n{}",
                doc.source.as_deref().unwrap_or("unknown"),
                doc.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
