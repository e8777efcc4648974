//! Chat prompt assembly for SQL generation.
//!
//! A generation request becomes a `system` message with the SQL rules and a
//! `user` message carrying the question, the target dialect, the ranked
//! schema context and up to three worked examples. A correction appends one
//! more `user` message with the previous attempt's diagnostic.

use serde::Serialize;

use dbninja_core::generation::GenerationRequest;
use dbninja_core::models::{DocBody, IndexedDoc};

/// Per-document cap on `doc_text` characters copied into the prompt.
pub const CONTEXT_CHARS: usize = 800;

/// Examples rendered per prompt.
pub const PROMPT_EXAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

pub fn system_prompt(dialect: &str) -> String {
    format!(
        "You are a meticulous SQL expert. Follow these rules:\n\
         - Output only valid SQL for the target dialect ({dialect}).\n\
         - Prefer using retrieved tables/columns only.\n\
         - Never hallucinate tables or columns.\n\
         - Use {dialect} syntax for date/time and string functions.\n\
         - Quote identifiers that contain spaces, e.g. {quoted}.\n",
        dialect = dialect,
        quoted = quote_identifier(dialect, "Trade ID"),
    )
}

fn quote_identifier(dialect: &str, ident: &str) -> String {
    match dialect.to_ascii_lowercase().as_str() {
        "mysql" | "mariadb" => format!("`{}`", ident),
        "mssql" | "sqlserver" => format!("[{}]", ident),
        _ => format!("\"{}\"", ident),
    }
}

/// Messages for the first draft of a request.
pub fn build_messages(req: &GenerationRequest<'_>) -> Vec<ChatMessage> {
    let context = req
        .context
        .iter()
        .map(|r| format!("- {}\n{}", r.doc.title, truncate_chars(&r.doc.doc_text, CONTEXT_CHARS)))
        .collect::<Vec<_>>()
        .join("\n");

    let examples = req
        .examples
        .iter()
        .filter_map(render_example)
        .take(PROMPT_EXAMPLES)
        .map(|e| format!("Example:\n{}", e))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "User request: {}\nTarget SQL dialect: {}\n\nRelevant schema:\n{}\n\n{}\n\nReturn only SQL, no explanations.",
        req.question, req.dialect, context, examples
    );

    vec![
        ChatMessage::system(system_prompt(req.dialect)),
        ChatMessage::user(user),
    ]
}

/// Messages for a corrected attempt after `prior_error` rejected the last one.
pub fn build_correction_messages(req: &GenerationRequest<'_>, prior_error: &str) -> Vec<ChatMessage> {
    let mut messages = build_messages(req);
    messages.push(ChatMessage::user(format!(
        "The previous SQL failed with error:\n{}\nPlease fix and return only corrected SQL.",
        prior_error
    )));
    messages
}

fn render_example(doc: &IndexedDoc) -> Option<String> {
    match &doc.body {
        DocBody::Example(e) => Some(format!("Question: {}\nSQL:\n{}", e.question, e.sql)),
        DocBody::Table(_) | DocBody::Column(_) => None,
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
