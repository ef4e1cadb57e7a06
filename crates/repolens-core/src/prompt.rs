//! Prompt assembly for analysis and chat requests.
//!
//! Every analysis prompt demands exactly one JSON object of a fixed shape.
//! Inputs are truncated per request kind so a single large file cannot
//! blow the provider's context window.

use std::borrow::Cow;

use crate::heuristics::Heuristics;
use crate::models::{ChatMessage, ContextScope, ContextType, RepositoryAnalysis};

/// Appended to any input cut by [`truncate_chars`].
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

const JSON_ONLY: &str = "Respond with exactly one JSON object and nothing else. \
Do not wrap it in Markdown. Use empty strings or empty arrays when unsure.";

/// A file chosen to represent the repository in a whole-repo analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFile {
    pub path: String,
    pub content: String,
}

/// Per-request input ceilings for [`repository_analysis`].
#[derive(Debug, Clone, Copy)]
pub struct RepositoryPromptLimits {
    pub tree_chars: usize,
    pub sample_chars: usize,
}

/// Keep at most `max_chars` characters of `text`, marking the cut.
///
/// The cut lands on a char boundary, and on the last line break of the
/// kept prefix when one exists in its second half.
pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    let cut = match text.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return Cow::Borrowed(text),
    };
    let kept = &text[..cut];
    let kept = match kept.rfind('\n') {
        Some(nl) if nl >= kept.len() / 2 => &kept[..nl],
        _ => kept,
    };
    Cow::Owned(format!("{}{}", kept, TRUNCATION_MARKER))
}

/// Messages asking for a [`FileExplanation`](crate::explain::FileExplanation).
pub fn file_explanation(
    path: &str,
    content: &str,
    repo_context: Option<&str>,
    max_chars: usize,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are a senior engineer explaining source files to a newcomer.\n\
         {JSON_ONLY}\n\
         Shape: {{\"purpose\": string, \"layer\": string, \"summary\": string, \
         \"exports\": [string], \"imports\": [string], \
         \"keyFunctions\": [{{\"name\": string, \"description\": string}}]}}\n\
         \"layer\" is the architectural layer, e.g. ui, api, service, data, config, test, util."
    );
    let mut user = String::new();
    if let Some(ctx) = repo_context.filter(|c| !c.trim().is_empty()) {
        user.push_str("Repository context:\n");
        user.push_str(ctx.trim());
        user.push_str("\n\n");
    }
    user.push_str(&format!(
        "File: {}\n```\n{}\n```",
        path,
        truncate_chars(content, max_chars)
    ));
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Messages asking for a [`SymbolExplanation`](crate::explain::SymbolExplanation).
pub fn symbol_explanation(
    code: &str,
    name: &str,
    kind: &str,
    file_context: Option<&str>,
    max_chars: usize,
) -> Vec<ChatMessage> {
    let system = format!(
        "You explain individual declarations in source code.\n\
         {JSON_ONLY}\n\
         Shape: {{\"name\": string, \"kind\": string, \"purpose\": string, \
         \"parameters\": [{{\"name\": string, \"type\": string, \"description\": string}}], \
         \"returnType\": string, \"sideEffects\": [string]}}\n\
         \"parameters\", \"returnType\" and \"sideEffects\" may be omitted when they do not apply."
    );
    let mut user = format!("Explain the {} `{}`.\n", kind, name);
    if let Some(ctx) = file_context.filter(|c| !c.trim().is_empty()) {
        user.push_str(&format!("It is declared in: {}\n", ctx.trim()));
    }
    user.push_str(&format!("```\n{}\n```", truncate_chars(code, max_chars)));
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Messages asking for a [`RepositoryOverview`](crate::explain::RepositoryOverview).
///
/// Heuristic findings are included as facts the model must not contradict.
pub fn repository_analysis(
    repo_name: &str,
    tree_listing: &str,
    samples: &[SampleFile],
    heuristics: &Heuristics,
    limits: RepositoryPromptLimits,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are a software architect summarizing a code repository.\n\
         {JSON_ONLY}\n\
         Shape: {{\"summary\": string, \"architecture\": string, \"patterns\": [string], \
         \"frameworks\": [string], \"buildSystem\": string, \"entryPoints\": [string], \
         \"layers\": [{{\"name\": string, \"description\": string, \"files\": [string]}}]}}\n\
         The detected facts below come from static analysis and are reliable; \
         include them and do not contradict them."
    );
    let mut user = format!("Repository: {}\n\nDetected facts:\n{}\n\n", repo_name, heuristics.describe());
    user.push_str("File tree:\n");
    user.push_str(&truncate_chars(tree_listing, limits.tree_chars));
    for sample in samples {
        user.push_str(&format!(
            "\n\nFile: {}\n```\n{}\n```",
            sample.path,
            truncate_chars(&sample.content, limits.sample_chars)
        ));
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// System message framing a conversation about a repository or one file.
pub fn chat_system(
    repo_name: &str,
    scope: &ContextScope,
    analysis: Option<&RepositoryAnalysis>,
    file_content: Option<&str>,
    file_chars: usize,
) -> ChatMessage {
    let mut text = format!(
        "You are a helpful assistant answering questions about the repository {}. \
         Answer concisely and reference file paths when relevant. \
         If the provided context is insufficient, say so.",
        repo_name
    );
    if let Some(analysis) = analysis {
        text.push_str("\n\nRepository overview:\n");
        text.push_str(&analysis.summary);
        if !analysis.architecture.is_empty() {
            text.push_str(&format!("\nArchitecture: {}", analysis.architecture));
        }
        if !analysis.frameworks.is_empty() {
            text.push_str(&format!("\nFrameworks: {}", analysis.frameworks.join(", ")));
        }
        if !analysis.patterns.is_empty() {
            text.push_str(&format!("\nPatterns: {}", analysis.patterns.join(", ")));
        }
        if !analysis.entry_points.is_empty() {
            text.push_str(&format!("\nEntry points: {}", analysis.entry_points.join(", ")));
        }
    }
    if scope.context_type == ContextType::File {
        let path = scope.path.as_deref().unwrap_or_default();
        text.push_str(&format!("\n\nThe user is asking about the file {}.", path));
        match file_content {
            Some(content) => text.push_str(&format!(
                "\n```\n{}\n```",
                truncate_chars(content, file_chars)
            )),
            None => text.push_str(" Its content is unavailable."),
        }
    }
    ChatMessage::system(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert!(matches!(truncate_chars("hello", 10), Cow::Borrowed("hello")));
        assert_eq!(truncate_chars("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let out = truncate_chars(text, 4);
        assert_eq!(out, format!("héll{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_prefers_line_break() {
        let text = "line one\nline two\nline three";
        let out = truncate_chars(text, 20);
        assert_eq!(out, format!("line one\nline two{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_file_prompt_truncates_content() {
        let content = "x".repeat(500);
        let messages = file_explanation("src/a.ts", &content, Some("A web app"), 100);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("keyFunctions"));
        assert!(messages[1].content.contains("A web app"));
        assert!(messages[1].content.contains(TRUNCATION_MARKER));
        assert!(!messages[1].content.contains(&"x".repeat(101)));
    }

    #[test]
    fn test_repository_prompt_includes_heuristics() {
        let mut heuristics = Heuristics::default();
        heuristics.frameworks.insert("Next.js".to_string());
        let samples = vec![SampleFile {
            path: "package.json".into(),
            content: "{}".into(),
        }];
        let limits = RepositoryPromptLimits {
            tree_chars: 1000,
            sample_chars: 1000,
        };
        let messages = repository_analysis("acme/web", "src/\n", &samples, &heuristics, limits);
        assert!(messages[1].content.contains("Frameworks: Next.js"));
        assert!(messages[1].content.contains("File: package.json"));
    }

    #[test]
    fn test_chat_system_for_file_scope() {
        let scope = ContextScope::file("src/a.ts");
        let msg = chat_system("acme/web", &scope, None, Some("export const a = 1;"), 8000);
        assert_eq!(msg.role, Role::System);
        assert!(msg.content.contains("src/a.ts"));
        assert!(msg.content.contains("export const a = 1;"));

        let msg = chat_system("acme/web", &ContextScope::repository(), None, None, 8000);
        assert!(!msg.content.contains("asking about the file"));
    }
}
