use std::fmt::Write;

use crate::pr::PullRequest;

const SYSTEM_PROMPT: &str = "\
You are a pull request review agent. Review the changes for correctness, \
maintainability, test coverage, and security risks.

Base every finding on the diff or on repository code you fetched with a tool. \
Use the tools to look up related files before drawing conclusions, and never \
invent issues the code does not support. If a tool returns an error, adjust \
your query instead of repeating it.

When you are done, answer with a single JSON object and nothing else:
{\"summary\": string, \
\"findings\": [{\"file\": string, \"issues\": [string]}], \
\"security_concerns\": [string], \
\"recommendation\": \"approve\" | \"request_changes\" | \"needs_discussion\"}";

/// Per-file diff budget inside the opening message.
const MAX_DIFF_CHARS: usize = 8_000;

#[must_use]
pub fn system_prompt(tool_catalogue: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\n{tool_catalogue}")
}

/// Opening user message describing the pull request.
#[must_use]
pub fn pull_request_message(pr: &PullRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Review this pull request.");
    let _ = writeln!(out, "Repository: {}", pr.repository_identity);
    if let Some(id) = &pr.pull_request_id {
        let _ = writeln!(out, "Pull request: #{id}");
    }
    if let (Some(src), Some(dst)) = (&pr.source_branch, &pr.target_branch) {
        let _ = writeln!(out, "Branches: {src} -> {dst}");
    }
    let _ = writeln!(out, "Title: {}", pr.title);
    if !pr.description.is_empty() {
        let _ = writeln!(out, "Description:\n{}", pr.description);
    }
    let _ = writeln!(out, "\nChanged files ({}):", pr.changed_files.len());
    for file in &pr.changed_files {
        let kind = file.change_type.as_deref().unwrap_or("modified");
        let _ = writeln!(out, "\n### {} ({kind})", file.path);
        if file.diff.is_empty() {
            continue;
        }
        let diff = if file.diff.len() > MAX_DIFF_CHARS {
            let mut end = MAX_DIFF_CHARS;
            while !file.diff.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n... [diff truncated]", &file.diff[..end])
        } else {
            file.diff.clone()
        };
        let _ = writeln!(out, "```diff\n{diff}\n```");
    }
    out
}
