use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "changes_requested", alias = "request_major_changes")]
    RequestChanges,
    NeedsDiscussion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Final structured output of a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub security_concerns: Vec<String>,
    pub recommendation: Recommendation,
    /// Set when the agent ran out of iterations before answering.
    #[serde(default)]
    pub incomplete: bool,
}

impl ReviewVerdict {
    /// Placeholder verdict for a review cut short by the iteration limit.
    #[must_use]
    pub fn incomplete(iterations: u32) -> Self {
        Self {
            summary: format!(
                "Review stopped after {iterations} iterations without a final verdict."
            ),
            findings: Vec::new(),
            security_concerns: Vec::new(),
            recommendation: Recommendation::NeedsDiscussion,
            incomplete: true,
        }
    }

    /// Parse a verdict from model output: bare JSON, a fenced ```json block,
    /// or the outermost `{...}` span of the text.
    ///
    /// # Errors
    ///
    /// Returns a description of the last parse failure.
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        let mut candidates: Vec<&str> = vec![trimmed];
        candidates.extend(extract_fenced_blocks(trimmed, "json"));
        candidates.extend(extract_fenced_blocks(trimmed, ""));
        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
            && start < end
        {
            candidates.push(&trimmed[start..=end]);
        }

        let mut last_err = String::from("no JSON object found");
        for candidate in candidates {
            match serde_json::from_str::<Self>(candidate) {
                Ok(verdict) => return Ok(verdict),
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(last_err)
    }
}

/// Extract fenced code blocks with the given language marker from text.
fn extract_fenced_blocks<'a>(text: &'a str, lang: &str) -> Vec<&'a str> {
    let marker = format!("```{lang}");
    let marker_len = marker.len();
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(&marker) {
        let after = &rest[start + marker_len..];
        if let Some(end) = after.find("```") {
            blocks.push(after[..end].trim());
            rest = &after[end + 3..];
        } else {
            break;
        }
    }

    blocks
}
