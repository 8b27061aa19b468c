//! Pull request payload normalization.
//!
//! Accepts the canonical shape
//! `{repository_identity, pull_request_id, title, description, changed_files: [{path, diff}]}`
//! as well as Azure DevOps (`pullRequest` + `filesChanged`) and GitHub
//! (`pull_request` + `files`) webhook-style payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReviewError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
}

/// Normalized PR fields handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Also the name of the collection the agent searches.
    pub repository_identity: String,
    pub pull_request_id: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
    pub changed_files: Vec<ChangedFile>,
}

fn nested<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(obj, |cur, key| cur.get(key))
}

fn text_at(obj: &Value, keys: &[&str]) -> Option<String> {
    match nested(obj, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(obj: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|p| text_at(obj, p))
}

const REPOSITORY_PATHS: &[&[&str]] = &[
    &["repository_identity"],
    &["repository"],
    &["pullRequest", "repository"],
    &["pullRequest", "repository", "name"],
    &["repository", "full_name"],
    &["repository", "name"],
    &["repo"],
    &["pull_request", "base", "repo", "full_name"],
    &["pull_request", "base", "repo", "name"],
    &["pull_request", "head", "repo", "full_name"],
    &["pull_request", "head", "repo", "name"],
    &["collection_name"],
];

/// Candidate arrays of changed files and the keys used for path and diff.
const FILE_LISTS: &[(&str, &[&str], &[&str])] = &[
    ("changed_files", &["path"], &["diff"]),
    ("filesChanged", &["filePath", "path"], &["diff", "content"]),
    ("files", &["filename", "path"], &["patch", "diff"]),
];

fn changed_files(obj: &Value) -> Vec<ChangedFile> {
    for (list_key, path_keys, diff_keys) in FILE_LISTS {
        let Some(entries) = obj.get(*list_key).and_then(Value::as_array) else {
            continue;
        };
        return entries
            .iter()
            .filter_map(|entry| {
                let path = path_keys.iter().find_map(|k| text_at(entry, &[*k]))?;
                let diff = diff_keys
                    .iter()
                    .find_map(|k| entry.get(*k).and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_owned();
                Some(ChangedFile {
                    path,
                    diff,
                    change_type: text_at(entry, &["changeType"])
                        .or_else(|| text_at(entry, &["status"])),
                })
            })
            .collect();
    }
    Vec::new()
}

/// Extract the normalized pull request from raw JSON.
///
/// # Errors
///
/// Returns `ReviewError::MalformedInput` if the payload is not a JSON object,
/// names no repository, or lists no changed files.
pub fn parse_pr_data(raw: &str) -> Result<PullRequest, ReviewError> {
    let obj: Value = serde_json::from_str(raw)
        .map_err(|e| ReviewError::MalformedInput(format!("not valid JSON: {e}")))?;
    if !obj.is_object() {
        return Err(ReviewError::MalformedInput(
            "payload must be a JSON object".into(),
        ));
    }

    let repository_identity = first_text(&obj, REPOSITORY_PATHS)
        .ok_or_else(|| ReviewError::MalformedInput("no repository identity".into()))?;
    let changed_files = changed_files(&obj);
    if changed_files.is_empty() {
        return Err(ReviewError::MalformedInput("no changed files".into()));
    }

    Ok(PullRequest {
        repository_identity,
        pull_request_id: first_text(
            &obj,
            &[
                &["pull_request_id"],
                &["pullRequest", "id"],
                &["pullRequest", "pullRequestId"],
                &["pull_request", "number"],
                &["number"],
            ],
        ),
        title: first_text(
            &obj,
            &[&["title"], &["pullRequest", "title"], &["pull_request", "title"]],
        )
        .unwrap_or_default(),
        description: first_text(
            &obj,
            &[
                &["description"],
                &["pullRequest", "description"],
                &["pull_request", "body"],
            ],
        )
        .unwrap_or_default(),
        author: first_text(
            &obj,
            &[
                &["author"],
                &["pullRequest", "author"],
                &["pull_request", "user", "login"],
            ],
        ),
        source_branch: first_text(
            &obj,
            &[
                &["source_branch"],
                &["pullRequest", "sourceBranch"],
                &["pull_request", "head", "ref"],
            ],
        ),
        target_branch: first_text(
            &obj,
            &[
                &["target_branch"],
                &["pullRequest", "targetBranch"],
                &["pull_request", "base", "ref"],
            ],
        ),
        changed_files,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_shape() {
        let raw = json!({
            "repository_identity": "acme/shop",
            "pull_request_id": "42",
            "title": "Fix login",
            "description": "Handles empty passwords",
            "changed_files": [{"path": "auth.py", "diff": "@@ -1 +1 @@\n-a\n+b"}]
        })
        .to_string();
        let pr = parse_pr_data(&raw).unwrap();
        assert_eq!(pr.repository_identity, "acme/shop");
        assert_eq!(pr.pull_request_id.as_deref(), Some("42"));
        assert_eq!(pr.title, "Fix login");
        assert_eq!(pr.changed_files.len(), 1);
        assert_eq!(pr.changed_files[0].path, "auth.py");
        assert!(pr.changed_files[0].diff.contains("+b"));
    }

    #[test]
    fn azure_shape() {
        let raw = json!({
            "pullRequest": {
                "id": 7,
                "title": "JSON export",
                "description": "PR submitted from pipeline",
                "author": "dev",
                "sourceBranch": "refs/heads/feature/json",
                "targetBranch": "refs/heads/master",
                "repository": "pr-api"
            },
            "filesChanged": [
                {"filePath": "pr_api.py", "changeType": "modified", "content": "Added JSON export"},
                {"filePath": "requirements.txt", "changeType": "modified", "content": "Added aiofiles"}
            ]
        })
        .to_string();
        let pr = parse_pr_data(&raw).unwrap();
        assert_eq!(pr.repository_identity, "pr-api");
        assert_eq!(pr.pull_request_id.as_deref(), Some("7"));
        assert_eq!(pr.author.as_deref(), Some("dev"));
        assert_eq!(pr.target_branch.as_deref(), Some("refs/heads/master"));
        assert_eq!(pr.changed_files[1].path, "requirements.txt");
        assert_eq!(pr.changed_files[1].change_type.as_deref(), Some("modified"));
    }

    #[test]
    fn github_shape() {
        let raw = json!({
            "number": 12,
            "pull_request": {
                "title": "Add cache",
                "body": "Speeds up lookups",
                "user": {"login": "octo"},
                "base": {"ref": "main", "repo": {"name": "shop", "full_name": "acme/shop"}},
                "head": {"ref": "cache", "repo": {"name": "shop"}}
            },
            "files": [{"filename": "src/cache.rs", "status": "added", "patch": "+fn get() {}"}]
        })
        .to_string();
        let pr = parse_pr_data(&raw).unwrap();
        assert_eq!(pr.repository_identity, "acme/shop");
        assert_eq!(pr.pull_request_id.as_deref(), Some("12"));
        assert_eq!(pr.description, "Speeds up lookups");
        assert_eq!(pr.source_branch.as_deref(), Some("cache"));
        assert_eq!(pr.changed_files[0].diff, "+fn get() {}");
    }

    #[test]
    fn explicit_repository_wins_over_collection_name() {
        let raw = json!({
            "repository": "primary",
            "collection_name": "fallback",
            "changed_files": [{"path": "a.rs", "diff": ""}]
        })
        .to_string();
        assert_eq!(parse_pr_data(&raw).unwrap().repository_identity, "primary");

        let raw = json!({
            "collection_name": "fallback",
            "changed_files": [{"path": "a.rs", "diff": ""}]
        })
        .to_string();
        assert_eq!(parse_pr_data(&raw).unwrap().repository_identity, "fallback");
    }

    #[test]
    fn missing_repository_is_malformed() {
        let raw = json!({"title": "x", "changed_files": [{"path": "a.rs", "diff": ""}]}).to_string();
        let err = parse_pr_data(&raw).unwrap_err();
        assert!(matches!(err, ReviewError::MalformedInput(_)));
        assert!(err.to_string().contains("repository"));
    }

    #[test]
    fn blank_repository_is_ignored() {
        let raw = json!({"repository": "  ", "changed_files": [{"path": "a.rs", "diff": ""}]})
            .to_string();
        assert!(parse_pr_data(&raw).is_err());
    }

    #[test]
    fn no_changed_files_is_malformed() {
        let raw = json!({"repository": "r", "changed_files": []}).to_string();
        assert!(parse_pr_data(&raw).unwrap_err().to_string().contains("changed files"));

        let raw = json!({"repository": "r", "changed_files": [{"diff": "no path"}]}).to_string();
        assert!(parse_pr_data(&raw).is_err());
    }

    #[test]
    fn non_object_payloads_are_malformed() {
        assert!(parse_pr_data("not json").is_err());
        assert!(parse_pr_data("[1, 2]").is_err());
        assert!(parse_pr_data("").is_err());
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_input_never_panics(raw in "\\PC{0,120}") {
            let _ = parse_pr_data(&raw);
        }

        #[test]
        fn changed_file_paths_are_preserved(paths in proptest::collection::vec("[a-z]{1,8}\\.rs", 1..6)) {
            let files: Vec<_> = paths.iter().map(|p| json!({"path": p, "diff": "+x"})).collect();
            let raw = json!({"repository": "r", "changed_files": files}).to_string();
            let pr = parse_pr_data(&raw).unwrap();
            let got: Vec<_> = pr.changed_files.iter().map(|f| f.path.clone()).collect();
            proptest::prop_assert_eq!(got, paths);
        }
    }
}
