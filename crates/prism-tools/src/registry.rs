//! Tool catalogue: native tool definitions plus the prompt rendering of the
//! same tools.

use std::fmt::Write;

use prism_llm::ToolDefinition;

/// One retrieval tool: id, description, and the JSON Schema of its parameters.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub id: &'static str,
    pub description: &'static str,
    pub schema: schemars::Schema,
}

/// The tools offered to the review agent, in catalogue order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

/// A parameter as the prompt shows it.
#[derive(Debug, PartialEq, Eq)]
struct Param<'a> {
    name: &'a str,
    ty: String,
    required: bool,
    description: &'a str,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(tools: Vec<ToolDef>) -> Self {
        Self { tools }
    }

    #[must_use]
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// Catalogue section of the system prompt.
    ///
    /// Each tool is shown as a call signature (`search(query, limit?)`)
    /// followed by its description and one line per parameter.
    #[must_use]
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::from("## Retrieval tools\n\n");
        if self.tools.is_empty() {
            out.push_str("No tools are available; answer from the diff alone.\n");
            return out;
        }
        out.push_str(
            "Every tool returns JSON. Omit `collection_name` to query the repository \
             under review. Record ids come from search results.\n",
        );
        for tool in &self.tools {
            let params = params_of(&tool.schema);
            let signature: Vec<String> = params
                .iter()
                .map(|p| {
                    if p.required {
                        p.name.to_owned()
                    } else {
                        format!("{}?", p.name)
                    }
                })
                .collect();
            let _ = writeln!(out, "\n### {}({})", tool.id, signature.join(", "));
            let _ = writeln!(out, "{}", tool.description);
            for p in &params {
                let _ = write!(out, "- `{}` ({}", p.name, p.ty);
                if !p.required {
                    out.push_str(", optional");
                }
                out.push(')');
                if !p.description.is_empty() {
                    let _ = write!(out, ": {}", p.description);
                }
                out.push('\n');
            }
        }
        out
    }

    /// The catalogue in the shape of a provider's native tool-calling API.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| {
                let mut parameters = t.schema.as_value().clone();
                if let Some(obj) = parameters.as_object_mut() {
                    obj.remove("$schema");
                    obj.remove("title");
                }
                ToolDefinition {
                    name: t.id.to_owned(),
                    description: t.description.to_owned(),
                    parameters,
                }
            })
            .collect()
    }
}

/// `"integer"` from `"type": "integer"`, `"type": ["integer", "null"]`, or an
/// `anyOf` with a null branch, which is how optional fields are rendered.
fn type_name(prop: &serde_json::Map<String, serde_json::Value>) -> &str {
    match prop.get("type") {
        Some(serde_json::Value::String(t)) => return t,
        Some(serde_json::Value::Array(types)) => {
            if let Some(t) = types.iter().filter_map(|v| v.as_str()).find(|t| *t != "null") {
                return t;
            }
        }
        _ => {}
    }
    prop.get("anyOf")
        .and_then(|v| v.as_array())
        .and_then(|branches| {
            branches
                .iter()
                .filter_map(|b| b.get("type")?.as_str())
                .find(|t| *t != "null")
        })
        .unwrap_or("string")
}

/// `minimum`/`maximum` of a property or of its non-null `anyOf` branch.
fn bounds(
    prop: &serde_json::Map<String, serde_json::Value>,
) -> Option<(&serde_json::Value, &serde_json::Value)> {
    if let (Some(min), Some(max)) = (prop.get("minimum"), prop.get("maximum")) {
        return Some((min, max));
    }
    prop.get("anyOf")?.as_array()?.iter().find_map(|branch| {
        Some((branch.get("minimum")?, branch.get("maximum")?))
    })
}

/// Parameters of an object schema, required ones first.
fn params_of(schema: &schemars::Schema) -> Vec<Param<'_>> {
    let Some(obj) = schema.as_object() else {
        return Vec::new();
    };
    let Some(props) = obj.get("properties").and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    let required: Vec<&str> = obj
        .get("required")
        .and_then(|v| v.as_array())
        .map(|names| names.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut params: Vec<Param<'_>> = props
        .iter()
        .filter_map(|(name, prop)| {
            let prop = prop.as_object()?;
            let mut ty = type_name(prop).to_owned();
            if let Some((min, max)) = bounds(prop) {
                let _ = write!(ty, " {min}-{max}");
            }
            Some(Param {
                name,
                ty,
                required: required.contains(&name.as_str()),
                description: prop
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default(),
            })
        })
        .collect();
    // Stable, so declaration order survives within each group.
    params.sort_by_key(|p| !p.required);
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct SearchArgs {
        /// Repository to search
        collection_name: Option<String>,
        /// Code or prose to look for
        query: String,
        /// Result cap
        #[schemars(range(min = 1, max = 50))]
        limit: Option<u32>,
    }

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct ListArgs {
        collection_name: Option<String>,
    }

    fn catalogue() -> ToolRegistry {
        ToolRegistry::new(vec![
            ToolDef {
                id: "search_code",
                description: "Semantic search over indexed chunks.",
                schema: schemars::schema_for!(SearchArgs),
            },
            ToolDef {
                id: "list_paths",
                description: "Indexed file paths.",
                schema: schemars::schema_for!(ListArgs),
            },
        ])
    }

    #[test]
    fn find_by_id() {
        let reg = catalogue();
        assert_eq!(reg.tools().len(), 2);
        assert_eq!(reg.find("list_paths").map(|t| t.id), Some("list_paths"));
        assert!(reg.find("delete_everything").is_none());
    }

    #[test]
    fn empty_catalogue_says_so() {
        let prompt = ToolRegistry::default().format_for_prompt();
        assert!(prompt.starts_with("## Retrieval tools"));
        assert!(prompt.contains("No tools are available"));
    }

    #[test]
    fn signature_puts_required_parameters_first() {
        let prompt = catalogue().format_for_prompt();
        assert!(
            prompt.contains("### search_code(query, collection_name?, limit?)"),
            "{prompt}"
        );
        assert!(prompt.contains("### list_paths(collection_name?)"));
        assert!(prompt.contains("Omit `collection_name`"));
    }

    #[test]
    fn parameters_show_type_range_and_description() {
        let prompt = catalogue().format_for_prompt();
        assert!(prompt.contains("- `query` (string): Code or prose to look for\n"));
        assert!(
            prompt.contains("- `limit` (integer 1-50, optional): Result cap\n"),
            "optional integers keep their type and range: {prompt}"
        );
        assert!(prompt.contains("- `collection_name` (string, optional)\n"));
    }

    #[test]
    fn definitions_strip_schema_metadata() {
        let defs = catalogue().definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "search_code");
        assert_eq!(defs[0].parameters["type"], "object");
        assert!(defs[0].parameters.get("$schema").is_none());
        assert!(defs[0].parameters.get("title").is_none());
        assert!(defs[0].parameters["properties"]["query"].is_object());
    }
}
