//! Tool catalog and categorization

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::protocol::RemoteTool;

/// Display bucket for a remote tool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolCategory {
    #[serde(rename = "Web Automation")]
    WebAutomation,
    #[serde(rename = "Math & Logic")]
    MathLogic,
    Notes,
    Filesystem,
    System,
    Utilities,
    General,
}

impl ToolCategory {
    pub const fn label(self) -> &'static str {
        match self {
            Self::WebAutomation => "Web Automation",
            Self::MathLogic => "Math & Logic",
            Self::Notes => "Notes",
            Self::Filesystem => "Filesystem",
            Self::System => "System",
            Self::Utilities => "Utilities",
            Self::General => "General",
        }
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered keyword table; the first rule with a keyword in the tool name wins
pub const CATEGORY_RULES: &[(ToolCategory, &[&str])] = &[
    (
        ToolCategory::WebAutomation,
        &["browser", "navigate", "screenshot", "click", "fill"],
    ),
    (ToolCategory::MathLogic, &["calculator", "random", "temperature"]),
    (ToolCategory::Notes, &["obsidian", "note"]),
    (ToolCategory::Filesystem, &["file", "directory", "search_files"]),
    (ToolCategory::System, &["execute_command"]),
    (ToolCategory::Utilities, &["time", "word_count"]),
];

/// Bucket a tool by name
pub fn categorize(name: &str) -> ToolCategory {
    let name = name.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map_or(ToolCategory::General, |(category, _)| *category)
}

/// One discovered remote tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    /// Input schema exactly as the server advertised it
    #[serde(rename = "schema")]
    pub input_schema: Value,
    pub category: ToolCategory,
}

impl From<RemoteTool> for ToolCatalogEntry {
    fn from(tool: RemoteTool) -> Self {
        let category = categorize(&tool.name);
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            category,
        }
    }
}

/// Group entries by category label, keeping catalog order inside each group
pub fn group_by_category(entries: &[ToolCatalogEntry]) -> BTreeMap<String, Vec<ToolCatalogEntry>> {
    let mut groups: BTreeMap<String, Vec<ToolCatalogEntry>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.category.label().to_string())
            .or_default()
            .push(entry.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_categorize_buckets() {
        assert_eq!(categorize("browser_navigate"), ToolCategory::WebAutomation);
        assert_eq!(categorize("calculator"), ToolCategory::MathLogic);
        assert_eq!(categorize("obsidian_search"), ToolCategory::Notes);
        assert_eq!(categorize("read_file"), ToolCategory::Filesystem);
        assert_eq!(categorize("execute_command"), ToolCategory::System);
        assert_eq!(categorize("get_current_time"), ToolCategory::Utilities);
        assert_eq!(categorize("translate"), ToolCategory::General);
    }

    #[test]
    fn test_rule_order_wins() {
        // "screenshot_file" hits web automation before filesystem
        assert_eq!(categorize("screenshot_file"), ToolCategory::WebAutomation);
        // "search_files" contains "file" as well; both land in filesystem
        assert_eq!(categorize("search_files"), ToolCategory::Filesystem);
    }

    #[test]
    fn test_entry_serializes_with_label() {
        let entry = ToolCatalogEntry::from(RemoteTool {
            name: "calculator".into(),
            description: "Evaluate arithmetic".into(),
            input_schema: json!({"type": "object"}),
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["category"], "Math & Logic");
        assert_eq!(value["schema"]["type"], "object");
    }

    #[test]
    fn test_group_by_category() {
        let entries: Vec<ToolCatalogEntry> = ["calculator", "random_number", "read_file", "echo"]
            .into_iter()
            .map(|name| {
                ToolCatalogEntry::from(RemoteTool {
                    name: name.into(),
                    description: String::new(),
                    input_schema: json!({}),
                })
            })
            .collect();

        let groups = group_by_category(&entries);
        assert_eq!(groups["Math & Logic"].len(), 2);
        assert_eq!(groups["Filesystem"][0].name, "read_file");
        assert_eq!(groups["General"][0].name, "echo");
    }
}
