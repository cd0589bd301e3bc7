use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares one category of content: where its files live, where its API
/// lives, and which fields make an entity unique.
///
/// `name` doubles as the content sub-directory under the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeDefinition {
    pub name: String,
    pub api_path: String,
    pub unique_field_paths: Vec<String>,
}

impl ContentTypeDefinition {
    pub fn new<I, S>(name: impl Into<String>, api_path: impl Into<String>, unique_field_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            api_path: api_path.into(),
            unique_field_paths: unique_field_paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ContentTypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.api_path)
    }
}

/// Built-in registry, processed in this order.
pub fn default_definitions() -> Vec<ContentTypeDefinition> {
    vec![
        ContentTypeDefinition::new(
            "agent-releases",
            "/api/agent-releases",
            [
                "$.type",
                "$.version",
                "$.labels.agent_discovered_os",
                "$.labels.agent_discovered_arch",
            ],
        ),
        ContentTypeDefinition::new(
            "monitor-translations",
            "/api/monitor-translations",
            ["$.monitorType", "$.name"],
        ),
        ContentTypeDefinition::new("policy-monitors", "/api/policy-monitors", ["$.name"]),
        ContentTypeDefinition::new(
            "monitor-metadata-policies",
            "/api/policy/metadata/monitor",
            [
                "$.scope",
                "$.subscope",
                "$.targetClassName",
                "$.valueType",
                "$.key",
            ],
        ),
    ]
}
