//! Namespaced records stored in [`super::ResourceMaps`].

use serde::Serialize;

use crate::types::{PromptArgument, PromptDefinition, ResourceDefinition, ToolDefinition};

/// Common shape of tool, prompt and resource records.
pub trait NamespacedRecord: Clone + Send + Sync + 'static {
    /// Upstream definition wrapped by the record.
    type Item: Send;

    /// Build a record from its parts.
    fn build(
        server_name: &str,
        original_name: &str,
        namespaced_name: String,
        aliases: Vec<String>,
        item: Self::Item,
    ) -> Self;

    /// Name the upstream uses for `item` (a URI for resources).
    fn natural_name(item: &Self::Item) -> &str;

    fn server_name(&self) -> &str;
    fn original_name(&self) -> &str;
    fn namespaced_name(&self) -> &str;
    fn aliases(&self) -> &[String];
    fn aliases_mut(&mut self) -> &mut Vec<String>;

    /// Rough byte footprint, used for statistics only.
    fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.server_name().len()
            + self.original_name().len()
            + self.namespaced_name().len()
            + self.aliases().iter().map(String::len).sum::<usize>()
    }
}

/// A tool owned by one upstream server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedTool {
    pub server_name: String,
    pub original_name: String,
    pub namespaced_name: String,
    pub aliases: Vec<String>,
    pub tool: ToolDefinition,
}

impl NamespacedRecord for NamespacedTool {
    type Item = ToolDefinition;

    fn build(
        server_name: &str,
        original_name: &str,
        namespaced_name: String,
        aliases: Vec<String>,
        tool: ToolDefinition,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            original_name: original_name.to_string(),
            namespaced_name,
            aliases,
            tool,
        }
    }

    fn natural_name(item: &ToolDefinition) -> &str {
        &item.name
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn original_name(&self) -> &str {
        &self.original_name
    }

    fn namespaced_name(&self) -> &str {
        &self.namespaced_name
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn aliases_mut(&mut self) -> &mut Vec<String> {
        &mut self.aliases
    }

    fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.server_name.len()
            + self.original_name.len()
            + self.namespaced_name.len()
            + self.aliases.iter().map(String::len).sum::<usize>()
            + self.tool.description.as_ref().map_or(0, String::len)
            + self.tool.input_schema.to_string().len()
    }
}

/// A prompt owned by one upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedPrompt {
    pub server_name: String,
    pub original_name: String,
    pub namespaced_name: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
}

impl NamespacedRecord for NamespacedPrompt {
    type Item = PromptDefinition;

    fn build(
        server_name: &str,
        original_name: &str,
        namespaced_name: String,
        aliases: Vec<String>,
        prompt: PromptDefinition,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            original_name: original_name.to_string(),
            namespaced_name,
            aliases,
            description: prompt.description,
            arguments: prompt.arguments,
        }
    }

    fn natural_name(item: &PromptDefinition) -> &str {
        &item.name
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn original_name(&self) -> &str {
        &self.original_name
    }

    fn namespaced_name(&self) -> &str {
        &self.namespaced_name
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn aliases_mut(&mut self) -> &mut Vec<String> {
        &mut self.aliases
    }
}

/// A resource owned by one upstream server, keyed by URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedResource {
    pub server_name: String,
    pub original_uri: String,
    pub namespaced_uri: String,
    pub aliases: Vec<String>,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

impl NamespacedRecord for NamespacedResource {
    type Item = ResourceDefinition;

    fn build(
        server_name: &str,
        original_uri: &str,
        namespaced_uri: String,
        aliases: Vec<String>,
        resource: ResourceDefinition,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            original_uri: original_uri.to_string(),
            namespaced_uri,
            aliases,
            uri: resource.uri,
            name: resource.name,
            description: resource.description,
            mime_type: resource.mime_type,
        }
    }

    fn natural_name(item: &ResourceDefinition) -> &str {
        &item.uri
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn original_name(&self) -> &str {
        &self.original_uri
    }

    fn namespaced_name(&self) -> &str {
        &self.namespaced_uri
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn aliases_mut(&mut self) -> &mut Vec<String> {
        &mut self.aliases
    }
}
