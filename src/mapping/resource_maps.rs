//! Concurrency-safe index of tools, prompts and resources across servers.
//!
//! Each category owns its own lock so a tool registration never blocks a
//! prompt lookup. Within a category, the alias table and the per-server
//! table are always updated together under that lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::Mutex;

use super::namespace::{enumerate_aliases, qualify_name, DEFAULT_SEPARATOR};
use super::records::{NamespacedPrompt, NamespacedRecord, NamespacedResource, NamespacedTool};
use crate::config::ConflictResolution;
use crate::error::{MusterError, Result};
use crate::types::{PromptDefinition, ResourceDefinition, ToolDefinition};

/// Which table a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    Tool,
    Prompt,
    Resource,
}

/// Settings shared by all three categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsConfig {
    pub separator: String,
    /// Whether re-adding an existing namespaced name replaces the old record.
    pub allow_overwrite: bool,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            allow_overwrite: true,
        }
    }
}

/// Per-call options for `add_*`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Overrides [`MapsConfig::allow_overwrite`] for this call.
    pub allow_update: Option<bool>,
}

impl AddOptions {
    pub fn no_overwrite() -> Self {
        Self {
            allow_update: Some(false),
        }
    }
}

/// Outcome of a policy-aware registration.
#[derive(Debug, Clone)]
pub enum Registration<T> {
    Added(Arc<T>),
    /// The bare name is already owned by another server and the policy is first-wins.
    Skipped { existing_server: String },
}

impl<T> Registration<T> {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// Counts removed by [`ResourceMaps::remove_server`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalSummary {
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
}

impl RemovalSummary {
    pub fn total(&self) -> usize {
        self.tools + self.prompts + self.resources
    }
}

/// Snapshot of index sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStatistics {
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    pub aliases: usize,
    pub servers: usize,
    pub approximate_memory_bytes: usize,
}

struct CategoryState<T> {
    by_alias: HashMap<String, Arc<T>>,
    by_server: HashMap<String, Vec<Arc<T>>>,
}

impl<T> Default for CategoryState<T> {
    fn default() -> Self {
        Self {
            by_alias: HashMap::new(),
            by_server: HashMap::new(),
        }
    }
}

impl<T: NamespacedRecord> CategoryState<T> {
    /// Remove every alias and the server entry that point at `record`.
    fn detach(&mut self, record: &Arc<T>) {
        for alias in record.aliases() {
            if self
                .by_alias
                .get(alias)
                .is_some_and(|owner| Arc::ptr_eq(owner, record))
            {
                self.by_alias.remove(alias);
            }
        }
        if let Some(records) = self.by_server.get_mut(record.server_name()) {
            records.retain(|r| !Arc::ptr_eq(r, record));
            if records.is_empty() {
                self.by_server.remove(record.server_name());
            }
        }
    }

    fn attach(&mut self, record: Arc<T>) {
        for alias in record.aliases() {
            self.by_alias.insert(alias.clone(), Arc::clone(&record));
        }
        self.by_server
            .entry(record.server_name().to_string())
            .or_default()
            .push(record);
    }

    /// Take a bare alias away from its current owner, keeping the owner otherwise intact.
    fn strip_alias(&mut self, owner: &Arc<T>, alias: &str) {
        self.detach(owner);
        let mut updated = T::clone(owner);
        updated.aliases_mut().retain(|a| a != alias);
        self.attach(Arc::new(updated));
    }

    fn existing_record(&self, namespaced: &str) -> Option<&Arc<T>> {
        self.by_alias
            .get(namespaced)
            .filter(|record| record.namespaced_name() == namespaced)
    }

    fn record_count(&self) -> usize {
        self.by_server.values().map(Vec::len).sum()
    }
}

/// One category of the index, generic over the record kind.
pub struct CategoryIndex<T> {
    category: ResourceCategory,
    config: MapsConfig,
    state: Mutex<CategoryState<T>>,
}

impl<T: NamespacedRecord> CategoryIndex<T> {
    pub fn new(category: ResourceCategory, config: MapsConfig) -> Self {
        Self {
            category,
            config,
            state: Mutex::new(CategoryState::default()),
        }
    }

    pub fn category(&self) -> ResourceCategory {
        self.category
    }

    fn qualified(&self, server: &str, name: &str) -> String {
        qualify_name(server, name, &self.config.separator)
    }

    fn check_duplicate(
        &self,
        state: &CategoryState<T>,
        server: &str,
        name: &str,
        allow_update: bool,
    ) -> Result<()> {
        if allow_update {
            return Ok(());
        }
        let namespaced = self.qualified(server, name);
        match state.existing_record(&namespaced) {
            Some(existing) => Err(MusterError::DuplicateName {
                name: namespaced,
                server: existing.server_name().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn insert(&self, state: &mut CategoryState<T>, server: &str, item: T::Item, name: &str) -> Arc<T> {
        let namespaced = self.qualified(server, name);
        if let Some(holder) = state.by_alias.get(&namespaced).cloned() {
            if holder.namespaced_name() == namespaced {
                state.detach(&holder);
            } else {
                // Another record's bare name collides with this qualified name.
                state.strip_alias(&holder, &namespaced);
            }
        }

        let aliases = enumerate_aliases(server, name, &self.config.separator, |alias| {
            state.by_alias.contains_key(alias)
        });
        let record = Arc::new(T::build(server, name, namespaced, aliases, item));
        state.attach(Arc::clone(&record));
        tracing::debug!(
            category = %self.category,
            server,
            name = record.namespaced_name(),
            aliases = record.aliases().len(),
            "registered entry"
        );
        record
    }

    /// Add one record under `name`.
    pub async fn add(
        &self,
        server: &str,
        item: T::Item,
        name: &str,
        options: AddOptions,
    ) -> Result<Arc<T>> {
        let allow_update = options.allow_update.unwrap_or(self.config.allow_overwrite);
        let mut state = self.state.lock().await;
        self.check_duplicate(&state, server, name, allow_update)?;
        Ok(self.insert(&mut state, server, item, name))
    }

    /// Add many records atomically. Nothing is inserted if any entry fails validation.
    pub async fn add_batch(
        &self,
        server: &str,
        items: Vec<T::Item>,
        options: AddOptions,
    ) -> Result<Vec<Arc<T>>> {
        let allow_update = options.allow_update.unwrap_or(self.config.allow_overwrite);
        let mut state = self.state.lock().await;

        if !allow_update {
            let mut seen = HashSet::with_capacity(items.len());
            for item in &items {
                let name = T::natural_name(item);
                self.check_duplicate(&state, server, name, false)?;
                if !seen.insert(name) {
                    return Err(MusterError::DuplicateName {
                        name: self.qualified(server, name),
                        server: server.to_string(),
                    });
                }
            }
        }

        let mut added = Vec::with_capacity(items.len());
        for item in items {
            let name = T::natural_name(&item).to_string();
            added.push(self.insert(&mut state, server, item, &name));
        }
        Ok(added)
    }

    /// Add a record, applying the aggregator's collision policy to the bare name.
    pub async fn register(
        &self,
        server: &str,
        item: T::Item,
        name: &str,
        policy: ConflictResolution,
    ) -> Result<Registration<T>> {
        let mut state = self.state.lock().await;
        if policy != ConflictResolution::Prefix {
            let owner = state
                .by_alias
                .get(name)
                .filter(|owner| owner.server_name() != server)
                .map(|owner| owner.server_name().to_string());
            if let Some(existing_server) = owner {
                if policy == ConflictResolution::Error {
                    return Err(MusterError::NameConflict {
                        name: name.to_string(),
                        server: server.to_string(),
                        existing_server,
                    });
                }
                tracing::warn!(
                    category = %self.category,
                    name,
                    server,
                    existing_server = %existing_server,
                    "skipping entry already provided by another server"
                );
                return Ok(Registration::Skipped { existing_server });
            }
        }
        Ok(Registration::Added(self.insert(&mut state, server, item, name)))
    }

    /// Look up a record by qualified name or bare alias.
    pub async fn get(&self, name: &str) -> Option<Arc<T>> {
        self.state.lock().await.by_alias.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.state.lock().await.by_alias.contains_key(name)
    }

    /// Records owned by `server`, in registration order.
    pub async fn from_server(&self, server: &str) -> Vec<Arc<T>> {
        self.state
            .lock()
            .await
            .by_server
            .get(server)
            .cloned()
            .unwrap_or_default()
    }

    /// Every distinct record, sorted by namespaced name.
    pub async fn records(&self) -> Vec<Arc<T>> {
        let state = self.state.lock().await;
        let mut records: Vec<Arc<T>> = state.by_server.values().flatten().cloned().collect();
        records.sort_by(|a, b| a.namespaced_name().cmp(b.namespaced_name()));
        records
    }

    /// Every alias key, sorted.
    pub async fn names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.by_alias.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop all records for `server`. Returns how many were removed.
    pub async fn remove_server(&self, server: &str) -> usize {
        let mut state = self.state.lock().await;
        let Some(records) = state.by_server.remove(server) else {
            return 0;
        };
        state.by_alias.retain(|_, owner| owner.server_name() != server);
        tracing::debug!(category = %self.category, server, removed = records.len(), "removed server entries");
        records.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.by_alias.clear();
        state.by_server.clear();
    }

    async fn snapshot(&self) -> (usize, usize, HashSet<String>, usize) {
        let state = self.state.lock().await;
        let bytes = state.by_alias.keys().map(String::len).sum::<usize>()
            + state
                .by_server
                .values()
                .flatten()
                .map(|record| record.estimated_size())
                .sum::<usize>();
        (
            state.record_count(),
            state.by_alias.len(),
            state.by_server.keys().cloned().collect(),
            bytes,
        )
    }
}

/// The three category indexes behind one façade.
pub struct ResourceMaps {
    config: MapsConfig,
    tools: CategoryIndex<NamespacedTool>,
    prompts: CategoryIndex<NamespacedPrompt>,
    resources: CategoryIndex<NamespacedResource>,
}

impl Default for ResourceMaps {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMaps {
    pub fn new() -> Self {
        Self::with_config(MapsConfig::default())
    }

    pub fn with_config(config: MapsConfig) -> Self {
        Self {
            tools: CategoryIndex::new(ResourceCategory::Tool, config.clone()),
            prompts: CategoryIndex::new(ResourceCategory::Prompt, config.clone()),
            resources: CategoryIndex::new(ResourceCategory::Resource, config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &MapsConfig {
        &self.config
    }

    pub fn separator(&self) -> &str {
        &self.config.separator
    }

    pub fn tools(&self) -> &CategoryIndex<NamespacedTool> {
        &self.tools
    }

    pub fn prompts(&self) -> &CategoryIndex<NamespacedPrompt> {
        &self.prompts
    }

    pub fn resources(&self) -> &CategoryIndex<NamespacedResource> {
        &self.resources
    }

    // Tools

    pub async fn add_tool(
        &self,
        server: &str,
        tool: ToolDefinition,
        name: &str,
        options: AddOptions,
    ) -> Result<Arc<NamespacedTool>> {
        self.tools.add(server, tool, name, options).await
    }

    pub async fn add_tools(
        &self,
        server: &str,
        tools: Vec<ToolDefinition>,
        options: AddOptions,
    ) -> Result<Vec<Arc<NamespacedTool>>> {
        self.tools.add_batch(server, tools, options).await
    }

    pub async fn register_tool(
        &self,
        server: &str,
        tool: ToolDefinition,
        policy: ConflictResolution,
    ) -> Result<Registration<NamespacedTool>> {
        let name = tool.name.clone();
        self.tools.register(server, tool, &name, policy).await
    }

    pub async fn get_tool(&self, name: &str) -> Option<Arc<NamespacedTool>> {
        self.tools.get(name).await
    }

    pub async fn tools_from_server(&self, server: &str) -> Vec<Arc<NamespacedTool>> {
        self.tools.from_server(server).await
    }

    pub async fn list_tool_names(&self) -> Vec<String> {
        self.tools.names().await
    }

    pub async fn remove_tools_for_server(&self, server: &str) -> usize {
        self.tools.remove_server(server).await
    }

    // Prompts

    pub async fn add_prompt(
        &self,
        server: &str,
        prompt: PromptDefinition,
        name: &str,
        options: AddOptions,
    ) -> Result<Arc<NamespacedPrompt>> {
        self.prompts.add(server, prompt, name, options).await
    }

    pub async fn add_prompts(
        &self,
        server: &str,
        prompts: Vec<PromptDefinition>,
        options: AddOptions,
    ) -> Result<Vec<Arc<NamespacedPrompt>>> {
        self.prompts.add_batch(server, prompts, options).await
    }

    pub async fn register_prompt(
        &self,
        server: &str,
        prompt: PromptDefinition,
        policy: ConflictResolution,
    ) -> Result<Registration<NamespacedPrompt>> {
        let name = prompt.name.clone();
        self.prompts.register(server, prompt, &name, policy).await
    }

    pub async fn get_prompt(&self, name: &str) -> Option<Arc<NamespacedPrompt>> {
        self.prompts.get(name).await
    }

    pub async fn prompts_from_server(&self, server: &str) -> Vec<Arc<NamespacedPrompt>> {
        self.prompts.from_server(server).await
    }

    pub async fn list_prompt_names(&self) -> Vec<String> {
        self.prompts.names().await
    }

    pub async fn remove_prompts_for_server(&self, server: &str) -> usize {
        self.prompts.remove_server(server).await
    }

    // Resources

    pub async fn add_resource(
        &self,
        server: &str,
        resource: ResourceDefinition,
        uri: &str,
        options: AddOptions,
    ) -> Result<Arc<NamespacedResource>> {
        self.resources.add(server, resource, uri, options).await
    }

    pub async fn add_resources(
        &self,
        server: &str,
        resources: Vec<ResourceDefinition>,
        options: AddOptions,
    ) -> Result<Vec<Arc<NamespacedResource>>> {
        self.resources.add_batch(server, resources, options).await
    }

    pub async fn register_resource(
        &self,
        server: &str,
        resource: ResourceDefinition,
        policy: ConflictResolution,
    ) -> Result<Registration<NamespacedResource>> {
        let uri = resource.uri.clone();
        self.resources.register(server, resource, &uri, policy).await
    }

    pub async fn get_resource(&self, uri: &str) -> Option<Arc<NamespacedResource>> {
        self.resources.get(uri).await
    }

    pub async fn resources_from_server(&self, server: &str) -> Vec<Arc<NamespacedResource>> {
        self.resources.from_server(server).await
    }

    pub async fn list_resource_uris(&self) -> Vec<String> {
        self.resources.names().await
    }

    pub async fn remove_resources_for_server(&self, server: &str) -> usize {
        self.resources.remove_server(server).await
    }

    // Whole index

    /// Remove everything `server` registered in all three categories.
    pub async fn remove_server(&self, server: &str) -> RemovalSummary {
        let (tools, prompts, resources) = tokio::join!(
            self.tools.remove_server(server),
            self.prompts.remove_server(server),
            self.resources.remove_server(server),
        );
        RemovalSummary {
            tools,
            prompts,
            resources,
        }
    }

    pub async fn clear(&self) {
        tokio::join!(self.tools.clear(), self.prompts.clear(), self.resources.clear());
    }

    pub async fn has_resource(&self, name: &str, category: ResourceCategory) -> bool {
        match category {
            ResourceCategory::Tool => self.tools.contains(name).await,
            ResourceCategory::Prompt => self.prompts.contains(name).await,
            ResourceCategory::Resource => self.resources.contains(name).await,
        }
    }

    pub async fn statistics(&self) -> MapStatistics {
        let (tools, prompts, resources) = tokio::join!(
            self.tools.snapshot(),
            self.prompts.snapshot(),
            self.resources.snapshot(),
        );
        let mut servers = tools.2;
        servers.extend(prompts.2);
        servers.extend(resources.2);
        MapStatistics {
            tools: tools.0,
            prompts: prompts.0,
            resources: resources.0,
            aliases: tools.1 + prompts.1 + resources.1,
            servers: servers.len(),
            approximate_memory_bytes: tools.3 + prompts.3 + resources.3,
        }
    }
}
