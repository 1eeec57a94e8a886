//! Resource dependency graph.
//!
//! Edges point from a dependent to the upstream resource it references. A
//! dependent must be deleted before its upstream and created after it.

use crate::{ConfigError, ConfigResult, DefinitionDocument};
use provisioner_core::ResourceKey;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// `kind.field` holds the name of an `upstream` resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRule {
    pub kind: String,
    /// Dotted path into the body, e.g. `dataSourceName` or `target.index`.
    pub field: String,
    pub upstream: String,
}

impl ReferenceRule {
    pub fn new(
        kind: impl Into<String>,
        field: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            field: field.into(),
            upstream: upstream.into(),
        }
    }

    /// Names referenced by a body under this rule. A list field yields one name per element.
    fn referenced_names<'a>(&self, body: &'a Value) -> Vec<&'a str> {
        let Some(value) = self
            .field
            .split('.')
            .try_fold(body, |current, part| match current {
                Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => current.get(part),
            })
        else {
            return Vec::new();
        };

        match value {
            Value::String(s) if !s.is_empty() => vec![s.as_str()],
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Rules for the search resource family.
pub fn default_rules() -> Vec<ReferenceRule> {
    vec![
        ReferenceRule::new("indexers", "dataSourceName", "datasources"),
        ReferenceRule::new("indexers", "targetIndexName", "indexes"),
        ReferenceRule::new("indexers", "skillsetName", "skillsets"),
    ]
}

/// Dependency graph over the resources of one document.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Resources in document order.
    nodes: Vec<ResourceKey>,
    dependencies: HashMap<ResourceKey, BTreeSet<ResourceKey>>,
    dependents: HashMap<ResourceKey, BTreeSet<ResourceKey>>,
    external: Vec<(ResourceKey, ResourceKey)>,
}

/// Build the dependency graph for a document.
///
/// Edges come from the reference rules and from explicit `dependsOn` entries.
/// A rule reference to a name the document does not define is recorded as
/// external; an explicit `dependsOn` on an unknown resource is an error.
pub fn build_graph(
    doc: &DefinitionDocument,
    rules: &[ReferenceRule],
) -> ConfigResult<ResourceGraph> {
    let mut graph = ResourceGraph::default();

    for def in doc.resources() {
        let key = def.key();
        graph.dependencies.entry(key.clone()).or_default();
        graph.dependents.entry(key.clone()).or_default();
        graph.nodes.push(key);
    }

    for def in doc.resources() {
        let key = def.key();

        for rule in rules.iter().filter(|r| r.kind == def.kind) {
            for name in rule.referenced_names(&def.body) {
                let upstream = ResourceKey::new(&rule.upstream, name);
                if doc.contains(&upstream) {
                    graph.add_edge(&key, upstream);
                } else {
                    debug!(
                        resource = %key,
                        reference = %upstream,
                        "Reference to a resource outside the document"
                    );
                    graph.external.push((key.clone(), upstream));
                }
            }
        }

        for upstream in &def.depends_on {
            if !doc.contains(upstream) {
                return Err(ConfigError::InvalidReference(format!(
                    "'{}' depends on unknown resource '{}'",
                    key, upstream
                )));
            }
            graph.add_edge(&key, upstream.clone());
        }
    }

    if let Err(cycle) = graph.detect_cycle() {
        return Err(ConfigError::CycleDetected(cycle));
    }

    Ok(graph)
}

impl ResourceGraph {
    fn add_edge(&mut self, dependent: &ResourceKey, upstream: ResourceKey) {
        self.dependents
            .entry(upstream.clone())
            .or_default()
            .insert(dependent.clone());
        self.dependencies
            .entry(dependent.clone())
            .or_default()
            .insert(upstream);
    }

    pub fn resources(&self) -> &[ResourceKey] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.dependencies.contains_key(key)
    }

    /// Direct upstream resources.
    pub fn dependencies_of(&self, key: &ResourceKey) -> impl Iterator<Item = &ResourceKey> {
        self.dependencies.get(key).into_iter().flatten()
    }

    /// Direct dependents.
    pub fn dependents_of(&self, key: &ResourceKey) -> impl Iterator<Item = &ResourceKey> {
        self.dependents.get(key).into_iter().flatten()
    }

    /// Everything that must exist before `key` can be created.
    pub fn required_before(&self, key: &ResourceKey) -> BTreeSet<ResourceKey> {
        closure(key, &self.dependencies)
    }

    /// Everything that must be torn down before `key` can be deleted.
    pub fn teardown_before(&self, key: &ResourceKey) -> BTreeSet<ResourceKey> {
        closure(key, &self.dependents)
    }

    /// References to resources the document does not define, as `(dependent, target)`.
    pub fn external_references(&self) -> &[(ResourceKey, ResourceKey)] {
        &self.external
    }

    /// Resources grouped by level. Level 0 has no dependencies; every other
    /// resource sits one level above its deepest dependency.
    pub fn levels(&self) -> Vec<Vec<ResourceKey>> {
        let mut memo: HashMap<&ResourceKey, usize> = HashMap::new();
        let mut levels: Vec<Vec<ResourceKey>> = Vec::new();

        for key in &self.nodes {
            let level = self.level_of(key, &mut memo);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(key.clone());
        }

        levels
    }

    fn level_of<'a>(
        &'a self,
        key: &'a ResourceKey,
        memo: &mut HashMap<&'a ResourceKey, usize>,
    ) -> usize {
        if let Some(level) = memo.get(key) {
            return *level;
        }
        let level = self
            .dependencies_of(key)
            .map(|dep| self.level_of(dep, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(key, level);
        level
    }

    /// Detect cycles using DFS.
    fn detect_cycle(&self) -> Result<(), String> {
        let mut visited = HashMap::new();
        let mut rec_stack = HashMap::new();

        for key in &self.nodes {
            if !visited.contains_key(key) {
                if let Some(cycle) = self.dfs_detect_cycle(key, &mut visited, &mut rec_stack) {
                    return Err(cycle);
                }
            }
        }
        Ok(())
    }

    fn dfs_detect_cycle<'a>(
        &'a self,
        node: &'a ResourceKey,
        visited: &mut HashMap<&'a ResourceKey, bool>,
        rec_stack: &mut HashMap<&'a ResourceKey, bool>,
    ) -> Option<String> {
        visited.insert(node, true);
        rec_stack.insert(node, true);

        for dep in self.dependencies_of(node) {
            if !visited.contains_key(dep) {
                if let Some(cycle) = self.dfs_detect_cycle(dep, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.get(dep).copied().unwrap_or(false) {
                return Some(format!("{} -> {}", node, dep));
            }
        }

        rec_stack.insert(node, false);
        None
    }
}

fn closure(
    start: &ResourceKey,
    edges: &HashMap<ResourceKey, BTreeSet<ResourceKey>>,
) -> BTreeSet<ResourceKey> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&ResourceKey> = edges.get(start).into_iter().flatten().collect();

    while let Some(key) = stack.pop() {
        if seen.insert(key.clone()) {
            stack.extend(edges.get(key).into_iter().flatten());
        }
    }

    seen
}
