//! Apply plans.

use indexmap::IndexMap;
use provisioner_config::{
    ConfigResult, DefinitionDocument, ReferenceRule, ResourceGraph, Resolver, build_graph,
};
use provisioner_core::{ResourceDefinition, ResourceKey};
use tracing::info;

/// Fully resolved resources and the order they must be applied in.
#[derive(Debug, Clone)]
pub struct Plan {
    resources: IndexMap<ResourceKey, ResourceDefinition>,
    graph: ResourceGraph,
    levels: Vec<Vec<ResourceKey>>,
}

impl Plan {
    /// Resolve a raw document and build its plan.
    ///
    /// Fails on any configuration error, before a single remote call is made.
    pub fn prepare(
        doc: &DefinitionDocument,
        resolver: &Resolver<'_>,
        rules: &[ReferenceRule],
    ) -> ConfigResult<Self> {
        let resolved = doc.resolve(resolver)?;
        Self::new(resolved, rules)
    }

    /// Build a plan from an already resolved document.
    pub fn new(mut doc: DefinitionDocument, rules: &[ReferenceRule]) -> ConfigResult<Self> {
        let graph = build_graph(&doc, rules)?;

        for def in doc.resources_mut() {
            let key = def.key();
            def.depends_on = graph.dependencies_of(&key).cloned().collect();
        }

        let levels = graph.levels();
        let resources = doc.resources().map(|d| (d.key(), d.clone())).collect();

        info!(
            resources = graph.len(),
            levels = levels.len(),
            external_references = graph.external_references().len(),
            "Built apply plan"
        );

        Ok(Self {
            resources,
            graph,
            levels,
        })
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceDefinition> {
        self.resources.get(key)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.resources.values()
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Resources grouped by dependency level, level 0 first.
    pub fn levels(&self) -> &[Vec<ResourceKey>] {
        &self.levels
    }

    /// Order in which resources are deleted: most-dependent first.
    pub fn teardown_order(&self) -> Vec<ResourceKey> {
        self.levels.iter().rev().flatten().cloned().collect()
    }

    /// Order in which resources are created.
    pub fn create_order(&self) -> Vec<ResourceKey> {
        self.levels.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
