use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::validate::ConfigError;

use super::registry::{ServiceRegistry, ServiceSpec};

/// Dependency graph over registered services.
///
/// Edges point from dependency to dependent (if `api` depends on `redis`,
/// the edge is `redis -> api`). Node indices follow registration order, which
/// is what makes the topological sort below stable.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from specs in registration order. Fails if any
    /// `depends_on` names a service that is not in `specs`.
    pub fn from_specs(specs: &[ServiceSpec]) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        for spec in specs {
            let idx = graph.add_node(spec.name.clone());
            node_map.insert(spec.name.clone(), idx);
        }

        for spec in specs {
            let dependent_idx = node_map[&spec.name];
            for dep in &spec.depends_on {
                let dep_idx = node_map.get(dep).ok_or_else(|| ConfigError::UnknownService {
                    name: dep.clone(),
                    available: specs.iter().map(|s| s.name.clone()).collect(),
                })?;
                graph.add_edge(*dep_idx, dependent_idx, ());
            }
        }

        Ok(Self { graph, node_map })
    }

    /// Kahn's algorithm. Among services whose dependencies are all placed,
    /// the one registered first goes next, so identical configs always yield
    /// identical plans.
    pub fn start_order(&self) -> Result<Vec<String>, ConfigError> {
        let mut in_degree: BTreeMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph
                        .neighbors_directed(idx, Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        let mut ready: BTreeSet<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(idx) = ready.pop_first() {
            order.push(self.graph[idx].clone());
            for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .map(|(&idx, _)| self.graph[idx].clone())
                .collect();
            return Err(ConfigError::Cycle(stuck));
        }

        Ok(order)
    }

    /// Everything that transitively depends on `name`, excluding `name`.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.node_map.get(name) else {
            return BTreeSet::new();
        };
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Everything `name` transitively depends on, excluding `name`.
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.node_map.get(name) else {
            return BTreeSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(idx) = dfs.next(reversed) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }
}

/// An ordered, immutable sequence of services to start.
#[derive(Debug, Clone)]
pub struct OrchestrationPlan {
    order: Vec<ServiceSpec>,
}

impl OrchestrationPlan {
    /// Plan every registered service.
    pub fn build(registry: &ServiceRegistry) -> Result<Self, ConfigError> {
        let graph = DependencyGraph::from_specs(registry.specs())?;
        let order = graph
            .start_order()?
            .into_iter()
            .filter_map(|name| registry.get(&name).cloned())
            .collect();
        Ok(Self { order })
    }

    /// Keep only the services in `scope`, preserving plan order.
    pub fn restricted_to(self, scope: &BTreeSet<String>) -> Self {
        Self {
            order: self
                .order
                .into_iter()
                .filter(|spec| scope.contains(&spec.name))
                .collect(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServiceSpec> {
        self.order.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<'a> IntoIterator for &'a OrchestrationPlan {
    type Item = &'a ServiceSpec;
    type IntoIter = std::slice::Iter<'a, ServiceSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}
