//! Dependency graph construction and topological ordering.
//!
//! `GraphBuilder` collects descriptors and the edges implied by
//! reference-tagged attributes. `build()` rejects duplicate names, dangling
//! references, and cycles before any provisioning call can be issued. The
//! resulting `Graph` is immutable; ordering uses Kahn's algorithm with
//! declaration-order tie-breaking so runs are deterministic.

use super::types::ResourceDescriptor;
use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Collects resource descriptors and reference edges.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<ResourceDescriptor>,
    index: HashMap<String, usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Reference-tagged attributes already on the
    /// descriptor contribute edges at build time.
    pub fn add_resource(&mut self, descriptor: ResourceDescriptor) -> Result<()> {
        if self.index.contains_key(descriptor.name()) {
            return Err(Error::DuplicateName(descriptor.name().to_string()));
        }
        self.index
            .insert(descriptor.name().to_string(), self.nodes.len());
        self.nodes.push(descriptor);
        Ok(())
    }

    /// Record an edge from `from` to `resource` and mark `attribute` as a
    /// reference to `resource`'s `output`, unresolved until apply time.
    pub fn add_reference(
        &mut self,
        from: &str,
        attribute: &str,
        resource: &str,
        output: &str,
    ) -> Result<()> {
        let Some(&idx) = self.index.get(from) else {
            return Err(Error::DanglingReference {
                from: from.to_string(),
                to: resource.to_string(),
                attribute: attribute.to_string(),
            });
        };
        self.nodes[idx].insert_reference(attribute, resource, output);
        Ok(())
    }

    /// Finalize into an immutable `Graph`, verifying that every referenced
    /// name is registered and that no dependency cycle exists.
    pub fn build(self) -> Result<Graph> {
        let Self { nodes, index } = self;

        // Edge targets must exist before any ordering question makes sense.
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for (attribute, resource, _) in node.references() {
                let Some(&dep) = index.get(resource) else {
                    return Err(Error::DanglingReference {
                        from: node.name().to_string(),
                        to: resource.to_string(),
                        attribute: attribute.to_string(),
                    });
                };
                // Two attributes may reference the same dependency; one edge.
                if !dependencies[i].contains(&dep) {
                    dependencies[i].push(dep);
                }
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(i);
            }
        }
        for list in &mut dependents {
            list.sort_unstable();
        }

        if let Some(members) = find_cycle(&nodes, &dependencies) {
            return Err(Error::CycleDetected(members.join(", ")));
        }

        Ok(Graph {
            nodes,
            index,
            dependencies,
            dependents,
        })
    }
}

/// Depth-first search for a back-edge. Returns the cycle members, in the
/// order they appear on the traversal stack.
fn find_cycle(nodes: &[ResourceDescriptor], dependencies: &[Vec<usize>]) -> Option<Vec<String>> {
    const WHITE: u8 = 0;
    const GREY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit(
        at: usize,
        color: &mut [u8],
        stack: &mut Vec<usize>,
        dependencies: &[Vec<usize>],
    ) -> Option<usize> {
        color[at] = GREY;
        stack.push(at);
        for &dep in &dependencies[at] {
            match color[dep] {
                GREY => return Some(dep),
                WHITE => {
                    if let Some(entry) = visit(dep, color, stack, dependencies) {
                        return Some(entry);
                    }
                }
                _ => {}
            }
        }
        color[at] = BLACK;
        stack.pop();
        None
    }

    let mut color = vec![WHITE; nodes.len()];
    for start in 0..nodes.len() {
        if color[start] != WHITE {
            continue;
        }
        let mut stack = Vec::new();
        if let Some(entry) = visit(start, &mut color, &mut stack, dependencies) {
            let from = stack.iter().position(|&n| n == entry).unwrap_or(0);
            return Some(
                stack[from..]
                    .iter()
                    .map(|&n| nodes[n].name().to_string())
                    .collect(),
            );
        }
    }
    None
}

/// Immutable set of descriptors plus directed dependency edges.
///
/// Read-only once apply begins.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<ResourceDescriptor>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of dependency edges (distinct per node pair).
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    pub fn node(&self, idx: usize) -> &ResourceDescriptor {
        &self.nodes[idx]
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.nodes.iter()
    }

    pub(crate) fn dependencies_of(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    pub(crate) fn dependents_of(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Node indexes in apply order: Kahn's algorithm, ties broken by
    /// declaration order.
    pub(crate) fn topo_indices(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(current)) = ready.pop() {
            order.push(current);
            for &dependent in &self.dependents[current] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        order
    }

    /// Resource names in apply order.
    pub fn execution_order(&self) -> Vec<String> {
        self.topo_indices()
            .into_iter()
            .map(|i| self.nodes[i].name().to_string())
            .collect()
    }

    /// Names grouped by graph depth. Nodes within one wave have no ordering
    /// constraint between them and may be applied concurrently.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut depth = vec![0usize; self.nodes.len()];
        for &i in &self.topo_indices() {
            depth[i] = self.dependencies[i]
                .iter()
                .map(|&d| depth[d] + 1)
                .max()
                .unwrap_or(0);
        }

        let levels = depth.iter().max().map_or(0, |&d| d + 1);
        let mut waves = vec![Vec::new(); levels];
        for (i, node) in self.nodes.iter().enumerate() {
            waves[depth[i]].push(node.name().to_string());
        }
        waves
    }
}
