//! Plan building: traversal, cycle detection, level assignment.

use super::node::{DependencyKind, Node, NodeDescriptor, NodeKey};
use super::CycleError;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) struct PlanNode {
    pub(crate) descriptor: NodeDescriptor,
    pub(crate) level: usize,
}

/// The immutable analysis of a root node's transitive dependency DAG.
pub(crate) struct Plan {
    pub(crate) root: NodeKey,
    pub(crate) nodes: HashMap<TypeId, PlanNode>,
    /// Node ids grouped by level, ascending; order within a level
    /// follows discovery order.
    pub(crate) levels: Vec<Vec<TypeId>>,
    pub(crate) edge_count: usize,
}

/// Static structure numbers for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    /// Distinct node types reachable from the root.
    pub node_count: usize,
    /// Concrete dependency edges.
    pub edge_count: usize,
    /// Highest level (leaves are level 0).
    pub max_depth: usize,
    /// Number of levels; nodes within one level are independent.
    pub parallel_groups: usize,
}

struct PlanBuilder {
    nodes: HashMap<TypeId, PlanNode>,
    discovery: Vec<(TypeId, usize)>,
    path: Vec<NodeKey>,
    edge_count: usize,
}

impl PlanBuilder {
    fn visit(&mut self, descriptor: NodeDescriptor) -> Result<usize, CycleError> {
        let key = descriptor.key;
        if let Some(existing) = self.nodes.get(&key.id) {
            return Ok(existing.level);
        }

        if let Some(first) = self.path.iter().position(|k| k.id == key.id) {
            let mut cycle: Vec<String> =
                self.path[first..].iter().map(|k| k.name.to_string()).collect();
            cycle.push(key.name.to_string());
            return Err(CycleError { cycle });
        }

        self.path.push(key);
        let mut level = 0;
        for dependency in &descriptor.dependencies {
            if let DependencyKind::Node { descriptor, .. } = &dependency.kind {
                self.edge_count += 1;
                let dep_level = self.visit(descriptor())?;
                level = level.max(dep_level + 1);
            }
            // Protocol dependencies resolve from injections at run
            // time; they contribute no level and are not traversed.
        }
        self.path.pop();

        self.nodes.insert(key.id, PlanNode { descriptor, level });
        self.discovery.push((key.id, level));
        Ok(level)
    }
}

pub(crate) fn build_plan(root: NodeDescriptor) -> Result<Plan, CycleError> {
    let root_key = root.key;
    let mut builder = PlanBuilder {
        nodes: HashMap::new(),
        discovery: Vec::new(),
        path: Vec::new(),
        edge_count: 0,
    };
    let max_level = builder.visit(root)?;

    let mut levels: Vec<Vec<TypeId>> = vec![Vec::new(); max_level + 1];
    for (id, level) in &builder.discovery {
        levels[*level].push(*id);
    }

    Ok(Plan {
        root: root_key,
        nodes: builder.nodes,
        levels,
        edge_count: builder.edge_count,
    })
}

/// A pre-built, reusable plan for root node `R`.
///
/// Build once with [`graph`](super::graph), run many times with
/// [`Graph::run`].
pub struct Graph<R: Node> {
    pub(crate) plan: Arc<Plan>,
    pub(crate) _marker: PhantomData<fn() -> R>,
}

impl<R: Node> Clone for Graph<R> {
    fn clone(&self) -> Self {
        Self {
            plan: Arc::clone(&self.plan),
            _marker: PhantomData,
        }
    }
}

impl<R: Node> std::fmt::Debug for Graph<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("root", &self.plan.root.name)
            .field("nodes", &self.plan.nodes.len())
            .field("levels", &self.plan.levels.len())
            .finish()
    }
}

impl<R: Node> Graph<R> {
    /// Structure numbers without executing anything.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.plan.nodes.len(),
            edge_count: self.plan.edge_count,
            max_depth: self.plan.levels.len().saturating_sub(1),
            parallel_groups: self.plan.levels.len(),
        }
    }

    /// Renders the dependency graph in DOT format.
    ///
    /// Concrete edges are solid, protocol requirements dashed.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph dependencies {\n");
        for level in &self.plan.levels {
            for id in level {
                let node = &self.plan.nodes[id];
                let _ = writeln!(out, "  \"{}\";", node.descriptor.key.name);
                for dependency in &node.descriptor.dependencies {
                    match &dependency.kind {
                        DependencyKind::Node { key, .. } => {
                            let _ = writeln!(
                                out,
                                "  \"{}\" -> \"{}\";",
                                node.descriptor.key.name, key.name
                            );
                        }
                        DependencyKind::Protocol { key } => {
                            let _ = writeln!(
                                out,
                                "  \"{}\" -> \"{}\" [style=dashed];",
                                node.descriptor.key.name, key.name
                            );
                        }
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }
}
