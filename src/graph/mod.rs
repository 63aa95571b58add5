//! Graph execution: typed dependency resolution with level parallelism.
//!
//! Applications declare computation [`Node`]s: a type, its dependency
//! signature, and an async constructor. A [`Graph`] built from a root
//! node is an immutable plan — the transitive dependency DAG,
//! cycle-checked and annotated with levels — reusable across runs.
//! Each [`Run`] resolves the plan level by level, constructing
//! independent nodes concurrently and memoizing one value per node
//! type.
//!
//! Protocol dependencies are the injection seams: a node can depend on
//! a capability trait instead of a concrete node, and the caller binds
//! an implementation per run with [`Run::inject_as`].

mod node;
mod plan;
mod run;

pub use node::{DependencyDecl, Deps, Node, NodeDescriptor, NodeKey, ProtocolKey};
pub use plan::{Graph, GraphStats};
pub use run::{compose, graph, Run, RunId};

use crate::errors::BoxError;
use thiserror::Error;

/// A dependency cycle discovered while building a plan.
///
/// The `cycle` path starts and ends with the same node.
#[derive(Debug, Clone, Error)]
#[error("dependency cycle: {}", cycle.join(" -> "))]
pub struct CycleError {
    /// The node names along the cycle, first node repeated at the end.
    pub cycle: Vec<String>,
}

/// Errors from plan building and graph resolution.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency graph is not acyclic.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A node declared a protocol dependency that no injection bound.
    #[error("protocol '{protocol}' required by node '{node}' is not bound")]
    UnboundProtocol {
        /// The protocol's type name.
        protocol: &'static str,
        /// The node that requires it.
        node: &'static str,
    },

    /// A node asked for a dependency that is not in its resolved set.
    ///
    /// Level ordering makes this unreachable for declared
    /// dependencies; seeing it means the node accessed a type it never
    /// declared.
    #[error("node '{node}' accessed undeclared dependency '{dependency}'")]
    MissingDependency {
        /// The requesting node.
        node: &'static str,
        /// The missing dependency's type name.
        dependency: &'static str,
    },

    /// A node's constructor failed.
    #[error("node '{node}' failed to construct: {source}")]
    Construction {
        /// The failing node.
        node: &'static str,
        /// The constructor's error.
        #[source]
        source: BoxError,
    },

    /// The run was cancelled before completion.
    #[error("run cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// The plan finished without producing the root value.
    #[error("no value was produced for root node '{node}'")]
    MissingRoot {
        /// The root node's name.
        node: &'static str,
    },
}
