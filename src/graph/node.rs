//! Node declaration: identity, dependency signature, constructor.

use super::GraphError;
use crate::action::BoxFuture;
use crate::errors::BoxError;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased value produced by a node constructor.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

pub(crate) type ConstructFn =
    Arc<dyn Fn(Deps) -> BoxFuture<'static, Result<AnyValue, BoxError>> + Send + Sync>;

/// Trims a fully qualified type name down to its last path segment.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Identity of a node type: the key for memoization and dependency
/// lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl NodeKey {
    /// The key of node type `N`.
    #[must_use]
    pub fn of<N: 'static>() -> Self {
        Self {
            id: TypeId::of::<N>(),
            name: short_type_name::<N>(),
        }
    }

    /// Human-readable node name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Identity of a protocol (capability trait).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolKey {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl ProtocolKey {
    /// The key of protocol `P`, typically a `dyn Trait` type.
    #[must_use]
    pub fn of<P: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: short_type_name::<P>(),
        }
    }
}

pub(crate) enum DependencyKind {
    /// A concrete node, traversed at plan time and constructed before
    /// its dependents.
    Node {
        key: NodeKey,
        descriptor: fn() -> NodeDescriptor,
    },
    /// A protocol binding, resolved from injections at run time.
    Protocol { key: ProtocolKey },
}

/// One entry in a node's declared dependency signature.
pub struct DependencyDecl {
    /// The parameter name, for diagnostics.
    pub name: &'static str,
    pub(crate) kind: DependencyKind,
}

impl DependencyDecl {
    /// Declares a concrete node dependency.
    #[must_use]
    pub fn node<N: Node>(name: &'static str) -> Self {
        Self {
            name,
            kind: DependencyKind::Node {
                key: NodeKey::of::<N>(),
                descriptor: N::descriptor,
            },
        }
    }

    /// Declares a protocol dependency, satisfied by
    /// [`Run::inject_as`](super::Run::inject_as).
    #[must_use]
    pub fn protocol<P: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            name,
            kind: DependencyKind::Protocol {
                key: ProtocolKey::of::<P>(),
            },
        }
    }
}

/// Everything the planner needs to know about a node type: identity,
/// dependency signature, and a type-erased constructor.
pub struct NodeDescriptor {
    pub(crate) key: NodeKey,
    pub(crate) dependencies: Vec<DependencyDecl>,
    pub(crate) construct: ConstructFn,
}

/// The resolved dependencies handed to a node constructor.
///
/// A snapshot taken from the run's memo table and protocol bindings
/// just before the constructor is spawned; lookups are infallible for
/// declared dependencies.
pub struct Deps {
    pub(crate) owner: &'static str,
    pub(crate) values: HashMap<TypeId, AnyValue>,
    pub(crate) protocols: HashMap<TypeId, AnyValue>,
}

impl Deps {
    /// Takes the resolved value of concrete dependency `N`.
    pub fn node<N: Node>(&self) -> Result<Arc<N>, GraphError> {
        self.values
            .get(&TypeId::of::<N>())
            .and_then(|value| Arc::clone(value).downcast::<N>().ok())
            .ok_or(GraphError::MissingDependency {
                node: self.owner,
                dependency: short_type_name::<N>(),
            })
    }

    /// Takes the bound implementation of protocol `P`.
    pub fn protocol<P: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<P>, GraphError> {
        self.protocols
            .get(&TypeId::of::<P>())
            .and_then(|value| value.downcast_ref::<Arc<P>>().cloned())
            .ok_or(GraphError::UnboundProtocol {
                protocol: short_type_name::<P>(),
                node: self.owner,
            })
    }
}

/// A unit of computation in the graph.
///
/// Implementors provide a dependency signature and an async
/// constructor; the type itself is the identity. Within one run a node
/// is constructed at most once and the value is shared by every
/// dependent.
#[async_trait]
pub trait Node: Send + Sync + Sized + 'static {
    /// The declared dependency signature, in parameter order.
    fn dependencies() -> Vec<DependencyDecl> {
        Vec::new()
    }

    /// Constructs the node from its resolved dependencies.
    async fn build(deps: Deps) -> Result<Self, BoxError>;

    /// The planner's view of this node type.
    fn descriptor() -> NodeDescriptor {
        NodeDescriptor {
            key: NodeKey::of::<Self>(),
            dependencies: Self::dependencies(),
            construct: Arc::new(|deps| {
                Box::pin(async move {
                    let value = Self::build(deps).await?;
                    Ok(Arc::new(value) as AnyValue)
                })
            }),
        }
    }
}

/// Implements [`Node`] for a plain input type.
///
/// Inputs carry no dependencies and cannot self-construct: the run
/// fails unless the value was injected with
/// [`Run::given`](crate::graph::Run::given).
///
/// ```rust,ignore
/// struct OrderData { total: u64 }
/// input_node!(OrderData);
/// ```
#[macro_export]
macro_rules! input_node {
    ($ty:ty) => {
        #[$crate::__private::async_trait]
        impl $crate::graph::Node for $ty {
            async fn build(
                _deps: $crate::graph::Deps,
            ) -> Result<Self, $crate::errors::BoxError> {
                Err(concat!(
                    "input `",
                    stringify!($ty),
                    "` must be injected before the run"
                )
                .into())
            }
        }
    };
}
