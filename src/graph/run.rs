//! Run contexts and the level scheduler.

use super::node::{AnyValue, DependencyKind, Deps, Node};
use super::plan::{build_plan, Graph, Plan};
use super::GraphError;
use crate::action::BoxFuture;
use crate::cancellation::CancellationToken;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;
use uuid::Uuid;

/// Identity of one graph run, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunId(Uuid);

impl RunId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Builds the reusable plan for root node `R`.
///
/// Cycle detection happens here, once; the returned [`Graph`] can be
/// kept for the process lifetime and run many times.
pub fn graph<R: Node>() -> Result<Graph<R>, super::CycleError> {
    let plan = build_plan(R::descriptor())?;
    debug!(
        root = plan.root.name,
        nodes = plan.nodes.len(),
        levels = plan.levels.len(),
        "graph plan built"
    );
    Ok(Graph {
        plan: Arc::new(plan),
        _marker: PhantomData,
    })
}

/// One-shot composition: plan and execute `R` with no injections.
///
/// For runs that need inputs or protocol bindings, build with
/// [`graph`] and chain [`Run::given`] / [`Run::inject_as`].
pub async fn compose<R: Node>() -> Result<Arc<R>, GraphError> {
    graph::<R>()?.run().await
}

impl<R: Node> Graph<R> {
    /// Starts a single-shot run context for this plan.
    #[must_use]
    pub fn run(&self) -> Run<R> {
        Run {
            plan: Arc::clone(&self.plan),
            injected: HashMap::new(),
            protocols: HashMap::new(),
            token: CancellationToken::new(),
            _marker: PhantomData,
        }
    }
}

/// A single-shot run context: injections, protocol bindings, and a
/// cancellation token. Awaiting it executes the plan.
pub struct Run<R: Node> {
    plan: Arc<Plan>,
    injected: HashMap<TypeId, AnyValue>,
    protocols: HashMap<TypeId, AnyValue>,
    token: CancellationToken,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Node> Run<R> {
    /// Injects a value, binding its node type and short-circuiting that
    /// node's construction.
    #[must_use]
    pub fn inject<V: Send + Sync + 'static>(mut self, value: V) -> Self {
        self.injected.insert(TypeId::of::<V>(), Arc::new(value));
        self
    }

    /// Injects a primary input. Alias for [`inject`](Self::inject),
    /// reads better at call sites.
    #[must_use]
    pub fn given<V: Send + Sync + 'static>(self, value: V) -> Self {
        self.inject(value)
    }

    /// Binds protocol `P` to a concrete implementation.
    #[must_use]
    pub fn inject_as<P: ?Sized + Send + Sync + 'static>(mut self, value: Arc<P>) -> Self {
        self.protocols.insert(TypeId::of::<P>(), Arc::new(value));
        self
    }

    /// Attaches an external cancellation token to the run.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Executes the plan: level by level, nodes within a level
    /// concurrently, one construction per node type.
    pub async fn execute(self) -> Result<Arc<R>, GraphError> {
        let run_id = RunId::new();
        let token = self.token;
        let mut memo: HashMap<TypeId, AnyValue> = self.injected;

        for (level_index, level) in self.plan.levels.iter().enumerate() {
            if token.is_cancelled() {
                return Err(GraphError::Cancelled {
                    reason: token.reason().unwrap_or_default(),
                });
            }

            let mut tasks = JoinSet::new();
            for id in level {
                if memo.contains_key(id) {
                    // Pre-injected: construction is short-circuited.
                    continue;
                }
                let node = &self.plan.nodes[id];

                // Snapshot the declared dependencies so the spawned
                // constructor owns everything it needs.
                let mut values = HashMap::new();
                let mut protocol_values = HashMap::new();
                for dependency in &node.descriptor.dependencies {
                    match &dependency.kind {
                        DependencyKind::Node { key, .. } => {
                            let value = memo.get(&key.id).ok_or(GraphError::MissingDependency {
                                node: node.descriptor.key.name,
                                dependency: key.name,
                            })?;
                            values.insert(key.id, Arc::clone(value));
                        }
                        DependencyKind::Protocol { key } => {
                            let bound =
                                self.protocols
                                    .get(&key.id)
                                    .ok_or(GraphError::UnboundProtocol {
                                        protocol: key.name,
                                        node: node.descriptor.key.name,
                                    })?;
                            protocol_values.insert(key.id, Arc::clone(bound));
                        }
                    }
                }

                let deps = Deps {
                    owner: node.descriptor.key.name,
                    values,
                    protocols: protocol_values,
                };
                let construct = Arc::clone(&node.descriptor.construct);
                let key = node.descriptor.key;
                debug!(%run_id, level = level_index, node = key.name, "constructing node");
                tasks.spawn(async move { (key, construct(deps).await) });
            }

            loop {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        None => break,
                        Some(Ok((key, Ok(value)))) => {
                            memo.insert(key.id, value);
                        }
                        Some(Ok((key, Err(source)))) => {
                            token.cancel(format!("node '{}' failed", key.name));
                            tasks.abort_all();
                            return Err(GraphError::Construction {
                                node: key.name,
                                source,
                            });
                        }
                        Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Some(Err(_)) => {}
                    },
                    () = token.cancelled() => {
                        tasks.abort_all();
                        return Err(GraphError::Cancelled {
                            reason: token.reason().unwrap_or_default(),
                        });
                    }
                }
            }
        }

        memo.remove(&self.plan.root.id)
            .and_then(|value| value.downcast::<R>().ok())
            .ok_or(GraphError::MissingRoot {
                node: self.plan.root.name,
            })
    }
}

impl<R: Node> IntoFuture for Run<R> {
    type Output = Result<Arc<R>, GraphError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

#[cfg(test)]
mod tests {
    use super::super::node::DependencyDecl;
    use super::*;
    use crate::errors::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    static LEAF_BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct SleepyA(u64);
    struct SleepyB(u64);
    struct SleepyC(u64);
    struct Sum(u64);

    #[async_trait]
    impl Node for SleepyA {
        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(SleepyA(1))
        }
    }

    #[async_trait]
    impl Node for SleepyB {
        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(SleepyB(2))
        }
    }

    #[async_trait]
    impl Node for SleepyC {
        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(SleepyC(3))
        }
    }

    #[async_trait]
    impl Node for Sum {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![
                DependencyDecl::node::<SleepyA>("a"),
                DependencyDecl::node::<SleepyB>("b"),
                DependencyDecl::node::<SleepyC>("c"),
            ]
        }

        async fn build(deps: Deps) -> Result<Self, BoxError> {
            let a = deps.node::<SleepyA>()?;
            let b = deps.node::<SleepyB>()?;
            let c = deps.node::<SleepyC>()?;
            Ok(Sum(a.0 + b.0 + c.0))
        }
    }

    #[tokio::test]
    async fn siblings_run_in_parallel() {
        let g = graph::<Sum>().unwrap();

        let start = Instant::now();
        let result = g.run().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(result.0, 6);
        assert!(
            elapsed < Duration::from_millis(80),
            "siblings were serialized: {elapsed:?}"
        );
    }

    struct CountedLeaf;
    struct Left(u32);
    struct Right(u32);
    struct Diamond(u32);

    #[async_trait]
    impl Node for CountedLeaf {
        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            LEAF_BUILDS.fetch_add(1, Ordering::SeqCst);
            Ok(CountedLeaf)
        }
    }

    #[async_trait]
    impl Node for Left {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![DependencyDecl::node::<CountedLeaf>("leaf")]
        }

        async fn build(deps: Deps) -> Result<Self, BoxError> {
            deps.node::<CountedLeaf>()?;
            Ok(Left(1))
        }
    }

    #[async_trait]
    impl Node for Right {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![DependencyDecl::node::<CountedLeaf>("leaf")]
        }

        async fn build(deps: Deps) -> Result<Self, BoxError> {
            deps.node::<CountedLeaf>()?;
            Ok(Right(2))
        }
    }

    #[async_trait]
    impl Node for Diamond {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![
                DependencyDecl::node::<Left>("left"),
                DependencyDecl::node::<Right>("right"),
            ]
        }

        async fn build(deps: Deps) -> Result<Self, BoxError> {
            Ok(Diamond(deps.node::<Left>()?.0 + deps.node::<Right>()?.0))
        }
    }

    #[tokio::test]
    async fn shared_dependency_is_constructed_once() {
        LEAF_BUILDS.store(0, Ordering::SeqCst);
        let g = graph::<Diamond>().unwrap();

        let result = g.run().await.unwrap();
        assert_eq!(result.0, 3);
        assert_eq!(LEAF_BUILDS.load(Ordering::SeqCst), 1);

        // A second run constructs again: memoization is per run.
        let _ = g.run().await.unwrap();
        assert_eq!(LEAF_BUILDS.load(Ordering::SeqCst), 2);
    }

    #[derive(Clone)]
    struct OrderData {
        total: u64,
    }
    crate::input_node!(OrderData);

    #[derive(Debug)]
    struct OrderSummary(String);

    #[async_trait]
    impl Node for OrderSummary {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![DependencyDecl::node::<OrderData>("order")]
        }

        async fn build(deps: Deps) -> Result<Self, BoxError> {
            let order = deps.node::<OrderData>()?;
            Ok(OrderSummary(format!("total={}", order.total)))
        }
    }

    #[tokio::test]
    async fn injected_inputs_short_circuit_construction() {
        let g = graph::<OrderSummary>().unwrap();

        let result = g.run().given(OrderData { total: 99 }).await.unwrap();
        assert_eq!(result.0, "total=99");
    }

    #[tokio::test]
    async fn missing_input_fails_with_the_node_identity() {
        let g = graph::<OrderSummary>().unwrap();

        let err = g.run().await.unwrap_err();
        match err {
            GraphError::Construction { node, .. } => assert_eq!(node, "OrderData"),
            other => panic!("unexpected error: {other}"),
        }
    }

    trait Charger: Send + Sync {
        fn charge(&self) -> String;
    }

    struct MockCharger;
    impl Charger for MockCharger {
        fn charge(&self) -> String {
            "mock-999".to_string()
        }
    }

    struct StripeCharger;
    impl Charger for StripeCharger {
        fn charge(&self) -> String {
            "stripe-999".to_string()
        }
    }

    #[derive(Debug)]
    struct PayNode(String);

    #[async_trait]
    impl Node for PayNode {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![DependencyDecl::protocol::<dyn Charger>("charger")]
        }

        async fn build(deps: Deps) -> Result<Self, BoxError> {
            let charger = deps.protocol::<dyn Charger>()?;
            Ok(PayNode(charger.charge()))
        }
    }

    #[tokio::test]
    async fn protocol_bindings_swap_without_touching_the_node() {
        let g = graph::<PayNode>().unwrap();

        let mocked = g
            .run()
            .inject_as::<dyn Charger>(Arc::new(MockCharger))
            .await
            .unwrap();
        assert_eq!(mocked.0, "mock-999");

        let real = g
            .run()
            .inject_as::<dyn Charger>(Arc::new(StripeCharger))
            .await
            .unwrap();
        assert_eq!(real.0, "stripe-999");
    }

    #[tokio::test]
    async fn unbound_protocol_is_a_structured_error() {
        let g = graph::<PayNode>().unwrap();

        let err = g.run().await.unwrap_err();
        match err {
            GraphError::UnboundProtocol { protocol, node } => {
                assert!(protocol.contains("Charger"));
                assert_eq!(node, "PayNode");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct FailsFast;
    struct SlowSibling;
    #[derive(Debug)]
    struct FanIn;

    #[async_trait]
    impl Node for FailsFast {
        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err("payment gateway unreachable".into())
        }
    }

    #[async_trait]
    impl Node for SlowSibling {
        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(SlowSibling)
        }
    }

    #[async_trait]
    impl Node for FanIn {
        fn dependencies() -> Vec<DependencyDecl> {
            vec![
                DependencyDecl::node::<FailsFast>("f"),
                DependencyDecl::node::<SlowSibling>("s"),
            ]
        }

        async fn build(_deps: Deps) -> Result<Self, BoxError> {
            Ok(FanIn)
        }
    }

    #[tokio::test]
    async fn first_failure_cancels_siblings() {
        let g = graph::<FanIn>().unwrap();

        let start = Instant::now();
        let err = g.run().await.unwrap_err();
        let elapsed = start.elapsed();

        match err {
            GraphError::Construction { node, source } => {
                assert_eq!(node, "FailsFast");
                assert!(source.to_string().contains("unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            elapsed < Duration::from_secs(2),
            "slow sibling was not cancelled: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn external_cancellation_stops_the_run() {
        let g = graph::<FanIn>().unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel("operator abort");
        });

        // SlowSibling keeps level 0 busy long enough for the token to
        // fire; FailsFast is slower than the cancel here.
        let err = g.run().with_token(token).await.unwrap_err();
        assert!(matches!(
            err,
            GraphError::Cancelled { .. } | GraphError::Construction { .. }
        ));
    }

    #[tokio::test]
    async fn dependency_values_are_present_before_dependents_run() {
        // Level ordering: Sum's build reads all three leaves from the
        // memo snapshot; a missing one would surface as
        // MissingDependency rather than a wrong answer.
        let g = graph::<Sum>().unwrap();
        for _ in 0..5 {
            let result = g.run().await.unwrap();
            assert_eq!(result.0, 6);
        }
    }
}
