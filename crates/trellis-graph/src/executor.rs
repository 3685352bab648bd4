use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use trellis_core::{Result, TrellisError};

use crate::edge::{Edge, Route};
use crate::step::Step;

/// Builder for a [`Graph`]. All wiring mistakes — duplicate step names,
/// edges to unregistered steps, a second outgoing edge on the same step —
/// surface here as errors, never at run time.
pub struct GraphBuilder<S> {
    steps: HashMap<String, Box<dyn Step<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: Option<String>,
}

impl<S: Send> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }

    fn require_step(&self, name: &str) -> Result<()> {
        if self.steps.contains_key(name) {
            Ok(())
        } else {
            Err(TrellisError::UnknownStep(name.to_string()))
        }
    }

    /// Register a step under a unique name.
    pub fn step(mut self, name: impl Into<String>, body: impl Step<S> + 'static) -> Result<Self> {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(TrellisError::DuplicateStep(name));
        }
        self.steps.insert(name, Box::new(body));
        Ok(self)
    }

    /// Set the entry step.
    pub fn entry(mut self, name: &str) -> Result<Self> {
        self.require_step(name)?;
        self.entry = Some(name.to_string());
        Ok(self)
    }

    /// Add an unconditional edge from `from` to `to`.
    pub fn edge(mut self, from: &str, to: &str) -> Result<Self> {
        self.require_step(from)?;
        self.require_step(to)?;
        if self.edges.contains_key(from) {
            return Err(TrellisError::DuplicateEdge(from.to_string()));
        }
        self.edges
            .insert(from.to_string(), Edge::Direct(to.to_string()));
        Ok(self)
    }

    /// Add a conditional edge: after `from` runs, `router` inspects the
    /// state and the returned route is looked up in `routes`.
    pub fn branch(
        mut self,
        from: &str,
        router: impl Fn(&S) -> Route + Send + Sync + 'static,
        routes: &[(&str, &str)],
    ) -> Result<Self> {
        self.require_step(from)?;
        if self.edges.contains_key(from) {
            return Err(TrellisError::DuplicateEdge(from.to_string()));
        }
        let mut table = HashMap::with_capacity(routes.len());
        for (label, to) in routes {
            self.require_step(to)?;
            table.insert(Route::new(*label), (*to).to_string());
        }
        self.edges.insert(
            from.to_string(),
            Edge::Branch {
                router: Box::new(router),
                routes: table,
            },
        );
        Ok(self)
    }

    /// Finalize the graph. Requires an entry step.
    pub fn build(self) -> Result<Graph<S>> {
        let entry = self
            .entry
            .ok_or_else(|| TrellisError::Config("graph has no entry step".into()))?;
        Ok(Graph {
            steps: self.steps,
            edges: self.edges,
            entry,
        })
    }
}

/// An immutable step graph.
///
/// Execution starts at the entry step and follows edges until it reaches a
/// step with no outgoing edge (the implicit terminal). The executor itself
/// imposes no step budget: a cycle with no externally enforced bound loops
/// forever by design — bounding cycles (e.g. via a retry ceiling in the
/// state) is the graph designer's responsibility.
pub struct Graph<S> {
    steps: HashMap<String, Box<dyn Step<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
}

impl<S: Send> Graph<S> {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Drive the graph from the entry step to a terminal step, returning
    /// the final state.
    pub async fn run(&self, mut state: S) -> Result<S> {
        let mut current = self.entry.clone();

        loop {
            let step = self
                .steps
                .get(&current)
                .ok_or_else(|| TrellisError::UnknownStep(current.clone()))?;

            info!(step = %current, "running step");
            let started = Instant::now();
            step.run(&mut state).await?;
            debug!(
                step = %current,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "step complete"
            );

            match self.edges.get(&current) {
                None => {
                    debug!(step = %current, "no outgoing edge, run complete");
                    return Ok(state);
                }
                Some(Edge::Direct(next)) => {
                    current = next.clone();
                }
                Some(Edge::Branch { router, routes }) => {
                    let route = router(&state);
                    match routes.get(&route) {
                        Some(next) => {
                            debug!(step = %current, route = %route, next = %next, "conditional route");
                            current = next.clone();
                        }
                        None => {
                            return Err(TrellisError::Routing {
                                step: current,
                                label: route.label().to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{FnStep, NoopStep};
    use futures::future::BoxFuture;

    #[derive(Debug, Default)]
    struct Trace {
        visited: Vec<&'static str>,
        flag: bool,
        laps: u32,
    }

    struct Record(&'static str);

    impl Step<Trace> for Record {
        fn run<'a>(&'a self, state: &'a mut Trace) -> BoxFuture<'a, trellis_core::Result<()>> {
            Box::pin(async move {
                state.visited.push(self.0);
                Ok(())
            })
        }
    }

    struct Lap;

    impl Step<Trace> for Lap {
        fn run<'a>(&'a self, state: &'a mut Trace) -> BoxFuture<'a, trellis_core::Result<()>> {
            Box::pin(async move {
                state.laps += 1;
                Ok(())
            })
        }
    }

    fn record(name: &'static str) -> Record {
        Record(name)
    }

    #[tokio::test]
    async fn test_linear_run() {
        let graph = GraphBuilder::new()
            .step("a", record("a"))
            .unwrap()
            .step("b", record("b"))
            .unwrap()
            .step("c", record("c"))
            .unwrap()
            .entry("a")
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .edge("b", "c")
            .unwrap()
            .build()
            .unwrap();

        let state = graph.run(Trace::default()).await.unwrap();
        assert_eq!(state.visited, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_conditional_routing() {
        let graph = GraphBuilder::new()
            .step("start", record("start"))
            .unwrap()
            .step("left", record("left"))
            .unwrap()
            .step("right", record("right"))
            .unwrap()
            .entry("start")
            .unwrap()
            .branch(
                "start",
                |s: &Trace| {
                    if s.flag {
                        Route::new("yes")
                    } else {
                        Route::new("no")
                    }
                },
                &[("yes", "left"), ("no", "right")],
            )
            .unwrap()
            .build()
            .unwrap();

        let state = graph.run(Trace::default()).await.unwrap();
        assert_eq!(state.visited, vec!["start", "right"]);

        let state = graph
            .run(Trace {
                flag: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(state.visited, vec!["start", "left"]);
    }

    #[tokio::test]
    async fn test_unmapped_route_is_fatal() {
        let graph = GraphBuilder::new()
            .step("start", record("start"))
            .unwrap()
            .step("next", record("next"))
            .unwrap()
            .entry("start")
            .unwrap()
            .branch(
                "start",
                |_: &Trace| Route::new("elsewhere"),
                &[("mapped", "next")],
            )
            .unwrap()
            .build()
            .unwrap();

        let err = graph.run(Trace::default()).await.unwrap_err();
        match err {
            TrellisError::Routing { step, label } => {
                assert_eq!(step, "start");
                assert_eq!(label, "elsewhere");
            }
            other => panic!("expected Routing error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_state_bounded_cycle_terminates() {
        // The executor has no cycle guard; this cycle terminates only
        // because the router checks a counter in the state. An unbounded
        // router here would loop forever, which is the documented contract.
        let graph = GraphBuilder::new()
            .step("lap", Lap)
            .unwrap()
            .step("done", record("done"))
            .unwrap()
            .entry("lap")
            .unwrap()
            .branch(
                "lap",
                |s: &Trace| {
                    if s.laps < 4 {
                        Route::new("again")
                    } else {
                        Route::new("stop")
                    }
                },
                &[("again", "lap"), ("stop", "done")],
            )
            .unwrap()
            .build()
            .unwrap();

        let state = graph.run(Trace::default()).await.unwrap();
        assert_eq!(state.laps, 4);
        assert_eq!(state.visited, vec!["done"]);
    }

    fn set_flag(state: &mut Trace) -> BoxFuture<'_, trellis_core::Result<()>> {
        Box::pin(async move {
            state.flag = true;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_fn_step() {
        let graph = GraphBuilder::new()
            .step("only", FnStep::new(set_flag))
            .unwrap()
            .entry("only")
            .unwrap()
            .build()
            .unwrap();

        let state = graph.run(Trace::default()).await.unwrap();
        assert!(state.flag);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let result = GraphBuilder::<Trace>::new()
            .step("a", NoopStep)
            .unwrap()
            .step("a", NoopStep);
        assert!(matches!(result, Err(TrellisError::DuplicateStep(name)) if name == "a"));
    }

    #[test]
    fn test_edge_to_unknown_step_rejected() {
        let result = GraphBuilder::<Trace>::new()
            .step("a", NoopStep)
            .unwrap()
            .edge("a", "missing");
        assert!(matches!(result, Err(TrellisError::UnknownStep(name)) if name == "missing"));
    }

    #[test]
    fn test_second_outgoing_edge_rejected() {
        let result = GraphBuilder::<Trace>::new()
            .step("a", NoopStep)
            .unwrap()
            .step("b", NoopStep)
            .unwrap()
            .step("c", NoopStep)
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .edge("a", "c");
        assert!(matches!(result, Err(TrellisError::DuplicateEdge(name)) if name == "a"));
    }

    #[test]
    fn test_branch_after_edge_rejected() {
        let result = GraphBuilder::new()
            .step("a", NoopStep)
            .unwrap()
            .step("b", NoopStep)
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .branch("a", |_: &Trace| Route::new("x"), &[("x", "b")]);
        assert!(matches!(result, Err(TrellisError::DuplicateEdge(name)) if name == "a"));
    }

    #[test]
    fn test_unknown_entry_rejected() {
        let result = GraphBuilder::<Trace>::new()
            .step("a", NoopStep)
            .unwrap()
            .entry("missing");
        assert!(matches!(result, Err(TrellisError::UnknownStep(_))));
    }

    #[test]
    fn test_missing_entry_rejected() {
        let result = GraphBuilder::<Trace>::new()
            .step("a", NoopStep)
            .unwrap()
            .build();
        assert!(matches!(result, Err(TrellisError::Config(_))));
    }
}
