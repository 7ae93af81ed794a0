//! Release task graph.
//!
//! Stages form a DAG. Execution starts every stage whose predecessors have
//! all finished, so stages without an edge between them run concurrently.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;

use crate::error::PipelineError;

/// A release pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Clean,
    CopyHtml,
    CopyFonts,
    CopyImages,
    Scripts,
    Styles,
    Revision,
    RewriteRefs,
    PostClean,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Clean,
        Stage::CopyHtml,
        Stage::CopyFonts,
        Stage::CopyImages,
        Stage::Scripts,
        Stage::Styles,
        Stage::Revision,
        Stage::RewriteRefs,
        Stage::PostClean,
    ];

    /// Task name as accepted on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Clean => "clean:release",
            Stage::CopyHtml => "copy:release",
            Stage::CopyFonts => "copy:fonts:release",
            Stage::CopyImages => "copy:img:release",
            Stage::Scripts => "js:release",
            Stage::Styles => "scss:release",
            Stage::Revision => "revision:release",
            Stage::RewriteRefs => "revision:refchange",
            Stage::PostClean => "clean:postbuild",
        }
    }

    /// Stages that must finish before this one starts.
    pub fn dependencies(&self) -> &'static [Stage] {
        const COPY: &[Stage] = &[Stage::CopyHtml, Stage::CopyFonts, Stage::CopyImages];
        match self {
            Stage::Clean => &[],
            Stage::CopyHtml | Stage::CopyFonts | Stage::CopyImages => &[Stage::Clean],
            Stage::Scripts | Stage::Styles => COPY,
            Stage::Revision => &[Stage::Scripts, Stage::Styles],
            Stage::RewriteRefs => &[Stage::Revision],
            Stage::PostClean => &[Stage::RewriteRefs],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| PipelineError::UnknownTask(s.to_string()))
    }
}

/// Directed acyclic graph of stages. Edges point from a stage to the stages
/// that depend on it.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<Stage, ()>,
    index: HashMap<Stage, NodeIndex>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The full release graph.
    pub fn release() -> Self {
        let mut graph = Self::new();
        for stage in Stage::ALL {
            graph.add_stage(stage, stage.dependencies());
        }
        graph
    }

    /// Add `stage` with edges from each of `deps`, adding missing nodes.
    pub fn add_stage(&mut self, stage: Stage, deps: &[Stage]) {
        let node = self.node(stage);
        for dep in deps {
            let from = self.node(*dep);
            self.graph.update_edge(from, node, ());
        }
    }

    fn node(&mut self, stage: Stage) -> NodeIndex {
        if let Some(&idx) = self.index.get(&stage) {
            return idx;
        }
        let idx = self.graph.add_node(stage);
        self.index.insert(stage, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct predecessors of `stage`.
    pub fn predecessors(&self, stage: Stage) -> Vec<Stage> {
        let Some(&idx) = self.index.get(&stage) else {
            return Vec::new();
        };
        let mut deps: Vec<Stage> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        deps.sort();
        deps
    }

    /// All stages in a valid execution order.
    pub fn order(&self) -> Result<Vec<Stage>, PipelineError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| self.graph[n]).collect())
            .map_err(|cycle| {
                PipelineError::GraphError(format!(
                    "cycle detected at '{}'",
                    self.graph[cycle.node_id()]
                ))
            })
    }

    /// `target` and every stage it transitively depends on.
    pub fn ancestors(&self, target: Stage) -> Result<HashSet<Stage>, PipelineError> {
        let idx = *self
            .index
            .get(&target)
            .ok_or_else(|| PipelineError::UnknownTask(target.name().to_string()))?;

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, idx);
        let mut stages = HashSet::new();
        while let Some(node) = dfs.next(reversed) {
            stages.insert(self.graph[node]);
        }
        Ok(stages)
    }

    /// Run the whole graph, or only `target` and its ancestors.
    ///
    /// Returns stages in completion order. The first failure stops new
    /// stages from starting; stages already running are awaited and the
    /// first error is returned.
    pub async fn execute<F, Fut>(
        &self,
        target: Option<Stage>,
        run: F,
    ) -> Result<Vec<Stage>, PipelineError>
    where
        F: Fn(Stage) -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        self.order()?;

        let selected: HashSet<Stage> = match target {
            Some(stage) => self.ancestors(stage)?,
            None => self.graph.node_weights().copied().collect(),
        };

        let mut pending: HashMap<NodeIndex, usize> = HashMap::new();
        let mut ready: Vec<NodeIndex> = Vec::new();
        for idx in self.graph.node_indices() {
            if !selected.contains(&self.graph[idx]) {
                continue;
            }
            let waiting = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter(|n| selected.contains(&self.graph[*n]))
                .count();
            if waiting == 0 {
                ready.push(idx);
            } else {
                pending.insert(idx, waiting);
            }
        }

        let mut running = FuturesUnordered::new();
        let mut completed = Vec::new();
        let mut failure: Option<PipelineError> = None;

        loop {
            if failure.is_none() {
                ready.sort_by_key(|idx| self.graph[*idx]);
                for idx in ready.drain(..) {
                    let stage = self.graph[idx];
                    tracing::info!("Starting '{}'", stage);
                    let fut = run(stage);
                    running.push(async move {
                        let start = Instant::now();
                        let result = fut.await;
                        (idx, result, start.elapsed().as_millis())
                    });
                }
            }

            let Some((idx, result, elapsed)) = running.next().await else {
                break;
            };
            let stage = self.graph[idx];

            match result {
                Ok(()) => {
                    tracing::info!("Finished '{}' after {}ms", stage, elapsed);
                    completed.push(stage);
                    for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                        if let Some(waiting) = pending.get_mut(&next) {
                            *waiting -= 1;
                            if *waiting == 0 {
                                pending.remove(&next);
                                ready.push(next);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("'{}' errored after {}ms: {}", stage, elapsed, e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    /// [`execute`](Self::execute) for synchronous stage bodies. Each stage
    /// runs on the blocking pool, so independent stages use separate threads.
    pub async fn execute_blocking<F>(
        &self,
        target: Option<Stage>,
        work: F,
    ) -> Result<Vec<Stage>, PipelineError>
    where
        F: Fn(Stage) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        self.execute(target, |stage| {
            let work = Arc::clone(&work);
            async move {
                tokio::task::spawn_blocking(move || work(stage))
                    .await
                    .map_err(|e| {
                        PipelineError::GraphError(format!("'{}' did not complete: {}", stage, e))
                    })?
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    fn position(order: &[Stage], stage: Stage) -> usize {
        order.iter().position(|s| *s == stage).unwrap()
    }

    #[test]
    fn parses_stage_names() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>().unwrap(), stage);
        }
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn release_order_respects_dependencies() {
        let graph = TaskGraph::release();
        let order = graph.order().unwrap();

        assert_eq!(order.len(), 9);
        for stage in Stage::ALL {
            for dep in stage.dependencies() {
                assert!(position(&order, *dep) < position(&order, stage));
            }
        }
    }

    #[test]
    fn ancestors_include_transitive_dependencies() {
        let graph = TaskGraph::release();

        let stages = graph.ancestors(Stage::Revision).unwrap();

        assert!(stages.contains(&Stage::Revision));
        assert!(stages.contains(&Stage::Scripts));
        assert!(stages.contains(&Stage::Clean));
        assert!(!stages.contains(&Stage::RewriteRefs));
        assert!(!stages.contains(&Stage::PostClean));
    }

    #[test]
    fn detects_cycles() {
        let mut graph = TaskGraph::new();
        graph.add_stage(Stage::Scripts, &[Stage::Styles]);
        graph.add_stage(Stage::Styles, &[Stage::Scripts]);

        assert!(matches!(graph.order(), Err(PipelineError::GraphError(_))));
    }

    #[tokio::test]
    async fn executes_every_stage_in_dependency_order() {
        let graph = TaskGraph::release();
        let log = Arc::new(Mutex::new(Vec::new()));

        let completed = graph
            .execute(None, |stage| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(stage);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(completed.len(), 9);
        let started = log.lock().unwrap().clone();
        for stage in Stage::ALL {
            for dep in stage.dependencies() {
                assert!(position(&started, *dep) < position(&started, stage));
            }
        }
        assert_eq!(*completed.last().unwrap(), Stage::PostClean);
    }

    #[tokio::test]
    async fn target_runs_only_its_ancestors() {
        let graph = TaskGraph::release();

        let completed = graph
            .execute(Some(Stage::CopyFonts), |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(completed, vec![Stage::Clean, Stage::CopyFonts]);
    }

    #[tokio::test]
    async fn failure_halts_downstream_stages() {
        let graph = TaskGraph::release();
        let log = Arc::new(Mutex::new(Vec::new()));

        let result = graph
            .execute(None, |stage| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(stage);
                    if stage == Stage::Styles {
                        Err(PipelineError::GraphError("boom".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_err());
        let started = log.lock().unwrap().clone();
        assert!(started.contains(&Stage::Scripts));
        assert!(!started.contains(&Stage::Revision));
        assert!(!started.contains(&Stage::PostClean));
    }

    #[tokio::test]
    async fn blocking_build_stages_overlap() {
        let graph = TaskGraph::release();
        let arrived = Arc::new((Mutex::new(0usize), Condvar::new()));

        // Scripts and Styles each wait for the other to start.
        let completed = graph
            .execute_blocking(None, move |stage| {
                if matches!(stage, Stage::Scripts | Stage::Styles) {
                    let (count, started) = &*arrived;
                    let mut count = count.lock().unwrap();
                    *count += 1;
                    started.notify_all();
                    let (_count, wait) = started
                        .wait_timeout_while(count, Duration::from_secs(5), |n| *n < 2)
                        .unwrap();
                    if wait.timed_out() {
                        return Err(PipelineError::GraphError(format!("'{}' ran alone", stage)));
                    }
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(completed.len(), 9);
    }

    #[tokio::test]
    async fn blocking_stage_panic_is_an_error() {
        let graph = TaskGraph::release();

        let result = graph
            .execute_blocking(Some(Stage::CopyFonts), |stage| {
                if stage == Stage::CopyFonts {
                    panic!("copy crashed");
                }
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PipelineError::GraphError(_))));
    }
}
