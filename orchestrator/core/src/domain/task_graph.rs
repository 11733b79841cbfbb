// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Graph
//!
//! Dependency graph derived from a [`FeatureList`](crate::domain::feature::FeatureList)
//! snapshot. The graph is rebuilt from a fresh store read whenever a caller needs
//! it and is never shared between callers.
//!
//! | Feature state | Node status |
//! |---------------|-------------|
//! | `passes == true`, `done`, `implemented` | `Done` |
//! | `failed` | `Failed` |
//! | `in_progress` | `InProgress` |
//! | anything else, all dependencies `Done` | `Ready` |
//! | anything else | `Pending` |
//!
//! Nodes on a cycle never become `Ready`. Callers detect that through
//! [`TaskGraph::is_stalled`] rather than looping on an empty ready set.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure readiness derivation, no I/O

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;

use crate::domain::feature::{Feature, FeatureStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    fn from_feature(feature: &Feature) -> Self {
        if feature.passes {
            return TaskStatus::Done;
        }
        match feature.status {
            FeatureStatus::Done | FeatureStatus::Implemented => TaskStatus::Done,
            FeatureStatus::InProgress => TaskStatus::InProgress,
            FeatureStatus::Failed => TaskStatus::Failed,
            FeatureStatus::Pending | FeatureStatus::Other(_) => TaskStatus::Pending,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub dependencies: BTreeSet<String>,
    pub exclusive_write_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("feature '{feature}' depends on unknown feature '{missing}'")]
    DanglingDependency { feature: String, missing: String },

    #[error("feature id '{0}' appears more than once")]
    DuplicateId(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("dependency cycle among: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Per-status node counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<String, TaskNode>,
    /// Insertion order of the source feature list.
    order: Vec<String>,
}

impl TaskGraph {
    /// Build one node per feature. Fails on duplicate ids and on dependencies
    /// that name a feature absent from `features`.
    pub fn load_from_features(features: &[Feature]) -> Result<Self, GraphError> {
        let mut graph = TaskGraph::default();

        for feature in features {
            if graph.nodes.contains_key(&feature.id) {
                return Err(GraphError::DuplicateId(feature.id.clone()));
            }
            let name = if feature.description.is_empty() {
                feature.id.clone()
            } else {
                feature.description.clone()
            };
            graph.order.push(feature.id.clone());
            graph.nodes.insert(
                feature.id.clone(),
                TaskNode {
                    id: feature.id.clone(),
                    name,
                    status: TaskStatus::from_feature(feature),
                    dependencies: feature.dependencies.depends_on_ids.iter().cloned().collect(),
                    exclusive_write_paths: feature.dependencies.exclusive_write_paths.clone(),
                },
            );
        }

        for id in &graph.order {
            let node = &graph.nodes[id];
            if let Some(missing) = node.dependencies.iter().find(|d| !graph.nodes.contains_key(*d)) {
                return Err(GraphError::DanglingDependency {
                    feature: id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        graph.refresh();
        Ok(graph)
    }

    /// Re-derive Pending/Ready for every non-terminal, non-InProgress node.
    fn refresh(&mut self) {
        let done: HashSet<String> = self
            .nodes
            .values()
            .filter(|n| n.status == TaskStatus::Done)
            .map(|n| n.id.clone())
            .collect();

        for node in self.nodes.values_mut() {
            if node.status.is_terminal() || node.status == TaskStatus::InProgress {
                continue;
            }
            node.status = if node.dependencies.iter().all(|d| done.contains(d)) {
                TaskStatus::Ready
            } else {
                TaskStatus::Pending
            };
        }
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Nodes in feature-list order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ready_nodes(&self) -> Vec<&TaskNode> {
        self.nodes().filter(|n| n.status == TaskStatus::Ready).collect()
    }

    /// Assert a status from outside (e.g. the orchestrator committing to a
    /// node) and re-derive readiness of the rest.
    pub fn mark_status(&mut self, id: &str, status: TaskStatus) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTask(id.to_string()))?;
        node.status = match status {
            // Readiness is derived, a caller can only put a node back into the pool.
            TaskStatus::Ready => TaskStatus::Pending,
            other => other,
        };
        self.refresh();
        Ok(())
    }

    pub fn summary(&self) -> TaskSummary {
        let mut summary = TaskSummary {
            total: self.nodes.len(),
            ..TaskSummary::default()
        };
        for node in self.nodes.values() {
            match node.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Ready => summary.ready += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Done => summary.done += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn all_done(&self) -> bool {
        self.nodes.values().all(|n| n.status == TaskStatus::Done)
    }

    /// Work remains but nothing is runnable and nothing is running. Happens
    /// with cycles or when a dependency has failed.
    pub fn is_stalled(&self) -> bool {
        let s = self.summary();
        s.pending > 0 && s.ready == 0 && s.in_progress == 0
    }

    /// Ids of the nodes blocking progress when the graph is stalled.
    pub fn stalled_nodes(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.status == TaskStatus::Pending)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Returns the ids on the first dependency cycle found, if any.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Visited,
        }

        fn visit<'a>(
            graph: &'a TaskGraph,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(id) {
                Some(Mark::Visited) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                    return Some(stack[start..].iter().map(|s| s.to_string()).collect());
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            stack.push(id);
            if let Some(node) = graph.nodes.get(id) {
                for dep in &node.dependencies {
                    if let Some(cycle) = visit(graph, dep, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            marks.insert(id, Mark::Visited);
            None
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        for id in &self.order {
            if let Some(cycle) = visit(self, id, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// Dependencies before dependents (Kahn's algorithm), ties broken by
    /// feature-list order.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.id.as_str(), n.dependencies.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &self.order {
            for dep in &self.nodes[id].dependencies {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        if sorted.len() != self.order.len() {
            let remaining = self
                .order
                .iter()
                .filter(|id| !sorted.contains(*id))
                .cloned()
                .collect();
            return Err(GraphError::Cycle(remaining));
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(id: &str) -> Feature {
        let mut f = Feature::new(id, "");
        f.status = FeatureStatus::Done;
        f.passes = true;
        f
    }

    #[test]
    fn test_ready_requires_all_dependencies_done() {
        let features = vec![
            done("db"),
            Feature::new("schema", ""),
            Feature::new("api", "").depends_on(&["db", "schema"]),
            Feature::new("cli", "").depends_on(&["db"]),
        ];
        let graph = TaskGraph::load_from_features(&features).unwrap();

        assert_eq!(graph.node("db").unwrap().status, TaskStatus::Done);
        assert_eq!(graph.node("schema").unwrap().status, TaskStatus::Ready);
        assert_eq!(graph.node("api").unwrap().status, TaskStatus::Pending);
        assert_eq!(graph.node("cli").unwrap().status, TaskStatus::Ready);

        let ready: Vec<_> = graph.ready_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ready, vec!["schema", "cli"]);
    }

    #[test]
    fn test_dependency_regression_flips_dependent_back_to_pending() {
        let mut features = vec![done("base"), Feature::new("top", "").depends_on(&["base"])];
        let graph = TaskGraph::load_from_features(&features).unwrap();
        assert_eq!(graph.node("top").unwrap().status, TaskStatus::Ready);

        features[0].status = FeatureStatus::Pending;
        features[0].passes = false;
        let graph = TaskGraph::load_from_features(&features).unwrap();
        assert_eq!(graph.node("top").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_dangling_dependency_is_reported() {
        let features = vec![Feature::new("a", "").depends_on(&["ghost"])];
        let err = TaskGraph::load_from_features(&features).unwrap_err();

        assert_eq!(
            err,
            GraphError::DanglingDependency {
                feature: "a".to_string(),
                missing: "ghost".to_string()
            }
        );
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let features = vec![Feature::new("a", ""), Feature::new("a", "")];
        assert_eq!(
            TaskGraph::load_from_features(&features).unwrap_err(),
            GraphError::DuplicateId("a".to_string())
        );
    }

    #[test]
    fn test_cycle_stalls_graph() {
        let features = vec![
            Feature::new("a", "").depends_on(&["b"]),
            Feature::new("b", "").depends_on(&["a"]),
        ];
        let graph = TaskGraph::load_from_features(&features).unwrap();

        assert!(graph.ready_nodes().is_empty());
        assert!(graph.is_stalled());
        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(matches!(graph.topological_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_in_progress_is_not_stalled() {
        let mut running = Feature::new("a", "");
        running.status = FeatureStatus::InProgress;
        let features = vec![running, Feature::new("b", "").depends_on(&["a"])];
        let graph = TaskGraph::load_from_features(&features).unwrap();

        assert!(graph.ready_nodes().is_empty());
        assert!(!graph.is_stalled());
    }

    #[test]
    fn test_mark_status_rederives_readiness() {
        let features = vec![Feature::new("a", ""), Feature::new("b", "").depends_on(&["a"])];
        let mut graph = TaskGraph::load_from_features(&features).unwrap();

        graph.mark_status("a", TaskStatus::InProgress).unwrap();
        assert_eq!(graph.summary().in_progress, 1);
        assert_eq!(graph.node("b").unwrap().status, TaskStatus::Pending);

        graph.mark_status("a", TaskStatus::Done).unwrap();
        assert_eq!(graph.node("b").unwrap().status, TaskStatus::Ready);
        assert!(graph.mark_status("zzz", TaskStatus::Done).is_err());
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let features = vec![
            Feature::new("c", "").depends_on(&["b"]),
            Feature::new("b", "").depends_on(&["a"]),
            Feature::new("a", ""),
        ];
        let graph = TaskGraph::load_from_features(&features).unwrap();

        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c"]);
        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn test_summary_counts() {
        let mut failed = Feature::new("f", "");
        failed.status = FeatureStatus::Failed;
        let features = vec![done("d"), failed, Feature::new("p", "").depends_on(&["f"])];
        let graph = TaskGraph::load_from_features(&features).unwrap();

        let summary = graph.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.done, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert!(graph.is_stalled());
        assert_eq!(graph.stalled_nodes(), vec!["p"]);
        assert!(!graph.all_done());
    }
}
