//! # Dependency Graph
//!
//! DAG of task-to-task `depends_on` edges. Forward map (depends-on) and
//! reverse map (dependents) plus a resolution table, so neither
//! direction needs to be rebuilt by scanning every edge.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::domain::{DependencyEdgeState, DependencyResolution};
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::ids::TaskId;

pub struct DependencyGraph {
    /// `from -> {to}`: tasks `from` depends on.
    forward: DashMap<TaskId, HashSet<TaskId>>,
    /// `to -> {from}`: tasks that depend on `to`.
    reverse: DashMap<TaskId, HashSet<TaskId>>,
    resolutions: DashMap<(TaskId, TaskId), DependencyEdgeState>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
            resolutions: DashMap::new(),
        }
    }

    /// Adds an edge meaning `to` must resolve before `from` runs.
    /// Rejects self-edges and edges that would introduce a cycle.
    /// De-duplicates: adding the same edge twice has no additional
    /// effect.
    pub fn add_edge(&self, from: &TaskId, to: &TaskId) -> Result<()> {
        if from == to {
            return Err(SupervisorError::new(
                ErrorKind::InvalidOperation,
                "a task cannot depend on itself",
            ));
        }
        if self.would_cycle(from, to) {
            return Err(SupervisorError::new(
                ErrorKind::InvalidOperation,
                format!("adding edge {from} -> {to} would introduce a cycle"),
            ));
        }

        let is_new = self
            .forward
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        if is_new {
            self.reverse.entry(to.clone()).or_default().insert(from.clone());
            self.resolutions
                .entry((from.clone(), to.clone()))
                .or_insert_with(DependencyEdgeState::default);
        }
        Ok(())
    }

    /// DFS from `to`: if we can reach `from`, the new edge `from -> to`
    /// would close a cycle.
    fn would_cycle(&self, from: &TaskId, to: &TaskId) -> bool {
        let mut stack = vec![to.clone()];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == *from {
                return true;
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(deps) = self.forward.get(&node) {
                stack.extend(deps.iter().cloned());
            }
        }
        false
    }

    #[must_use]
    pub fn get_dependencies(&self, from: &TaskId) -> Vec<TaskId> {
        self.forward
            .get(from)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_dependents(&self, to: &TaskId) -> Vec<TaskId> {
        self.reverse
            .get(to)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A task is blocked iff any outgoing edge is still `Pending`.
    #[must_use]
    pub fn is_blocked(&self, from: &TaskId) -> bool {
        let Some(deps) = self.forward.get(from) else {
            return false;
        };
        deps.iter().any(|to| {
            self.resolutions
                .get(&(from.clone(), to.clone()))
                .map(|r| r.resolution.is_pending())
                .unwrap_or(false)
        })
    }

    /// Records the outcome of one dependency edge. Returns `true` if
    /// this was the task's last pending edge (i.e. it just transitioned
    /// from blocked to unblocked).
    pub fn resolve_dependency(
        &self,
        from: &TaskId,
        to: &TaskId,
        resolution: DependencyResolution,
    ) -> bool {
        let was_blocked = self.is_blocked(from);
        if let Some(mut entry) = self.resolutions.get_mut(&(from.clone(), to.clone())) {
            entry.resolution = resolution;
            entry.resolved_at = Some(chrono::Utc::now());
        }
        was_blocked && !self.is_blocked(from)
    }

    /// Whether every outgoing edge of `from` has resolved, and if so,
    /// whether any of them resolved as something other than completed
    /// (a failed or cancelled dependency propagates transitively).
    #[must_use]
    pub fn all_resolved(&self, from: &TaskId) -> Option<bool> {
        let deps = self.forward.get(from)?;
        let mut any_non_completed = false;
        for to in deps.iter() {
            let Some(state) = self.resolutions.get(&(from.clone(), to.clone())) else {
                return None;
            };
            if state.resolution.is_pending() {
                return None;
            }
            if state.resolution.propagates_failure() {
                any_non_completed = true;
            }
        }
        Some(any_non_completed)
    }

    /// Removes every edge touching `task_id`, in either direction, so no
    /// later query returns an edge with a deleted endpoint.
    pub fn remove_task(&self, task_id: &TaskId) {
        if let Some((_, deps)) = self.forward.remove(task_id) {
            for to in deps {
                self.resolutions.remove(&(task_id.clone(), to.clone()));
                if let Some(mut dependents) = self.reverse.get_mut(&to) {
                    dependents.remove(task_id);
                }
            }
        }
        if let Some((_, dependents)) = self.reverse.remove(task_id) {
            for from in dependents {
                self.resolutions.remove(&(from.clone(), task_id.clone()));
                if let Some(mut deps) = self.forward.get_mut(&from) {
                    deps.remove(task_id);
                }
            }
        }
    }

    #[cfg(test)]
    fn resolution_count(&self) -> usize {
        self.resolutions.len()
    }
}

/// Snapshot helper for recovery/tests: all forward edges as a plain map.
#[must_use]
pub fn snapshot_forward(graph: &DependencyGraph) -> HashMap<TaskId, HashSet<TaskId>> {
    graph
        .forward
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    #[test]
    fn self_edge_is_rejected() {
        let g = DependencyGraph::new();
        assert!(g.add_edge(&id("a"), &id("a")).is_err());
    }

    #[test]
    fn cycle_is_rejected() {
        let g = DependencyGraph::new();
        g.add_edge(&id("a"), &id("b")).unwrap();
        g.add_edge(&id("b"), &id("c")).unwrap();
        assert!(g.add_edge(&id("c"), &id("a")).is_err());
    }

    #[test]
    fn duplicate_edge_is_deduped() {
        let g = DependencyGraph::new();
        g.add_edge(&id("a"), &id("b")).unwrap();
        g.add_edge(&id("a"), &id("b")).unwrap();
        assert_eq!(g.resolution_count(), 1);
    }

    #[test]
    fn blocked_until_resolved() {
        let g = DependencyGraph::new();
        g.add_edge(&id("a"), &id("b")).unwrap();
        assert!(g.is_blocked(&id("a")));
        let unblocked = g.resolve_dependency(&id("a"), &id("b"), DependencyResolution::Completed);
        assert!(unblocked);
        assert!(!g.is_blocked(&id("a")));
    }

    #[test]
    fn failure_propagates_transitively() {
        let g = DependencyGraph::new();
        g.add_edge(&id("a"), &id("b")).unwrap();
        g.resolve_dependency(&id("a"), &id("b"), DependencyResolution::Failed);
        assert_eq!(g.all_resolved(&id("a")), Some(true));
    }

    #[test]
    fn remove_task_clears_all_touching_edges() {
        let g = DependencyGraph::new();
        g.add_edge(&id("a"), &id("b")).unwrap();
        g.remove_task(&id("b"));
        assert!(g.get_dependencies(&id("a")).is_empty());
        assert!(g.get_dependents(&id("b")).is_empty());
        assert!(!g.is_blocked(&id("a")));
    }
}
