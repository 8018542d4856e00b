//! Task graph construction.
//!
//! Pipelines are declared as a [`Plan`], a tree of sequential and parallel
//! groups, and lowered into a directed acyclic graph where every edge means
//! "must complete before". A series stage depends on every exit node of the
//! stage before it, which makes each parallel group a fan-in barrier.

mod runner;

use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::task::Task;

pub use runner::watch::{Binding, Dispatcher, RELOAD_PORT, dispatch};
pub use runner::{Diagnostics, Policy, TaskExecution, run};
pub(crate) use runner::watch::watch;

/// Declarative composition of tasks.
#[derive(Debug, Clone)]
pub enum Plan {
    /// A single task.
    Task(Arc<dyn Task>),
    /// Members run strictly one after another.
    Series(Vec<Plan>),
    /// Members run concurrently; the group completes when all members do.
    Parallel(Vec<Plan>),
}

impl Plan {
    pub fn task(task: impl Task + 'static) -> Self {
        Plan::Task(Arc::new(task))
    }

    pub fn series(plans: impl IntoIterator<Item = Plan>) -> Self {
        Plan::Series(plans.into_iter().collect())
    }

    pub fn parallel(plans: impl IntoIterator<Item = Plan>) -> Self {
        Plan::Parallel(plans.into_iter().collect())
    }

    /// Lower the plan into an executable graph.
    pub fn lower(&self) -> TaskGraph {
        let mut graph = DiGraph::new();
        self.lower_into(&mut graph, &[]);
        TaskGraph { graph }
    }

    /// Adds the nodes of this plan to `graph`, making its entry nodes depend
    /// on `after`. Returns the exit nodes of the plan.
    fn lower_into(
        &self,
        graph: &mut DiGraph<Arc<dyn Task>, ()>,
        after: &[NodeIndex],
    ) -> Vec<NodeIndex> {
        match self {
            Plan::Task(task) => {
                let index = graph.add_node(task.clone());
                for &dep in after {
                    graph.add_edge(dep, index, ());
                }
                vec![index]
            }
            Plan::Series(plans) => plans
                .iter()
                .fold(after.to_vec(), |after, plan| plan.lower_into(graph, &after)),
            Plan::Parallel(plans) => {
                let exits: Vec<_> = plans
                    .iter()
                    .flat_map(|plan| plan.lower_into(graph, after))
                    .collect();

                // an empty group must not drop the barrier
                if exits.is_empty() {
                    after.to_vec()
                } else {
                    exits
                }
            }
        }
    }
}

/// The lowered form of a [`Plan`], constructed once and never mutated.
#[derive(Debug)]
pub struct TaskGraph {
    pub(crate) graph: DiGraph<Arc<dyn Task>, ()>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Names of the tasks that must complete before `name` can start.
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        let Some(index) = self.index_of(name) else {
            return Vec::new();
        };

        let mut names: Vec<_> = self
            .graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .map(|dep| self.graph[dep].name())
            .collect();
        names.sort();
        names
    }

    fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&index| self.graph[index].name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::task::Outcome;

    struct Named(&'static str);

    impl Task for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self) -> Result<Outcome, TaskError> {
            Ok(Outcome::default())
        }
    }

    #[test]
    fn test_series_of_parallel_is_barrier() {
        let plan = Plan::series([
            Plan::task(Named("reset")),
            Plan::parallel([Plan::task(Named("a")), Plan::task(Named("b"))]),
            Plan::task(Named("zip")),
        ]);

        let graph = plan.lower();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.predecessors("reset"), Vec::<&str>::new());
        assert_eq!(graph.predecessors("a"), vec!["reset"]);
        assert_eq!(graph.predecessors("b"), vec!["reset"]);
        assert_eq!(graph.predecessors("zip"), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_parallel_keeps_order() {
        let plan = Plan::series([
            Plan::task(Named("first")),
            Plan::parallel([]),
            Plan::task(Named("last")),
        ]);

        let graph = plan.lower();

        assert_eq!(graph.predecessors("last"), vec!["first"]);
    }

    #[test]
    fn test_nested_series_inside_parallel() {
        let plan = Plan::parallel([
            Plan::series([Plan::task(Named("x1")), Plan::task(Named("x2"))]),
            Plan::task(Named("y")),
        ]);

        let graph = plan.lower();

        assert_eq!(graph.predecessors("x2"), vec!["x1"]);
        assert!(graph.predecessors("y").is_empty());
        assert!(graph.predecessors("x1").is_empty());
    }
}
