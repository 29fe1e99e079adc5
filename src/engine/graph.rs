use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::core::ArcStr;
use crate::engine::{Serve, Task, Trigger};
use crate::error::GraphError;

/// A validated, immutable task graph.
///
/// Node indices follow registration order, which is what makes planning
/// deterministic: whenever several tasks are ready at the same time, the one
/// registered first goes first.
pub struct TaskGraph {
    pub(crate) graph: Graph<Task, ()>,
    pub(crate) index: HashMap<ArcStr, NodeIndex>,
    pub(crate) serves: HashMap<ArcStr, Serve>,
}

impl TaskGraph {
    pub(crate) fn new(tasks: Vec<Task>, serves: Vec<(ArcStr, Serve)>) -> Result<Self, GraphError> {
        let mut graph = Graph::with_capacity(tasks.len(), 0);
        let mut index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            let name = task.name.clone();
            index.insert(name, graph.add_node(task));
        }

        for target in graph.node_indices().collect::<Vec<_>>() {
            let task = &graph[target];
            let mut edges = Vec::with_capacity(task.dependencies.len());

            for dependency in &task.dependencies {
                match index.get(dependency) {
                    Some(&source) => edges.push(source),
                    None => {
                        return Err(GraphError::UnknownDependency {
                            task: task.name.to_string(),
                            dependency: dependency.to_string(),
                        });
                    }
                }
            }

            for source in edges {
                graph.add_edge(source, target, ());
            }
        }

        // We run toposort primarily to detect any cycles in the graph.
        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(GraphError::CyclicDependency(find_cycle(&graph, cycle.node_id())));
        }

        for (name, serve) in &serves {
            let triggered = serve.rules.iter().flat_map(|rule| match &rule.trigger {
                Trigger::Tasks(tasks) => tasks.as_slice(),
                Trigger::Reload => &[] as &[ArcStr],
            });

            for dependency in serve.requires.iter().chain(triggered) {
                if !index.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        task: name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            graph,
            index,
            serves: serves.into_iter().collect(),
        })
    }

    /// Returns the task registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.graph[i])
    }

    /// Returns the serve target registered under `name`.
    pub fn serve_target(&self, name: &str) -> Option<&Serve> {
        self.serves.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name) || self.serves.contains_key(name)
    }

    /// Names of all tasks, in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(Task::name)
    }

    /// Returns the order in which a run of `names` would execute tasks,
    /// without executing anything.
    pub fn plan<I, S>(&self, names: I) -> Result<Vec<&str>, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order = self.schedule(names)?;
        Ok(order.into_iter().map(|i| self.graph[i].name()).collect())
    }

    /// Resolves the transitive dependencies of `names` and orders them
    /// topologically.
    ///
    /// The algorithm is Kahn's:
    /// 1. Collect every node reachable from the roots by walking dependency
    ///    edges backwards.
    /// 2. Count, for each collected node, how many of its dependencies are
    ///    also collected.
    /// 3. Nodes with a zero count are ready. The ready node with the lowest
    ///    index (earliest registration) is emitted, and the counts of its
    ///    dependents are decremented.
    /// 4. If nodes remain once nothing is ready, they form a cycle.
    pub(crate) fn schedule<I, S>(&self, names: I) -> Result<Vec<NodeIndex>, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut nodes = HashSet::new();
        let reversed = Reversed(&self.graph);

        for name in names {
            let name = name.as_ref();
            let &root = self
                .index
                .get(name)
                .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;

            let mut dfs = Dfs::new(reversed, root);
            while let Some(nx) = dfs.next(reversed) {
                nodes.insert(nx);
            }
        }

        let mut dependency_counts: HashMap<NodeIndex, usize> = nodes
            .iter()
            .map(|&i| {
                (
                    i,
                    self.graph
                        .neighbors_directed(i, Direction::Incoming)
                        .filter(|dep| nodes.contains(dep))
                        .count(),
                )
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = dependency_counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());

        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);

            for dependent in self.graph.neighbors_directed(index, Direction::Outgoing) {
                if let Some(count) = dependency_counts.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        if order.len() < nodes.len() {
            let emitted: HashSet<_> = order.iter().copied().collect();
            if let Some(stuck) = nodes.iter().copied().filter(|i| !emitted.contains(i)).min() {
                return Err(GraphError::CyclicDependency(find_cycle(&self.graph, stuck)));
            }
        }

        Ok(order)
    }
}

/// Walks dependency edges and returns the names along a path that leads back
/// to where it started, e.g. `["a", "b", "c", "a"]` when `a` depends on `b`,
/// `b` on `c` and `c` on `a`.
///
/// The walk starts at the earliest registered member of the cycle containing
/// `hint`, or of any cycle if `hint` only depends on one.
fn find_cycle(graph: &Graph<Task, ()>, hint: NodeIndex) -> Vec<String> {
    let cycles: Vec<Vec<NodeIndex>> = petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .collect();

    let start = cycles
        .iter()
        .find(|scc| scc.contains(&hint))
        .or_else(|| cycles.first())
        .and_then(|scc| scc.iter().min().copied())
        .unwrap_or(hint);

    let mut parents: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for dependency in graph.neighbors_directed(node, Direction::Incoming) {
            if dependency == start {
                let mut path = vec![node];
                let mut cursor = node;
                while cursor != start {
                    cursor = parents[&cursor];
                    path.push(cursor);
                }
                path.reverse();
                path.push(start);

                return path.into_iter().map(|i| graph[i].name().to_string()).collect();
            }

            if !parents.contains_key(&dependency) {
                parents.insert(dependency, node);
                queue.push_back(dependency);
            }
        }
    }

    vec![graph[start].name().to_string()]
}

impl std::fmt::Display for TaskGraph {
    /// Renders the graph as a Mermaid diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        let mut serves: Vec<_> = self.serves.iter().collect();
        serves.sort_by(|a, b| a.0.cmp(b.0));

        for (i, (name, serve)) in serves.into_iter().enumerate() {
            writeln!(f, "    serve{}([\"{}\"])", i, name.replace('"', "\\\""))?;
            for required in &serve.requires {
                if let Some(index) = self.index.get(required) {
                    writeln!(f, "    {} -.-> serve{}", index.index(), i)?;
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
