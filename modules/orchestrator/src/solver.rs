//! Priority solve over declared module inputs and outputs

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Recursion budget for the priority solve. A dependency chain deeper than
/// this is treated as a loop in the declared graph.
pub const MAX_SOLVE_DEPTH: u32 = 300;

/// Declared data flow for one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleIo {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Computes an execution order for one graph's modules.
///
/// Modules are nodes; an edge runs from producer to consumer wherever a
/// producer's declared outputs intersect a consumer's declared inputs. The
/// priority of a module is one plus the sum of its producers' priorities,
/// so producers always sort ahead of their consumers; ties within a
/// priority tier carry no further ordering.
#[derive(Default)]
pub struct Solver {
    modules: Vec<ModuleIo>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: ModuleIo) {
        self.modules.push(module);
    }

    /// The `(producer, consumer)` edge table implied by the declarations.
    pub fn dependency_edges(&self) -> Vec<(String, String)> {
        let (graph, _) = self.build_graph();
        graph
            .edge_indices()
            .filter_map(|e| graph.edge_endpoints(e))
            .map(|(p, c)| (graph[p].clone(), graph[c].clone()))
            .collect()
    }

    /// Solve for the execution order: module names sorted by ascending
    /// priority.
    pub fn solve(&self, graph_name: &str) -> OrchestratorResult<Vec<String>> {
        let (graph, nodes) = self.build_graph();

        let mut tiers: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for module in &self.modules {
            let node = nodes[module.name.as_str()];
            let priority = priority_of(&graph, node, 0).map_err(|module| {
                OrchestratorError::CyclicGraph {
                    graph: graph_name.to_owned(),
                    module,
                    depth: MAX_SOLVE_DEPTH,
                }
            })?;
            debug!(graph = graph_name, module = %module.name, priority, "solved priority");
            tiers.entry(priority).or_default().push(module.name.clone());
        }

        Ok(tiers.into_values().flatten().collect())
    }

    fn build_graph(&self) -> (DiGraph<String, ()>, HashMap<&str, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for module in &self.modules {
            nodes.insert(module.name.as_str(), graph.add_node(module.name.clone()));
        }

        for consumer in &self.modules {
            for producer in &self.modules {
                if producer.name == consumer.name {
                    continue;
                }
                let feeds = producer
                    .outputs
                    .iter()
                    .any(|output| consumer.inputs.contains(output));
                if feeds {
                    let from = nodes[producer.name.as_str()];
                    let to = nodes[consumer.name.as_str()];
                    if !graph.contains_edge(from, to) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        (graph, nodes)
    }
}

/// `priority(M) = 1 + Σ priority(N)` over every producer N feeding M.
/// Fails with the offending module's name once the recursion depth budget
/// is spent.
fn priority_of(graph: &DiGraph<String, ()>, node: NodeIndex, depth: u32) -> Result<u32, String> {
    if depth >= MAX_SOLVE_DEPTH {
        return Err(graph[node].clone());
    }

    let mut priority = 1;
    for producer in graph.neighbors_directed(node, Direction::Incoming) {
        priority += priority_of(graph, producer, depth + 1)?;
    }
    Ok(priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(name: &str, inputs: &[&str], outputs: &[&str]) -> ModuleIo {
        ModuleIo {
            name: name.to_owned(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn chain(length: usize) -> Solver {
        let mut solver = Solver::new();
        for i in 0..length {
            let inputs: Vec<String> = if i == 0 { vec![] } else { vec![format!("t{i}")] };
            let outputs = vec![format!("t{}", i + 1)];
            solver.add(ModuleIo {
                name: format!("m{i}"),
                inputs: inputs.clone(),
                outputs,
            });
        }
        solver
    }

    #[test]
    fn producer_sorts_before_consumer() {
        let mut solver = Solver::new();
        solver.add(io("consumer", &["frame"], &[]));
        solver.add(io("producer", &[], &["frame"]));

        let order = solver.solve("g").unwrap();
        assert_eq!(order, ["producer", "consumer"]);
    }

    #[test]
    fn diamond_keeps_every_producer_ahead() {
        let mut solver = Solver::new();
        solver.add(io("sink", &["left", "right"], &[]));
        solver.add(io("a", &["source"], &["left"]));
        solver.add(io("b", &["source"], &["right"]));
        solver.add(io("head", &[], &["source"]));

        let order = solver.solve("g").unwrap();
        let position =
            |name: &str| order.iter().position(|m| m == name).unwrap();
        assert!(position("head") < position("a"));
        assert!(position("head") < position("b"));
        assert!(position("a") < position("sink"));
        assert!(position("b") < position("sink"));
    }

    #[test]
    fn unrelated_modules_share_a_tier() {
        let mut solver = Solver::new();
        solver.add(io("x", &[], &[]));
        solver.add(io("y", &[], &[]));

        let order = solver.solve("g").unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn dependency_edges_form_the_side_table() {
        let mut solver = Solver::new();
        solver.add(io("consumer", &["frame"], &[]));
        solver.add(io("producer", &[], &["frame"]));

        let edges = solver.dependency_edges();
        assert_eq!(edges, [("producer".to_owned(), "consumer".to_owned())]);
    }

    #[test]
    fn cycle_is_reported_as_cyclic_graph() {
        let mut solver = Solver::new();
        solver.add(io("a", &["loop-in"], &["loop-out"]));
        solver.add(io("b", &["loop-out"], &["loop-in"]));

        let result = solver.solve("g");
        assert!(matches!(
            result,
            Err(OrchestratorError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn chain_at_the_depth_budget_still_solves() {
        let order = chain(300).solve("g").unwrap();
        assert_eq!(order.len(), 300);
        assert_eq!(order.first().map(String::as_str), Some("m0"));
        assert_eq!(order.last().map(String::as_str), Some("m299"));
    }

    #[test]
    fn chain_past_the_depth_budget_is_cyclic() {
        let result = chain(301).solve("g");
        assert!(matches!(
            result,
            Err(OrchestratorError::CyclicGraph { .. })
        ));
    }
}
