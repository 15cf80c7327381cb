//! Dependency cycle analysis over provides/requires edges.
//!
//! An edge A → B means intent A requires something intent B provides. If
//! these edges form a cycle, the agents deadlock waiting on each other.
//! Cycles are enumerated with a DFS walk; the safe execution order uses
//! Kahn's algorithm (dependencies first, deterministic tie order).

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use convergent_core::matching::names_overlap;
use convergent_core::protocol::Intent;
use convergent_core::{ConvergentError, ConvergentResult};

/// A circular dependency in the intent graph. The last element depends on
/// the first, closing the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle {
    pub intent_ids: Vec<String>,
    pub agent_ids: Vec<String>,
}

impl std::fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .intent_ids
            .iter()
            .zip(self.agent_ids.iter())
            .map(|(iid, aid)| format!("{iid}({aid})"))
            .collect();
        write!(f, "{} -> {}", parts.join(" -> "), parts[0])
    }
}

fn build_graph(intents: &[Intent]) -> (DiGraph<usize, ()>, Vec<NodeIndex>) {
    let mut graph = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..intents.len()).map(|i| graph.add_node(i)).collect();

    for (ai, a) in intents.iter().enumerate() {
        for req in &a.requires {
            for (bi, b) in intents.iter().enumerate() {
                if ai == bi {
                    continue;
                }
                let provides_it = b
                    .provides
                    .iter()
                    .any(|prov| req.kind == prov.kind && names_overlap(&req.name, &prov.name));
                if provides_it && graph.find_edge(nodes[ai], nodes[bi]).is_none() {
                    graph.add_edge(nodes[ai], nodes[bi], ());
                }
            }
        }
    }

    (graph, nodes)
}

/// Enumerate all dependency cycles among the given intents.
pub fn find_cycles(intents: &[Intent]) -> Vec<DependencyCycle> {
    if intents.is_empty() {
        return Vec::new();
    }
    let (graph, nodes) = build_graph(intents);

    let mut cycles: Vec<DependencyCycle> = Vec::new();
    let mut visited = vec![false; intents.len()];
    let mut on_path = vec![false; intents.len()];
    let mut path: Vec<usize> = Vec::new();

    // Iterative DFS with an explicit stack of (node, next-neighbor-index).
    for start in 0..intents.len() {
        if visited[start] {
            continue;
        }
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        let neighbors = sorted_neighbors(&graph, &nodes, start);
        visited[start] = true;
        on_path[start] = true;
        path.push(start);
        stack.push((start, neighbors, 0));

        while let Some((node, neighbors, cursor)) = stack.pop() {
            if cursor < neighbors.len() {
                let next = neighbors[cursor];
                stack.push((node, neighbors, cursor + 1));

                if on_path[next] {
                    // Found a cycle: extract it from the path.
                    let cycle_start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let cycle_nodes = &path[cycle_start..];
                    let cycle = DependencyCycle {
                        intent_ids: cycle_nodes
                            .iter()
                            .map(|&n| intents[n].intent_id.clone())
                            .collect(),
                        agent_ids: cycle_nodes
                            .iter()
                            .map(|&n| intents[n].agent_id.clone())
                            .collect(),
                    };
                    if !cycles.contains(&cycle) {
                        cycles.push(cycle);
                    }
                } else if !visited[next] {
                    visited[next] = true;
                    on_path[next] = true;
                    path.push(next);
                    let next_neighbors = sorted_neighbors(&graph, &nodes, next);
                    stack.push((next, next_neighbors, 0));
                }
            } else {
                on_path[node] = false;
                path.pop();
            }
        }
    }

    cycles
}

/// Compute a safe execution order (dependencies first) with Kahn's
/// algorithm. Errors with cycle details when the graph is cyclic.
pub fn safe_execution_order(intents: &[Intent]) -> ConvergentResult<Vec<String>> {
    let cycles = find_cycles(intents);
    if !cycles.is_empty() {
        let rendered: Vec<String> = cycles.iter().map(|c| c.to_string()).collect();
        return Err(ConvergentError::validation(format!(
            "cannot order execution: {} dependency cycle(s): {}",
            cycles.len(),
            rendered.join("; ")
        )));
    }
    if intents.is_empty() {
        return Ok(Vec::new());
    }

    let (graph, nodes) = build_graph(intents);

    // Edge A -> B means A depends on B, so B must run first: count each
    // node's unmet dependencies and pop dependency-free nodes in
    // deterministic (publish) order.
    let mut pending_deps: Vec<usize> = nodes
        .iter()
        .map(|n| graph.neighbors_directed(*n, Direction::Outgoing).count())
        .collect();

    let mut queue: Vec<usize> = (0..intents.len()).filter(|&n| pending_deps[n] == 0).collect();
    let mut order = Vec::new();
    while !queue.is_empty() {
        let node = queue.remove(0);
        order.push(intents[node].intent_id.clone());
        let mut unblocked = Vec::new();
        for dependent in graph.neighbors_directed(nodes[node], Direction::Incoming) {
            let idx = graph[dependent];
            pending_deps[idx] -= 1;
            if pending_deps[idx] == 0 {
                unblocked.push(idx);
            }
        }
        unblocked.sort();
        queue.extend(unblocked);
        queue.sort();
    }

    Ok(order)
}

fn sorted_neighbors(
    graph: &DiGraph<usize, ()>,
    nodes: &[NodeIndex],
    node: usize,
) -> Vec<usize> {
    let mut neighbors: Vec<usize> = graph
        .neighbors_directed(nodes[node], Direction::Outgoing)
        .map(|n| graph[n])
        .collect();
    neighbors.sort();
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::protocol::{InterfaceKind, InterfaceSpec};

    fn intent(id: &str, agent: &str, provides: &str, requires: &str) -> Intent {
        let mut intent = Intent::new(id, agent, id);
        if !provides.is_empty() {
            intent.provides = vec![InterfaceSpec::new(provides, InterfaceKind::Function)];
        }
        if !requires.is_empty() {
            intent.requires = vec![InterfaceSpec::new(requires, InterfaceKind::Function)];
        }
        intent
    }

    #[test]
    fn acyclic_graph_has_no_cycles_and_orders_dependencies_first() {
        let intents = vec![
            intent("a", "agent-a", "AuthToken", "UserStore"),
            intent("b", "agent-b", "UserStore", ""),
        ];
        assert!(find_cycles(&intents).is_empty());
        let order = safe_execution_order(&intents).unwrap();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn mutual_requirements_form_a_cycle() {
        let intents = vec![
            intent("a", "agent-a", "AuthToken", "UserStore"),
            intent("b", "agent-b", "UserStore", "AuthToken"),
        ];
        let cycles = find_cycles(&intents);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].intent_ids.len(), 2);
        assert!(safe_execution_order(&intents).is_err());
    }

    #[test]
    fn unrelated_intents_order_deterministically() {
        let intents = vec![
            intent("z", "agent-a", "Alpha", ""),
            intent("m", "agent-b", "Beta", ""),
        ];
        let order = safe_execution_order(&intents).unwrap();
        assert_eq!(order, vec!["z".to_string(), "m".to_string()]);
    }
}
