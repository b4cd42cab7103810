use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use weave_core::error::{Result, WeaveError};

/// Validate a dependency graph and return a topological ordering.
///
/// `nodes` lists `(id, dependency ids)` in declaration order. Among tasks that
/// are ready at the same time the declared order is kept, so the same input
/// always yields the same sequence.
///
/// # Errors
/// `Validation` on an empty id, a duplicate id, a dependency on an unknown id,
/// a self-dependency, or a cycle.
pub fn topological_order(nodes: &[(String, Vec<String>)]) -> Result<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index = HashMap::new();

    for (id, _) in nodes {
        if id.trim().is_empty() {
            return Err(WeaveError::Validation("task id must not be empty".into()));
        }
        if index.insert(id.as_str(), graph.add_node(id.as_str())).is_some() {
            return Err(WeaveError::Validation(format!("duplicate task id '{}'", id)));
        }
    }

    for (id, deps) in nodes {
        let to = index[id.as_str()];
        for dep in deps {
            if dep == id {
                return Err(WeaveError::Validation(format!(
                    "task '{}' depends on itself",
                    id
                )));
            }
            let from = index.get(dep.as_str()).ok_or_else(|| {
                WeaveError::Validation(format!(
                    "task '{}' depends on unknown task '{}'",
                    id, dep
                ))
            })?;
            graph.add_edge(*from, to, ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        WeaveError::Validation(format!(
            "dependency cycle through task '{}'",
            graph[cycle.node_id()]
        ))
    })?;

    // Kahn's algorithm, always taking the earliest-declared ready task.
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let next = nodes
            .iter()
            .find(|(id, deps)| {
                !emitted.contains(id.as_str()) && deps.iter().all(|d| emitted.contains(d.as_str()))
            })
            .map(|(id, _)| id.as_str())
            .ok_or_else(|| WeaveError::Internal("topological walk stalled".into()))?;
        emitted.insert(next);
        order.push(next.to_string());
    }
    Ok(order)
}

/// Check that `sequence` visits every task after all of its dependencies.
pub fn is_topological(sequence: &[String], deps_of: impl Fn(&str) -> Vec<String>) -> bool {
    let position: HashMap<&str, usize> = sequence
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    sequence.iter().enumerate().all(|(i, id)| {
        deps_of(id)
            .iter()
            .all(|d| position.get(d.as_str()).is_some_and(|p| *p < i))
    })
}
