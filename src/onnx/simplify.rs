use super::proto::{GraphProto, TensorProto};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimplifyStats {
    pub identities_removed: usize,
    pub initializers_merged: usize,
    pub dead_nodes_removed: usize,
    pub dead_initializers_removed: usize,
}

/// Rewrites `graph` in place into an equivalent, smaller graph.
pub fn simplify(graph: &mut GraphProto) -> SimplifyStats {
    let mut stats = SimplifyStats {
        identities_removed: eliminate_identities(graph),
        initializers_merged: merge_duplicate_initializers(graph),
        ..Default::default()
    };
    let (nodes, initializers) = eliminate_dead_code(graph);
    stats.dead_nodes_removed = nodes;
    stats.dead_initializers_removed = initializers;

    tracing::debug!(?stats, "Simplified graph");
    stats
}

fn rename_uses(graph: &mut GraphProto, from: &str, to: &str) {
    for node in &mut graph.node {
        for input in node.input.iter_mut().filter(|i| i.as_str() == from) {
            *input = to.to_string();
        }
    }
}

fn eliminate_identities(graph: &mut GraphProto) -> usize {
    let graph_inputs: HashSet<String> = graph
        .input
        .iter()
        .map(|v| v.name.clone())
        .chain(graph.initializer.iter().map(|t| t.name.clone()))
        .collect();
    let graph_outputs: HashSet<String> = graph.output.iter().map(|v| v.name.clone()).collect();

    let mut removed = 0;
    let mut idx = 0;
    while idx < graph.node.len() {
        let node = &graph.node[idx];
        if node.op_type != "Identity" || node.input.len() != 1 || node.output.len() != 1 {
            idx += 1;
            continue;
        }
        let source = node.input[0].clone();
        let target = node.output[0].clone();

        if !graph_outputs.contains(&target) {
            graph.node.remove(idx);
            rename_uses(graph, &target, &source);
            removed += 1;
            continue;
        }

        // The identity names a graph output: let the producer write it directly.
        let producer = graph
            .node
            .iter()
            .position(|n| n.output.iter().any(|o| *o == source));
        match producer {
            Some(p) if !graph_inputs.contains(&source) && !graph_outputs.contains(&source) => {
                graph.node.remove(idx);
                let p = if p > idx { p - 1 } else { p };
                for output in graph.node[p].output.iter_mut().filter(|o| **o == source) {
                    *output = target.clone();
                }
                rename_uses(graph, &source, &target);
                removed += 1;
            }
            _ => idx += 1,
        }
    }
    removed
}

fn merge_duplicate_initializers(graph: &mut GraphProto) -> usize {
    let mut kept: Vec<TensorProto> = Vec::with_capacity(graph.initializer.len());
    let mut renames: HashMap<String, String> = HashMap::new();

    for tensor in graph.initializer.drain(..) {
        match kept.iter().find(|k| k.same_content(&tensor)) {
            Some(original) => {
                renames.insert(tensor.name.clone(), original.name.clone());
            }
            None => kept.push(tensor),
        }
    }
    graph.initializer = kept;

    for node in &mut graph.node {
        for input in &mut node.input {
            if let Some(target) = renames.get(input.as_str()) {
                *input = target.clone();
            }
        }
    }
    renames.len()
}

fn eliminate_dead_code(graph: &mut GraphProto) -> (usize, usize) {
    let mut live: HashSet<String> = graph.output.iter().map(|v| v.name.clone()).collect();
    let mut keep = vec![false; graph.node.len()];

    for (idx, node) in graph.node.iter().enumerate().rev() {
        if node.output.iter().any(|o| live.contains(o)) {
            keep[idx] = true;
            live.extend(node.input.iter().filter(|i| !i.is_empty()).cloned());
        }
    }

    let nodes_before = graph.node.len();
    let mut keep_iter = keep.into_iter();
    graph.node.retain(|_| keep_iter.next().unwrap_or(false));

    let initializers_before = graph.initializer.len();
    graph.initializer.retain(|t| live.contains(&t.name));

    (
        nodes_before - graph.node.len(),
        initializers_before - graph.initializer.len(),
    )
}
