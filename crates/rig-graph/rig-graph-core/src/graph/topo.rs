use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hashbrown::{HashMap, HashSet};

use crate::error::GraphError;
use crate::ids::NodeId;

use super::{IkSolve, RigGraph, ScalarDriver};

/// Per-node index of the edges, drivers and IK solves that move it, by position in the
/// graph's lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Incoming {
    edges: HashMap<NodeId, Vec<usize>>,
    drivers: HashMap<NodeId, Vec<usize>>,
    solves: HashMap<NodeId, Vec<usize>>,
}

impl Incoming {
    pub(crate) fn edge(&mut self, target: NodeId, index: usize) {
        self.edges.entry(target).or_default().push(index);
    }

    pub(crate) fn driver(&mut self, driver: &ScalarDriver, index: usize) {
        for out in &driver.outputs {
            let list = self.drivers.entry(out.node).or_default();
            if !list.contains(&index) {
                list.push(index);
            }
        }
    }

    pub(crate) fn solve(&mut self, solve: &IkSolve, index: usize) {
        self.solves.entry(solve.start).or_default().push(index);
    }

    pub(crate) fn rebuild(graph: &RigGraph) -> Self {
        let mut index = Incoming::default();
        for (i, edge) in graph.edges.iter().enumerate() {
            index.edge(edge.target, i);
        }
        for (i, driver) in graph.drivers.iter().enumerate() {
            index.driver(driver, i);
        }
        for (i, solve) in graph.ik_solves.iter().enumerate() {
            index.solve(solve, i);
        }
        index
    }
}

/// `dependents[i]` lists the nodes that must be evaluated after node `i`.
///
/// Static parents, blend edge sources, driver transform inputs and IK goal/pole all
/// count. Attribute reads in weights do not: attributes are scalar inputs, not transforms.
fn dependents(graph: &RigGraph, skip_edge: Option<usize>) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); graph.nodes.len()];
    for node in &graph.nodes {
        if let Some(p) = node.parent {
            adj[p.index()].push(node.id.index());
        }
    }
    for (i, edge) in graph.edges.iter().enumerate() {
        if Some(i) == skip_edge {
            continue;
        }
        for s in &edge.sources {
            adj[s.node.index()].push(edge.target.index());
        }
    }
    let mut inputs = Vec::new();
    for driver in &graph.drivers {
        inputs.clear();
        driver.expr.transform_inputs(&mut inputs);
        for out in &driver.outputs {
            for n in &inputs {
                adj[n.index()].push(out.node.index());
            }
        }
    }
    for solve in &graph.ik_solves {
        adj[solve.goal.index()].push(solve.start.index());
        adj[solve.pole.index()].push(solve.start.index());
    }
    adj
}

/// Direct transform inputs of `id`: its static parent, the sources of the edges into it,
/// the transforms its drivers read and the goal/pole of solves starting at it.
fn upstream(graph: &RigGraph, id: NodeId, skip_edge: Option<usize>, out: &mut Vec<NodeId>) {
    if let Some(parent) = graph.nodes.get(id.index()).and_then(|n| n.parent) {
        out.push(parent);
    }
    let index = &graph.incoming;
    for i in index.edges.get(&id).into_iter().flatten() {
        if Some(*i) != skip_edge {
            out.extend(graph.edges[*i].sources.iter().map(|s| s.node));
        }
    }
    for i in index.drivers.get(&id).into_iter().flatten() {
        graph.drivers[*i].expr.transform_inputs(out);
    }
    for i in index.solves.get(&id).into_iter().flatten() {
        let solve = &graph.ik_solves[*i];
        out.extend([solve.goal, solve.pole]);
    }
}

/// Whether `node` transitively depends on `on`, ignoring the edge at `skip_edge`.
///
/// Walks upstream from `node`, so only what feeds `node` is visited.
pub(crate) fn depends_on(graph: &RigGraph, node: NodeId, on: NodeId, skip_edge: Option<usize>) -> bool {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![node];
    let mut inputs = Vec::new();
    while let Some(u) = stack.pop() {
        if u == on {
            return true;
        }
        if !seen.insert(u) {
            continue;
        }
        inputs.clear();
        upstream(graph, u, skip_edge, &mut inputs);
        stack.extend(inputs.iter().copied().filter(|v| !seen.contains(v)));
    }
    false
}

/// Kahn ordering. Among ready nodes the lowest id goes first, so the order only depends on
/// insertion order.
pub fn topo_order(graph: &RigGraph) -> Result<Vec<NodeId>, GraphError> {
    let adj = dependents(graph, None);
    let mut indeg = vec![0usize; adj.len()];
    for vs in &adj {
        for v in vs {
            indeg[*v] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indeg
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(adj.len());
    while let Some(Reverse(u)) = ready.pop() {
        order.push(NodeId(u as u32));
        for v in &adj[u] {
            indeg[*v] -= 1;
            if indeg[*v] == 0 {
                ready.push(Reverse(*v));
            }
        }
    }

    if order.len() != adj.len() {
        // Only reachable for graphs that were deserialized rather than built.
        let stuck = indeg
            .iter()
            .position(|d| *d > 0)
            .map_or(NodeId(0), |i| NodeId(i as u32));
        return Err(GraphError::Cycle {
            target: stuck,
            driver: stuck,
        });
    }
    Ok(order)
}
