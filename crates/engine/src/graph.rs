//! Block graph: static dependency edges and evaluation order.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B watches something A produces"
//! ```
//!
//! Blocks are ordered so that, outside of cycles, A is evaluated before B.
//! Edges that cannot respect the order (self-loops and back edges inside a
//! strongly connected component) are tagged `Feedback`: their effect is seen
//! in the next propagation round, never in the current one.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tabflow_core::Ident;

use crate::block::{Activation, Block};
use crate::change::{ColumnKey, Register};

/// Kind of dependency between two blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Producer is ordered before the watcher; satisfied within a round.
    Forward,
    /// Part of a cycle; satisfied in a later round.
    Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

/// Compiled set of blocks with their evaluation order.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    /// Blocks in declaration order.
    blocks: Vec<Block>,
    /// Block indices in evaluation order.
    order: Vec<usize>,
    /// rank[b] = position of block b in `order`.
    rank: Vec<usize>,
    edges: Vec<Edge>,
    /// Watched table -> (column key, block index).
    watchers: FxHashMap<Ident, Vec<(ColumnKey, usize)>>,
}

impl BlockGraph {
    pub fn new(blocks: Vec<Block>) -> Self {
        let n = blocks.len();

        let mut watchers: FxHashMap<Ident, Vec<(ColumnKey, usize)>> = FxHashMap::default();
        for (ix, block) in blocks.iter().enumerate() {
            for w in block.watch() {
                watchers.entry(w.table).or_default().push((w.column, ix));
            }
        }

        // succs[a] = blocks watching something a produces (sorted, deduplicated)
        let succs: Vec<Vec<usize>> = blocks
            .iter()
            .map(|producer| {
                let mut out: Vec<usize> = (0..n)
                    .filter(|&b| producer.produce().iter().any(|p| blocks[b].watches(p)))
                    .collect();
                out.dedup();
                out
            })
            .collect();

        let sccs = strongly_connected(&succs);
        let order = condensation_order(&succs, &sccs);

        let mut rank = vec![0; n];
        for (pos, &b) in order.iter().enumerate() {
            rank[b] = pos;
        }

        let mut edges = Vec::new();
        for (from, targets) in succs.iter().enumerate() {
            for &to in targets {
                let kind = if rank[from] < rank[to] { EdgeKind::Forward } else { EdgeKind::Feedback };
                edges.push(Edge { from, to, kind });
            }
        }

        Self { blocks, order, rank, edges, watchers }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, ix: usize) -> &Block {
        &self.blocks[ix]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block indices in evaluation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Position of a block in evaluation order.
    pub fn rank(&self, ix: usize) -> usize {
        self.rank[ix]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Blocks whose watch set intersects `register`.
    pub fn watchers(&self, register: &Register) -> Vec<usize> {
        let Some(entries) = self.watchers.get(&register.table) else {
            return Vec::new();
        };
        let mut out: Vec<usize> = entries
            .iter()
            .filter(|(column, _)| match (register.column, *column) {
                (ColumnKey::Any, _) | (_, ColumnKey::Any) => true,
                (ColumnKey::Column(a), ColumnKey::Column(b)) => a == b,
            })
            .map(|(_, ix)| *ix)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// `OnLoad` blocks, in evaluation order.
    pub fn on_load_blocks(&self) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&b| self.blocks[b].activation() == Activation::OnLoad)
            .collect()
    }

    /// Groups of blocks that feed back into themselves, in evaluation order.
    pub fn cycles(&self) -> Vec<Vec<usize>> {
        let succs = self.successors();
        strongly_connected(&succs)
            .into_iter()
            .filter(|scc| scc.len() > 1 || succs[scc[0]].contains(&scc[0]))
            .map(|mut scc| {
                scc.sort_by_key(|&b| self.rank[b]);
                scc
            })
            .collect()
    }

    fn successors(&self) -> Vec<Vec<usize>> {
        let mut succs = vec![Vec::new(); self.blocks.len()];
        for edge in &self.edges {
            succs[edge.from].push(edge.to);
        }
        succs
    }

    /// Serializable description for introspection.
    pub fn describe(&self) -> GraphDescription {
        GraphDescription {
            blocks: self
                .order
                .iter()
                .map(|&b| {
                    let block = &self.blocks[b];
                    BlockDescription {
                        name: block.name().to_string(),
                        rank: self.rank[b],
                        activation: block.activation(),
                        watch: block.watch().to_vec(),
                        produce: block.produce().to_vec(),
                    }
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeDescription {
                    from: self.blocks[e.from].name().to_string(),
                    to: self.blocks[e.to].name().to_string(),
                    kind: e.kind,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphDescription {
    /// Blocks in evaluation order.
    pub blocks: Vec<BlockDescription>,
    pub edges: Vec<EdgeDescription>,
}

impl GraphDescription {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn feedback_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.kind == EdgeKind::Feedback).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockDescription {
    pub name: String,
    pub rank: usize,
    pub activation: Activation,
    pub watch: Vec<Register>,
    pub produce: Vec<Register>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Tarjan's SCC algorithm, iterative to avoid stack overflow on deep graphs.
///
/// Nodes are visited in index order and neighbours in list order, so the
/// output is deterministic. Every node belongs to exactly one component.
fn strongly_connected(succs: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct DfsFrame {
        node: usize,
        next_idx: usize,
    }

    let n = succs.len();
    let mut index_counter: usize = 0;
    let mut indices: Vec<Option<usize>> = vec![None; n];
    let mut lowlinks: Vec<usize> = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut sccs: Vec<Vec<usize>> = Vec::new();

    for root in 0..n {
        if indices[root].is_some() {
            continue;
        }

        indices[root] = Some(index_counter);
        lowlinks[root] = index_counter;
        index_counter += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut dfs_stack = vec![DfsFrame { node: root, next_idx: 0 }];

        while let Some(frame) = dfs_stack.last_mut() {
            let v = frame.node;
            if frame.next_idx < succs[v].len() {
                let w = succs[v][frame.next_idx];
                frame.next_idx += 1;

                match indices[w] {
                    None => {
                        indices[w] = Some(index_counter);
                        lowlinks[w] = index_counter;
                        index_counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        dfs_stack.push(DfsFrame { node: w, next_idx: 0 });
                    }
                    Some(w_idx) if on_stack[w] => {
                        lowlinks[v] = lowlinks[v].min(w_idx);
                    }
                    Some(_) => {}
                }
            } else {
                dfs_stack.pop();
                if let Some(parent) = dfs_stack.last() {
                    lowlinks[parent.node] = lowlinks[parent.node].min(lowlinks[v]);
                }

                // SCC root check
                if Some(lowlinks[v]) == indices[v] {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    scc.sort_unstable();
                    sccs.push(scc);
                }
            }
        }
    }

    sccs
}

/// Order nodes by Kahn's algorithm over the component DAG.
///
/// Ready components are taken smallest-first by their lowest node index;
/// nodes inside a component keep index order.
fn condensation_order(succs: &[Vec<usize>], sccs: &[Vec<usize>]) -> Vec<usize> {
    let mut comp_of = vec![0; succs.len()];
    for (c, scc) in sccs.iter().enumerate() {
        for &node in scc {
            comp_of[node] = c;
        }
    }

    let mut comp_succs: Vec<Vec<usize>> = vec![Vec::new(); sccs.len()];
    let mut in_degree = vec![0usize; sccs.len()];
    for (from, targets) in succs.iter().enumerate() {
        for &to in targets {
            let (cf, ct) = (comp_of[from], comp_of[to]);
            if cf != ct && !comp_succs[cf].contains(&ct) {
                comp_succs[cf].push(ct);
                in_degree[ct] += 1;
            }
        }
    }

    // Min-heap keyed by the component's lowest node index
    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = sccs
        .iter()
        .enumerate()
        .filter(|(c, _)| in_degree[*c] == 0)
        .map(|(c, scc)| Reverse((scc[0], c)))
        .collect();

    let mut order = Vec::with_capacity(succs.len());
    while let Some(Reverse((_, c))) = ready.pop() {
        order.extend_from_slice(&sccs[c]);
        for &next in &comp_succs[c] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((sccs[next][0], next)));
            }
        }
    }
    order
}
