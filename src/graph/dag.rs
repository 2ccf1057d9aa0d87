use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Directed acyclic graph over dense vertex indexes. Edges run from
/// producer to consumer and any edge that would close a cycle is refused.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    out: Vec<BTreeSet<usize>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self) -> usize {
        self.out.push(BTreeSet::new());
        self.out.len() - 1
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Add `from -> to`. Returns false, leaving the graph untouched, for
    /// self edges and edges that would create a cycle.
    pub fn add_edge(&mut self, from: usize, to: usize) -> bool {
        if from == to || self.has_path(to, from) {
            return false;
        }
        self.out[from].insert(to);
        true
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.out.get(from).is_some_and(|o| o.contains(&to))
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.out
            .iter()
            .enumerate()
            .flat_map(|(from, outs)| outs.iter().map(move |to| (from, *to)))
    }

    pub fn has_path(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.out.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if std::mem::replace(&mut seen[node], true) {
                continue;
            }
            stack.extend(self.out[node].iter().copied());
        }
        false
    }

    /// Remove every edge `u -> v` that is implied by a longer path.
    pub fn reduce_transitively(&mut self) {
        for from in 0..self.out.len() {
            let targets: Vec<usize> = self.out[from].iter().copied().collect();
            for to in &targets {
                let implied = self.out[from]
                    .iter()
                    .any(|mid| mid != to && self.has_path(*mid, *to));
                if implied {
                    self.out[from].remove(to);
                }
            }
        }
    }

    /// Kahn's algorithm over the vertices reachable from `start`. Among
    /// vertices that are ready at the same time, lower indexes come first.
    pub fn topological_order(&self, start: usize) -> Vec<usize> {
        let mut reachable = vec![false; self.out.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if std::mem::replace(&mut reachable[node], true) {
                continue;
            }
            stack.extend(self.out[node].iter().copied());
        }

        let mut in_degree = vec![0usize; self.out.len()];
        for (from, to) in self.edges() {
            if reachable[from] {
                in_degree[to] += 1;
            }
        }

        let mut ready = BinaryHeap::new();
        ready.push(Reverse(start));
        let mut order = Vec::new();
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in &self.out[node] {
                in_degree[*next] -= 1;
                if in_degree[*next] == 0 {
                    ready.push(Reverse(*next));
                }
            }
        }
        order
    }
}
