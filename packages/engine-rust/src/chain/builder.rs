//! Chain building: phase partitioning plus a stable topological sort inside
//! each phase.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use switchyard_core::{BuildError, Chain, ChainEntry, Interceptor, Phase, PhaseSnapshot};

/// Turns a set of interceptors into a totally ordered [`Chain`].
///
/// Building is pure and deterministic: the same snapshot and the same
/// interceptors in the same insertion order always yield the same chain.
///
/// - Groups are ordered by phase ordinal.
/// - Inside a group, `before`/`after` constraints are honoured and ties keep
///   insertion order.
/// - Constraints naming interceptors of other phases, or absent ids, are
///   ignored.
/// - A repeated id keeps its first occurrence.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    phases: PhaseSnapshot,
}

impl ChainBuilder {
    #[must_use]
    pub fn new(phases: PhaseSnapshot) -> Self {
        Self { phases }
    }

    #[must_use]
    pub fn phases(&self) -> &PhaseSnapshot {
        &self.phases
    }

    /// Builds a chain from `interceptors` in insertion order.
    ///
    /// # Errors
    ///
    /// - [`BuildError::UnknownPhase`] if an interceptor names a phase missing
    ///   from the snapshot.
    /// - [`BuildError::CyclicOrdering`] if constraints inside a phase form a
    ///   cycle.
    pub fn build(&self, interceptors: &[Arc<dyn Interceptor>]) -> Result<Chain, BuildError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(interceptors.len());
        let mut groups: BTreeMap<u32, (Phase, Vec<&Arc<dyn Interceptor>>)> = BTreeMap::new();

        for interceptor in interceptors {
            let id = interceptor.id();
            if !seen.insert(id) {
                tracing::debug!(interceptor = id, "duplicate interceptor id ignored");
                continue;
            }
            let phase_name = interceptor.descriptor().phase();
            let phase = self
                .phases
                .get(phase_name)
                .ok_or_else(|| BuildError::UnknownPhase {
                    name: phase_name.to_string(),
                })?;
            groups
                .entry(phase.ordinal)
                .or_insert_with(|| (phase.clone(), Vec::new()))
                .1
                .push(interceptor);
        }

        let mut entries = Vec::with_capacity(seen.len());
        for (phase, group) in groups.into_values() {
            for index in order_group(&phase, &group)? {
                entries.push(ChainEntry::new(phase.clone(), Arc::clone(group[index])));
            }
        }

        let chain = Chain::new(entries);
        tracing::debug!(len = chain.len(), "built chain");
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// Intra-phase ordering
// ---------------------------------------------------------------------------

/// Orders one phase group with Kahn's algorithm, always emitting the
/// earliest-inserted ready interceptor next.
fn order_group(
    phase: &Phase,
    group: &[&Arc<dyn Interceptor>],
) -> Result<Vec<usize>, BuildError> {
    let index: HashMap<&str, usize> = group
        .iter()
        .enumerate()
        .map(|(i, interceptor)| (interceptor.id(), i))
        .collect();

    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (i, interceptor) in group.iter().enumerate() {
        let descriptor = interceptor.descriptor();
        for target in descriptor.before() {
            if let Some(&j) = index.get(target.as_str()) {
                if i != j {
                    edges.insert((i, j));
                }
            }
        }
        for source in descriptor.after() {
            if let Some(&j) = index.get(source.as_str()) {
                if i != j {
                    edges.insert((j, i));
                }
            }
        }
    }

    let n = group.len();
    let mut successors = vec![Vec::new(); n];
    let mut predecessors = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for &(from, to) in &edges {
        successors[from].push(to);
        predecessors[to].push(from);
        in_degree[to] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    let cycle = find_cycle(&in_degree, &predecessors);
    Err(BuildError::CyclicOrdering {
        phase: phase.name.clone(),
        ids: cycle.into_iter().map(|i| group[i].id().to_string()).collect(),
    })
}

/// Extracts one cycle from the nodes Kahn's algorithm could not emit.
///
/// Every stuck node has a stuck predecessor, so walking predecessors from any
/// stuck node must revisit a node; the revisited stretch is a cycle. The
/// result is in execution-constraint order, rotated to start at the
/// earliest-inserted member.
fn find_cycle(in_degree: &[usize], predecessors: &[Vec<usize>]) -> Vec<usize> {
    let stuck = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..in_degree.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&pred) = predecessors[current].iter().filter(|&&p| stuck(p)).min() else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&p| p == pred) {
            let mut cycle: Vec<usize> = path.split_off(pos);
            cycle.reverse();
            if let Some(min_pos) = cycle.iter().enumerate().min_by_key(|&(_, &i)| i).map(|(p, _)| p) {
                cycle.rotate_left(min_pos);
            }
            return cycle;
        }
        path.push(pred);
        current = pred;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
