//! Decides which nodes are stale and must be (re)built this run.
//!
//! Timestamps flow downstream from the roots as a wavefront.  A node whose own
//! file is older than what flows into it (or is missing) becomes a target
//! together with its whole dominator set; otherwise its time is forwarded to
//! its dependents.  The propagated time into a node is the maximum over all
//! of its inputs, since any newer input makes it stale.

use crate::closure::Closure;
use crate::densemap::DenseMap;
use crate::error::BuildError;
use crate::fs::{FileSystem, MTime, MTimeCache};
use crate::graph::{Graph, Kind, NodeId};
use rustc_hash::FxHashSet;
use tracing::{debug, info};

/// Synthetic time that dominates every real file time.
pub const FAR_FUTURE: u64 = u64::MAX / 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Tolerate coarse filesystem timestamps ("support crappy filesystems").
    pub scfs: bool,
    /// Comparison window used in scfs mode.
    pub slack_ms: u64,
}

/// Result of planning.
#[derive(Debug)]
pub struct Plan {
    targets: DenseMap<NodeId, bool>,
    times: DenseMap<NodeId, Option<u64>>,
    target_count: usize,
    /// Missing generated nodes that no stale input reaches, so nothing
    /// this run would produce them.
    pub unreachable: Vec<NodeId>,
}

impl Plan {
    fn new(graph: &Graph) -> Self {
        Plan {
            targets: DenseMap::new_sized(graph.id_bound(), false),
            times: DenseMap::new_sized(graph.id_bound(), None),
            target_count: 0,
            unreachable: Vec::new(),
        }
    }

    pub fn is_target(&self, id: NodeId) -> bool {
        self.targets.lookup(id).copied().unwrap_or(false)
    }

    pub fn targets(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.targets.all_ids().filter(move |&id| self.targets[id])
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Newest input time that reached the node, if the wavefront got there.
    pub fn dominating_time(&self, id: NodeId) -> Option<u64> {
        self.times.lookup(id).copied().flatten()
    }

    /// Drop every target that none of `want` needs.
    fn restrict(&mut self, graph: &Graph, want: &[NodeId]) {
        let mut needed = FxHashSet::default();
        let mut stack: Vec<NodeId> = want.to_vec();
        while let Some(id) = stack.pop() {
            if let Some(node) = graph.get(id) {
                if needed.insert(id) {
                    stack.extend(node.inputs());
                }
            }
        }
        for id in graph.ids() {
            if self.targets[id] && !needed.contains(&id) {
                self.targets[id] = false;
                self.target_count -= 1;
            }
        }
        self.unreachable.retain(|id| needed.contains(id));
    }
}

struct Planner<'a> {
    graph: &'a Graph,
    closure: &'a mut Closure,
    cache: &'a mut MTimeCache,
    fs: &'a dyn FileSystem,
    opts: PlanOptions,
    plan: Plan,
    frontier: Vec<(NodeId, u64)>,
    /// Producers that must rebuild because a wait node they write is a target.
    promote_queue: Vec<NodeId>,
}

impl<'a> Planner<'a> {
    fn mtime(&mut self, id: NodeId) -> std::io::Result<MTime> {
        self.cache.stat(self.fs, id, &self.graph.node(id).path)
    }

    /// Whether a file at `own` is out of date against an input at `input`.
    fn lags(&self, own: MTime, input: u64) -> bool {
        match own {
            MTime::Missing => true,
            MTime::Stamp(t) if self.opts.scfs => t.saturating_add(self.opts.slack_ms) < input,
            MTime::Stamp(t) => t < input,
        }
    }

    /// Record a (possibly larger) time reaching `id`, queueing it if it grew.
    fn advance(&mut self, id: NodeId, time: u64) {
        let grew = match self.plan.times[id] {
            None => true,
            Some(cur) => time > cur,
        };
        if grew {
            self.plan.times[id] = Some(time);
            self.frontier.push((id, time));
        }
    }

    fn mark_target(&mut self, id: NodeId) -> std::io::Result<()> {
        if self.plan.targets[id] {
            return Ok(());
        }
        let node = self.graph.node(id);
        if node.kind == Kind::Source {
            return Ok(());
        }
        let own = self.mtime(id)?;
        let node = self.graph.node(id);
        let producible = !node.deps().is_empty() || !node.weak_prerequisite_for().is_empty();
        if !producible && !own.exists() {
            // Nothing can make this file.
            return Ok(());
        }
        self.plan.targets[id] = true;
        self.plan.target_count += 1;
        if node.kind == Kind::Wait {
            self.promote_queue.extend(node.weak_prerequisite_for().iter().copied());
        }
        // Consumers outside an opaque dominator set still get a look.
        self.frontier.push((id, own.millis().unwrap_or(FAR_FUTURE)));
        Ok(())
    }

    /// Make `id` and everything it dominates a target.
    fn promote(&mut self, id: NodeId) -> Result<(), BuildError> {
        let set = self.closure.dominators(self.graph, id)?;
        debug!(path = %self.graph.node(id).path, dominated = set.len(), "stale");
        for &m in set.iter() {
            self.mark_target(m)?;
        }
        Ok(())
    }

    fn seed(&mut self) -> Result<(), BuildError> {
        let graph = self.graph;
        for node in graph.nodes() {
            let id = node.id;
            if node.is_marked() {
                self.promote(id)?;
                self.advance(id, FAR_FUTURE);
                continue;
            }
            if node.kind.is_buildable() {
                for &w in node.weak_deps() {
                    if !self.mtime(w)?.exists() {
                        debug!(path = %node.path, missing = %graph.node(w).path, "side output missing");
                        self.promote(id)?;
                        break;
                    }
                }
            }
            if node.deps().is_empty() {
                if let MTime::Stamp(t) = self.mtime(id)? {
                    self.advance(id, t);
                }
            }
        }
        Ok(())
    }

    fn propagate(&mut self) -> Result<(), BuildError> {
        let graph = self.graph;
        loop {
            while let Some(id) = self.promote_queue.pop() {
                self.promote(id)?;
            }
            let Some((id, time)) = self.frontier.pop() else {
                if self.promote_queue.is_empty() {
                    return Ok(());
                }
                continue;
            };
            for d in graph.node(id).outputs() {
                if self.plan.targets[d] {
                    continue;
                }
                let own = self.mtime(d)?;
                if graph.node(d).kind == Kind::Wait {
                    // Wait nodes pass times through without a decision.
                    self.advance(d, own.millis().unwrap_or(0).max(time));
                } else if self.lags(own, time) {
                    self.promote(d)?;
                } else {
                    self.advance(d, own.millis().unwrap_or(0).max(time));
                }
            }
        }
    }

    fn find_unreachable(&mut self) -> std::io::Result<()> {
        let graph = self.graph;
        for node in graph.nodes() {
            if self.plan.targets[node.id] || !node.kind.is_buildable() || node.deps().is_empty() {
                continue;
            }
            if !self.mtime(node.id)?.exists() {
                self.plan.unreachable.push(node.id);
            }
        }
        Ok(())
    }
}

/// Plan a build over an acyclic graph.  When `want` is non-empty only the
/// nodes it needs can be targets.
pub fn plan(
    graph: &Graph,
    closure: &mut Closure,
    cache: &mut MTimeCache,
    fs: &dyn FileSystem,
    opts: PlanOptions,
    want: &[NodeId],
) -> Result<Plan, BuildError> {
    let mut planner = Planner {
        graph,
        closure,
        cache,
        fs,
        opts,
        plan: Plan::new(graph),
        frontier: Vec::new(),
        promote_queue: Vec::new(),
    };
    planner.seed()?;
    planner.propagate()?;
    planner.find_unreachable()?;
    let mut plan = planner.plan;
    if !want.is_empty() {
        plan.restrict(graph, want);
    }
    info!(
        targets = plan.target_count(),
        unreachable = plan.unreachable.len(),
        "planned"
    );
    Ok(plan)
}
