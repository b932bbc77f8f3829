//! The build graph: files and generated artifacts, and the edges between them.
//!
//! Nodes live in a dense arena indexed by `NodeId`.  Every relation is stored
//! on both ends (`deps`/`prerequisite_for`, `weak_deps`/`weak_prerequisite_for`)
//! and the two sides are only ever updated together through `link`/`unlink`.

use crate::canon::canon_path;
use crate::densemap::{self, DenseMap};
use crate::error::GraphError;
use crate::fs::FileSystem;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(usize);

impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node is, which decides how it is built and how changes to it spread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A leaf file that is never built.
    Source,
    Compile,
    Link,
    Archive,
    /// An aggregate whose inputs changing does not by itself force its
    /// consumers to rebuild.
    SharedLib,
    /// Marks a side output of another node's command; never executed.
    Wait,
    /// Kind registered by an extension.
    Custom(String),
}

impl Kind {
    /// Short code used in the graph db.
    pub fn code(&self) -> &str {
        match self {
            Kind::Source => "D",
            Kind::Compile => "C",
            Kind::Link => "L",
            Kind::Archive => "A",
            Kind::SharedLib => "S",
            Kind::Wait => "W",
            Kind::Custom(name) => name,
        }
    }

    pub fn from_code(code: &str) -> Kind {
        match code {
            "D" => Kind::Source,
            "C" => Kind::Compile,
            "L" => Kind::Link,
            "A" => Kind::Archive,
            "S" => Kind::SharedLib,
            "W" => Kind::Wait,
            other => Kind::Custom(other.to_string()),
        }
    }

    /// Whether nodes of this kind run a command.
    pub fn is_buildable(&self) -> bool {
        !matches!(self, Kind::Source | Kind::Wait)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub path: String,
    /// Project or extension that registered the node.
    pub owner: String,
    pub kind: Kind,
    /// Command line recorded for the node, if the front end stored one.
    pub command: Option<String>,
    /// Set when something this node was built from got deleted.
    pub marked_for_deletion: bool,
    /// Set when the node's dependency set was replaced since its last build.
    pub marked_by_deps_changed: bool,
    deps: BTreeSet<NodeId>,
    prerequisite_for: BTreeSet<NodeId>,
    weak_deps: BTreeSet<NodeId>,
    weak_prerequisite_for: BTreeSet<NodeId>,
    blocked: BTreeSet<NodeId>,
}

impl Node {
    fn new(id: NodeId, path: String, kind: Kind, owner: String) -> Self {
        Node {
            id,
            path,
            owner,
            kind,
            command: None,
            marked_for_deletion: false,
            marked_by_deps_changed: false,
            deps: BTreeSet::new(),
            prerequisite_for: BTreeSet::new(),
            weak_deps: BTreeSet::new(),
            weak_prerequisite_for: BTreeSet::new(),
            blocked: BTreeSet::new(),
        }
    }

    /// Nodes that must finish before this one.
    pub fn deps(&self) -> &BTreeSet<NodeId> {
        &self.deps
    }
    /// Nodes that list this one in their `deps`.
    pub fn prerequisite_for(&self) -> &BTreeSet<NodeId> {
        &self.prerequisite_for
    }
    /// Wait nodes for the side outputs this node's command writes.
    pub fn weak_deps(&self) -> &BTreeSet<NodeId> {
        &self.weak_deps
    }
    /// For a wait node: the nodes whose commands write it.
    pub fn weak_prerequisite_for(&self) -> &BTreeSet<NodeId> {
        &self.weak_prerequisite_for
    }
    /// Nodes that may never become a dependency of this one.
    pub fn blocked(&self) -> &BTreeSet<NodeId> {
        &self.blocked
    }

    pub fn is_marked(&self) -> bool {
        self.marked_for_deletion || self.marked_by_deps_changed
    }

    /// Nodes this one waits on before it may run: its deps, plus its
    /// producers when it is a wait node.
    pub fn inputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.deps.iter().chain(self.weak_prerequisite_for.iter()).copied()
    }

    /// Nodes that can only run after this one: its dependents, plus the wait
    /// nodes it produces.
    pub fn outputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.prerequisite_for.iter().chain(self.weak_deps.iter()).copied()
    }
}

/// Result of cycle removal.
#[derive(Debug, Default)]
pub struct Roots {
    /// Nodes without any deps.
    pub roots: Vec<NodeId>,
    /// Edges (from, to) that were removed and blocked to break cycles.
    pub broken: Vec<(NodeId, NodeId)>,
}

#[derive(Default)]
pub struct Graph {
    nodes: DenseMap<NodeId, Option<Node>>,
    by_path: FxHashMap<String, NodeId>,
    live: usize,
}

fn check_name(what: &'static str, name: &str) -> Result<(), GraphError> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(GraphError::InvalidName {
            what,
            name: name.to_string(),
        });
    }
    Ok(())
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// The id the next added node will get.  Ids are never reused.
    pub fn next_id(&self) -> NodeId {
        self.nodes.next_id()
    }

    /// Advance the id counter, e.g. to restore a persisted counter.
    pub(crate) fn reserve_ids(&mut self, next: NodeId) {
        use densemap::Index;
        if next.index() > self.nodes.len() {
            self.nodes.set_grow(NodeId(next.index() - 1), None, None);
        }
    }

    /// Size of the id space, i.e. one past the largest id ever handed out.
    pub fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    /// Ids of all live nodes, in increasing order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .all_ids()
            .filter(move |&id| self.nodes[id].is_some())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().flatten()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.lookup(id).and_then(|n| n.as_ref())
    }

    /// Look up a live node.  Panics on a dead or unknown id; use `get` for ids
    /// that come from outside the graph.
    pub fn node(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(n) => n,
            None => panic!("no node {}", id),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.lookup_mut(id).and_then(|n| n.as_mut()) {
            Some(n) => n,
            None => panic!("no node {}", id),
        }
    }

    fn check(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.get(id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_id(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(&canon_path(path)).copied()
    }

    /// Register a new file.
    pub fn add_node(&mut self, path: &str, kind: Kind, owner: &str) -> Result<NodeId, GraphError> {
        let id = self.next_id();
        self.insert_node(id, path, kind, owner)?;
        Ok(id)
    }

    /// Register a file under a given id, as when loading a persisted graph.
    pub(crate) fn insert_node(
        &mut self,
        id: NodeId,
        path: &str,
        kind: Kind,
        owner: &str,
    ) -> Result<(), GraphError> {
        check_name("owner", owner)?;
        if let Kind::Custom(name) = &kind {
            check_name("kind", name)?;
        }
        if path.is_empty() || path.contains('\n') {
            return Err(GraphError::InvalidName {
                what: "path",
                name: path.to_string(),
            });
        }
        if self.get(id).is_some() {
            return Err(GraphError::DuplicateId(id));
        }
        let path = canon_path(path);
        if let Some(&other) = self.by_path.get(&path) {
            return Err(GraphError::DuplicatePath(path, other));
        }
        self.by_path.insert(path.clone(), id);
        self.nodes
            .set_grow(id, Some(Node::new(id, path, kind, owner.to_string())), None);
        self.live += 1;
        Ok(())
    }

    pub fn set_command(&mut self, id: NodeId, command: Option<String>) -> Result<(), GraphError> {
        self.check(id)?;
        if let Some(cmd) = &command {
            if cmd.is_empty() || cmd.contains('\n') {
                return Err(GraphError::InvalidName {
                    what: "command",
                    name: cmd.clone(),
                });
            }
        }
        self.node_mut(id).command = command;
        Ok(())
    }

    /// Remove a node, dropping every edge that touches it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        self.check(id)?;
        let node = match self.nodes[id].take() {
            Some(n) => n,
            None => return Err(GraphError::UnknownNode(id)),
        };
        for &d in &node.deps {
            self.node_mut(d).prerequisite_for.remove(&id);
        }
        for &p in &node.prerequisite_for {
            self.node_mut(p).deps.remove(&id);
        }
        for &w in &node.weak_deps {
            self.node_mut(w).weak_prerequisite_for.remove(&id);
        }
        for &p in &node.weak_prerequisite_for {
            self.node_mut(p).weak_deps.remove(&id);
        }
        for other in self.nodes.values_mut().flatten() {
            other.blocked.remove(&id);
        }
        self.by_path.remove(&node.path);
        self.live -= 1;
        debug!(path = %node.path, "removed node");
        Ok(node)
    }

    /// Everything transitively downstream of `id` through strong dependents
    /// and weak outputs, not including `id` itself.
    pub fn downstream(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<NodeId> = self.node(id).outputs().collect();
        let mut out = Vec::new();
        while let Some(n) = stack.pop() {
            if n == id || !seen.insert(n) {
                continue;
            }
            out.push(n);
            stack.extend(self.node(n).outputs());
        }
        out
    }

    /// Retire a node whose file is gone for good: everything built from it is
    /// marked for deletion so the next plan rebuilds it, then it is removed.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        self.check(id)?;
        for n in self.downstream(id) {
            self.node_mut(n).marked_for_deletion = true;
        }
        self.remove_node(id)
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> bool {
        let added = self.node_mut(from).deps.insert(to);
        self.node_mut(to).prerequisite_for.insert(from);
        added
    }

    fn unlink(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self.node_mut(from).deps.remove(&to);
        self.node_mut(to).prerequisite_for.remove(&from);
        removed
    }

    fn check_edge(&self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let f = self.check(from)?;
        self.check(to)?;
        if from == to {
            return Err(GraphError::SelfEdge(f.path.clone()));
        }
        Ok(())
    }

    /// Make `from` depend on `to`.  Returns whether the edge is new; a blocked
    /// edge is silently refused.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.check_edge(from, to)?;
        let f = self.node(from);
        if f.kind == Kind::Source {
            return Err(GraphError::SourceWithDeps(f.path.clone()));
        }
        if f.blocked.contains(&to) {
            debug!(from = %f.path, to = %self.node(to).path, "refusing blocked edge");
            return Ok(false);
        }
        Ok(self.link(from, to))
    }

    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.check_edge(from, to)?;
        Ok(self.unlink(from, to))
    }

    /// Record that `from`'s command also writes the file of wait node `to`.
    pub fn add_weak_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.check_edge(from, to)?;
        let f = self.node(from);
        if !f.kind.is_buildable() {
            return Err(GraphError::WeakFromUnbuildable(f.path.clone()));
        }
        let t = self.node(to);
        if t.kind != Kind::Wait {
            return Err(GraphError::WeakToNonWait(t.path.clone()));
        }
        let added = self.node_mut(from).weak_deps.insert(to);
        self.node_mut(to).weak_prerequisite_for.insert(from);
        Ok(added)
    }

    pub fn remove_weak_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.check_edge(from, to)?;
        let removed = self.node_mut(from).weak_deps.remove(&to);
        self.node_mut(to).weak_prerequisite_for.remove(&from);
        Ok(removed)
    }

    /// Forbid `to` from ever becoming a dependency of `from`, dropping the
    /// edge if it exists.
    pub fn add_blocked_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.check_edge(from, to)?;
        self.unlink(from, to);
        Ok(self.node_mut(from).blocked.insert(to))
    }

    /// Replace the dependency set of a node, e.g. after its includes were
    /// rescanned.  Blocked ids are dropped from `deps` before diffing.
    /// Returns whether anything changed; a change marks the node.
    pub fn replace_deps(
        &mut self,
        id: NodeId,
        deps: impl IntoIterator<Item = NodeId>,
    ) -> Result<bool, GraphError> {
        let node = self.check(id)?;
        let wanted: BTreeSet<NodeId> = deps
            .into_iter()
            .filter(|d| !node.blocked.contains(d))
            .collect();
        if wanted == node.deps {
            return Ok(false);
        }
        for &d in &wanted {
            self.check_edge(id, d)?;
        }
        if !wanted.is_empty() && node.kind == Kind::Source {
            return Err(GraphError::SourceWithDeps(node.path.clone()));
        }
        let old = node.deps.clone();
        for &d in old.difference(&wanted) {
            self.unlink(id, d);
        }
        for &d in wanted.difference(&old) {
            self.link(id, d);
        }
        let node = self.node_mut(id);
        node.marked_by_deps_changed = true;
        debug!(path = %node.path, deps = node.deps.len(), "replaced deps");
        Ok(true)
    }

    /// Break every dependency cycle, then report the roots.
    ///
    /// Each sweep is a depth-first walk along `inputs`, so a wait node leads
    /// back to its producers.  Reaching a node that is still on the walk's
    /// stack removes a strong edge of that cycle, blocks it, and starts the
    /// sweep over; a sweep that finds nothing ends the loop.  Every restart
    /// removes one edge, so this terminates.
    pub fn find_roots(&mut self, max_depth: usize) -> Result<Roots, GraphError> {
        let mut broken = Vec::new();
        while let Some((from, to)) = self.find_back_edge(max_depth)? {
            warn!(
                from = %self.node(from).path,
                to = %self.node(to).path,
                "breaking dependency cycle"
            );
            self.unlink(from, to);
            self.node_mut(from).blocked.insert(to);
            broken.push((from, to));
        }
        let roots = self
            .nodes()
            .filter(|n| n.deps.is_empty())
            .map(|n| n.id)
            .collect();
        Ok(Roots { roots, broken })
    }

    fn find_back_edge(&self, max_depth: usize) -> Result<Option<(NodeId, NodeId)>, GraphError> {
        #[derive(Copy, Clone, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Finished,
        }
        let mut marks = DenseMap::new_sized(self.id_bound(), Mark::New);
        // Each frame: node, its inputs, position of the next input to visit.
        let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();

        for start in self.ids() {
            if marks[start] != Mark::New {
                continue;
            }
            marks[start] = Mark::OnStack;
            stack.push((start, self.node(start).inputs().collect(), 0));
            loop {
                let Some(top) = stack.last_mut() else { break };
                if top.2 == top.1.len() {
                    marks[top.0] = Mark::Finished;
                    stack.pop();
                    continue;
                }
                let (id, dep) = (top.0, top.1[top.2]);
                top.2 += 1;
                match marks[dep] {
                    Mark::OnStack => return self.strong_edge_of_cycle(&stack, id, dep).map(Some),
                    Mark::Finished => {}
                    Mark::New => {
                        if stack.len() >= max_depth {
                            return Err(GraphError::DepthExceeded {
                                path: self.node(dep).path.clone(),
                                depth: max_depth,
                            });
                        }
                        marks[dep] = Mark::OnStack;
                        stack.push((dep, self.node(dep).inputs().collect(), 0));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Pick the edge to break for the cycle closed by `id -> dep`.  A wait
    /// node's link to its producer cannot be blocked, so then the last strong
    /// edge on the stack between `dep` and `id` goes instead.
    fn strong_edge_of_cycle<T>(
        &self,
        stack: &[(NodeId, T, usize)],
        id: NodeId,
        dep: NodeId,
    ) -> Result<(NodeId, NodeId), GraphError> {
        if self.node(id).deps.contains(&dep) {
            return Ok((id, dep));
        }
        let start = stack.iter().position(|frame| frame.0 == dep).unwrap_or(0);
        let path: Vec<NodeId> = stack[start..].iter().map(|frame| frame.0).collect();
        path.windows(2)
            .rev()
            .find(|w| self.node(w[0]).deps.contains(&w[1]))
            .map(|w| (w[0], w[1]))
            .ok_or_else(|| GraphError::Cycle(self.node(dep).path.clone()))
    }

    /// Drop nodes that can no longer matter: sources whose file is gone and
    /// that nothing depends on any more, and generated nodes left with no
    /// inputs and no consumers, whose stale files are deleted as well.
    /// Returns the paths of removed nodes.
    pub fn collect_garbage(&mut self, fs: &dyn FileSystem) -> std::io::Result<Vec<String>> {
        let mut removed = Vec::new();
        loop {
            let mut doomed = Vec::new();
            for node in self.nodes() {
                let unused = node.prerequisite_for.is_empty() && node.weak_prerequisite_for.is_empty();
                if !unused {
                    continue;
                }
                if node.kind == Kind::Source {
                    if !fs.stat(&node.path)?.exists() {
                        doomed.push((node.id, false));
                    }
                } else if node.deps.is_empty() && node.weak_deps.is_empty() {
                    doomed.push((node.id, true));
                }
            }
            if doomed.is_empty() {
                break;
            }
            for (id, generated) in doomed {
                let node = match self.delete_node(id) {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                if generated {
                    fs.remove(&node.path)?;
                }
                info!(path = %node.path, "collected stale node");
                removed.push(node.path);
            }
        }
        Ok(removed)
    }
}
