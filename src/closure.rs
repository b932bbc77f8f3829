//! Dominator sets: for each node, everything that must rebuild if it changes.
//!
//! The set of a node is the node itself plus the sets of everything directly
//! downstream of it (strong dependents and the wait nodes it writes).  Sets are
//! computed on demand and memoized for the rest of the run.

use crate::densemap::{DenseMap, Index};
use crate::error::GraphError;
use crate::graph::{Graph, Kind, NodeId};
use rustc_hash::FxHashSet;
use std::rc::Rc;

pub type DominatorSet = FxHashSet<NodeId>;

pub struct Closure {
    sets: DenseMap<NodeId, Option<Rc<DominatorSet>>>,
    max_depth: usize,
    /// Whether shared libraries pass changes through to their consumers.
    deep_shared_libs: bool,
}

impl Closure {
    pub fn new(graph: &Graph, max_depth: usize, deep_shared_libs: bool) -> Self {
        Closure {
            sets: DenseMap::new_sized(graph.id_bound(), None),
            max_depth,
            deep_shared_libs,
        }
    }

    /// The set for `id`, if it was computed this run.
    pub fn get(&self, id: NodeId) -> Option<&DominatorSet> {
        self.sets.lookup(id).and_then(|s| s.as_deref())
    }

    /// Forget every computed set, e.g. after the graph changed.
    pub fn invalidate(&mut self) {
        for s in self.sets.values_mut() {
            *s = None;
        }
    }

    fn is_opaque(&self, kind: &Kind) -> bool {
        *kind == Kind::SharedLib && !self.deep_shared_libs
    }

    /// Compute (or fetch) the dominator set of `id`.
    ///
    /// Walks downstream with an explicit stack.  Reaching a node that is
    /// still being expanded means the graph has a cycle, which `find_roots`
    /// should have removed already.
    pub fn dominators(&mut self, graph: &Graph, id: NodeId) -> Result<Rc<DominatorSet>, GraphError> {
        if let Some(Some(set)) = self.sets.lookup(id) {
            return Ok(set.clone());
        }
        if id.index() >= self.sets.len() {
            self.sets.set_grow(id, None, None);
        }

        let mut on_stack = FxHashSet::default();
        // Each frame: node, the downstream nodes still to expand.
        let mut stack: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
        self.push_frame(graph, &mut stack, &mut on_stack, id);

        while let Some((top, pending)) = stack.last_mut() {
            let top = *top;
            match pending.pop() {
                Some(next) => {
                    if let Some(Some(_)) = self.sets.lookup(next) {
                        continue;
                    }
                    if on_stack.contains(&next) {
                        return Err(GraphError::Cycle(graph.node(next).path.clone()));
                    }
                    if stack.len() >= self.max_depth {
                        return Err(GraphError::DepthExceeded {
                            path: graph.node(next).path.clone(),
                            depth: self.max_depth,
                        });
                    }
                    self.push_frame(graph, &mut stack, &mut on_stack, next);
                }
                None => {
                    stack.pop();
                    on_stack.remove(&top);
                    let node = graph.node(top);
                    let mut set = DominatorSet::default();
                    set.insert(top);
                    if !self.is_opaque(&node.kind) {
                        for out in node.outputs() {
                            if let Some(Some(sub)) = self.sets.lookup(out) {
                                set.extend(sub.iter().copied());
                            }
                        }
                    }
                    self.sets.set_grow(top, Some(Rc::new(set)), None);
                }
            }
        }

        match &self.sets[id] {
            Some(set) => Ok(set.clone()),
            None => Err(GraphError::UnknownNode(id)),
        }
    }

    fn push_frame(
        &self,
        graph: &Graph,
        stack: &mut Vec<(NodeId, Vec<NodeId>)>,
        on_stack: &mut FxHashSet<NodeId>,
        id: NodeId,
    ) {
        let node = graph.node(id);
        let pending = if self.is_opaque(&node.kind) {
            Vec::new()
        } else {
            node.outputs().collect()
        };
        on_stack.insert(id);
        stack.push((id, pending));
    }

    /// Compute the set of every live node.
    pub fn compute_all(&mut self, graph: &Graph) -> Result<(), GraphError> {
        for id in graph.ids() {
            self.dominators(graph, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[NodeId]) -> DominatorSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn chain_and_diamond() {
        let mut g = Graph::new();
        let src = g.add_node("a.cpp", Kind::Source, "p").unwrap();
        let a = g.add_node("a.o", Kind::Compile, "p").unwrap();
        let b = g.add_node("b.o", Kind::Compile, "p").unwrap();
        let app = g.add_node("app", Kind::Link, "p").unwrap();
        g.add_edge(a, src).unwrap();
        g.add_edge(b, src).unwrap();
        g.add_edge(app, a).unwrap();
        g.add_edge(app, b).unwrap();

        let mut c = Closure::new(&g, 100, false);
        assert_eq!(*c.dominators(&g, src).unwrap(), set(&[src, a, b, app]));
        assert_eq!(*c.dominators(&g, a).unwrap(), set(&[a, app]));
        assert_eq!(*c.dominators(&g, app).unwrap(), set(&[app]));
    }

    #[test]
    fn memoized() {
        let mut g = Graph::new();
        let src = g.add_node("a.cpp", Kind::Source, "p").unwrap();
        let a = g.add_node("a.o", Kind::Compile, "p").unwrap();
        g.add_edge(a, src).unwrap();
        let mut c = Closure::new(&g, 100, false);
        assert!(c.get(a).is_none());
        let first = c.dominators(&g, src).unwrap();
        assert!(c.get(a).is_some());
        let second = c.dominators(&g, src).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        c.invalidate();
        assert!(c.get(src).is_none());
    }

    #[test]
    fn shared_lib_is_opaque_unless_deep() {
        let mut g = Graph::new();
        let o = g.add_node("x.o", Kind::Compile, "p").unwrap();
        let lib = g.add_node("libx.so", Kind::SharedLib, "p").unwrap();
        let app = g.add_node("app", Kind::Link, "p").unwrap();
        g.add_edge(lib, o).unwrap();
        g.add_edge(app, lib).unwrap();

        let mut c = Closure::new(&g, 100, false);
        assert_eq!(*c.dominators(&g, o).unwrap(), set(&[o, lib]));
        assert_eq!(*c.dominators(&g, lib).unwrap(), set(&[lib]));

        let mut deep = Closure::new(&g, 100, true);
        assert_eq!(*deep.dominators(&g, o).unwrap(), set(&[o, lib, app]));
    }

    #[test]
    fn wait_outputs_are_downstream() {
        let mut g = Graph::new();
        let y = g.add_node("x.y", Kind::Source, "p").unwrap();
        let gen = g.add_node("x.cpp", Kind::Custom("yacc".into()), "p").unwrap();
        let h = g.add_node("x.h", Kind::Wait, "p").unwrap();
        let user = g.add_node("main.o", Kind::Compile, "p").unwrap();
        g.add_edge(gen, y).unwrap();
        g.add_weak_edge(gen, h).unwrap();
        g.add_edge(user, h).unwrap();
        let mut c = Closure::new(&g, 100, false);
        assert_eq!(*c.dominators(&g, y).unwrap(), set(&[y, gen, h, user]));
    }

    #[test]
    fn cycle_detected() {
        let mut g = Graph::new();
        let a = g.add_node("a", Kind::Compile, "p").unwrap();
        let b = g.add_node("b", Kind::Compile, "p").unwrap();
        g.add_edge(a, b).unwrap();
        g.add_edge(b, a).unwrap();
        let mut c = Closure::new(&g, 100, false);
        assert!(matches!(c.dominators(&g, a), Err(GraphError::Cycle(_))));
    }
}
