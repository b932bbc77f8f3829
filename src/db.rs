//! The graph db persists the node table and the edge relations between runs.
//!
//! It's a line-oriented text file:
//!
//! ```text
//! # incr graph db v1
//! count 3
//! next 4
//! node 0 app D src/a.cpp
//! node 1 app C out/a.o
//! cmd 1 cc -c src/a.cpp -o out/a.o
//! flags 1 M
//! 1->0
//! 1<>3
//! 1X2
//! ```
//!
//! `->` is a strong edge (dependent first), `<>` a weak edge from a producer
//! to the wait node it writes, and `X` a blocked edge.  Flags are `D` for
//! marked-for-deletion and `M` for marked-by-deps-changed.

use crate::error::{BuildError, GraphError};
use crate::graph::{Graph, Kind, NodeId};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const HEADER: &str = "# incr graph db v1";

/// Serialize a graph.  Output is deterministic for a given graph.
pub fn write(graph: &Graph, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "{}", HEADER)?;
    writeln!(w, "count {}", graph.len())?;
    writeln!(w, "next {}", graph.next_id())?;
    for node in graph.nodes() {
        writeln!(w, "node {} {} {} {}", node.id, node.owner, node.kind.code(), node.path)?;
        if let Some(cmd) = &node.command {
            writeln!(w, "cmd {} {}", node.id, cmd)?;
        }
        if node.is_marked() {
            let mut flags = String::new();
            if node.marked_for_deletion {
                flags.push('D');
            }
            if node.marked_by_deps_changed {
                flags.push('M');
            }
            writeln!(w, "flags {} {}", node.id, flags)?;
        }
    }
    for node in graph.nodes() {
        for dep in node.deps() {
            writeln!(w, "{}->{}", node.id, dep)?;
        }
        for wait in node.weak_deps() {
            writeln!(w, "{}<>{}", node.id, wait)?;
        }
        for to in node.blocked() {
            writeln!(w, "{}X{}", node.id, to)?;
        }
    }
    Ok(())
}

struct Parser {
    graph: Graph,
    line: usize,
    count: Option<usize>,
    next: Option<usize>,
}

impl Parser {
    fn error(&self, msg: impl Into<String>) -> GraphError {
        GraphError::Parse {
            line: self.line,
            msg: msg.into(),
        }
    }

    fn number(&self, s: &str) -> Result<usize, GraphError> {
        s.parse().map_err(|_| self.error(format!("bad number {:?}", s)))
    }

    fn id(&self, s: &str) -> Result<NodeId, GraphError> {
        let id = NodeId::from(self.number(s)?);
        match self.graph.get(id) {
            Some(_) => Ok(id),
            None => Err(self.error(format!("unknown node {}", id))),
        }
    }

    /// Wrap errors from graph operations with the current line.
    fn at<T>(&self, r: Result<T, GraphError>) -> Result<T, GraphError> {
        r.map_err(|err| self.error(err.to_string()))
    }

    fn edge(&mut self, line: &str) -> Result<(), GraphError> {
        let (sep, op): (&str, fn(&mut Graph, NodeId, NodeId) -> Result<bool, GraphError>) =
            if line.contains("->") {
                ("->", Graph::add_edge)
            } else if line.contains("<>") {
                ("<>", Graph::add_weak_edge)
            } else if line.contains('X') {
                ("X", Graph::add_blocked_edge)
            } else {
                return Err(self.error(format!("unrecognized line {:?}", line)));
            };
        let Some((from, to)) = line.split_once(sep) else {
            return Err(self.error("bad edge"));
        };
        let (from, to) = (self.id(from)?, self.id(to)?);
        let r = op(&mut self.graph, from, to);
        self.at(r)?;
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<(), GraphError> {
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        match word {
            "count" => self.count = Some(self.number(rest)?),
            "next" => self.next = Some(self.number(rest)?),
            "node" => {
                let mut parts = rest.splitn(4, ' ');
                let (Some(id), Some(owner), Some(kind), Some(path)) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(self.error("node needs id, owner, kind and path"));
                };
                let id = NodeId::from(self.number(id)?);
                let r = self.graph.insert_node(id, path, Kind::from_code(kind), owner);
                self.at(r)?;
            }
            "cmd" => {
                let (id, cmd) = rest.split_once(' ').unwrap_or((rest, ""));
                let id = self.id(id)?;
                let r = self.graph.set_command(id, Some(cmd.to_string()));
                self.at(r)?;
            }
            "flags" => {
                let (id, flags) = rest.split_once(' ').unwrap_or((rest, ""));
                let id = self.id(id)?;
                for flag in flags.chars() {
                    match flag {
                        'D' => self.graph.node_mut(id).marked_for_deletion = true,
                        'M' => self.graph.node_mut(id).marked_by_deps_changed = true,
                        _ => return Err(self.error(format!("unknown flag {:?}", flag))),
                    }
                }
            }
            _ => self.edge(line)?,
        }
        Ok(())
    }
}

/// Parse a serialized graph.
pub fn read(text: &str) -> Result<Graph, GraphError> {
    let mut p = Parser {
        graph: Graph::new(),
        line: 0,
        count: None,
        next: None,
    };
    let mut saw_header = false;
    for (i, line) in text.lines().enumerate() {
        p.line = i + 1;
        if line.is_empty() {
            continue;
        }
        if !saw_header {
            if line != HEADER {
                return Err(p.error(format!("expected {:?}", HEADER)));
            }
            saw_header = true;
            continue;
        }
        p.line(line)?;
    }
    if !saw_header {
        return Err(p.error("empty db"));
    }
    if let Some(count) = p.count {
        if count != p.graph.len() {
            return Err(p.error(format!("count {} but {} nodes", count, p.graph.len())));
        }
    }
    if let Some(next) = p.next {
        if next < p.graph.id_bound() {
            return Err(p.error(format!("next id {} already in use", next)));
        }
        p.graph.reserve_ids(NodeId::from(next));
    }
    Ok(p.graph)
}

/// Load the db at `path`; None if there is none yet.
pub fn load(path: &Path) -> Result<Option<Graph>, BuildError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(read(&text)?))
}

/// Save atomically: write a sibling temp file, then rename it over `path`.
pub fn save(graph: &Graph, path: &Path) -> Result<(), BuildError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    {
        let mut w = BufWriter::new(File::create(tmp)?);
        write(graph, &mut w)?;
        w.flush()?;
    }
    std::fs::rename(tmp, path)?;
    Ok(())
}
