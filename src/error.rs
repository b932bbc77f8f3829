//! Fatal error taxonomy.
//!
//! Only errors that abort a run live here.  Per-node failures (a command that
//! could not be generated, a nonzero exit, a stale output) are recorded as
//! `work::Failure` values and never travel through `Result`.

use crate::graph::NodeId;
use thiserror::Error;

/// The graph is malformed in a way the engine cannot work around.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    #[error("node id {0} already in use")]
    DuplicateId(NodeId),

    #[error("path {0:?} already registered as node {1}")]
    DuplicatePath(String, NodeId),

    #[error("invalid {what} {name:?}")]
    InvalidName { what: &'static str, name: String },

    #[error("source node {0:?} cannot have dependencies")]
    SourceWithDeps(String),

    #[error("weak edge target {0:?} is not a wait node")]
    WeakToNonWait(String),

    #[error("{0:?} runs no command, so it cannot produce side outputs")]
    WeakFromUnbuildable(String),

    #[error("node {0:?} cannot depend on itself")]
    SelfEdge(String),

    #[error("dependency cycle through {0:?}")]
    Cycle(String),

    #[error("traversal depth exceeded {depth} at {path:?}; undetected cycle?")]
    DepthExceeded { path: String, depth: usize },

    #[error("graph db line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

/// Errors that abort a whole build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("launching command for {path:?}: {source}")]
    Launch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
