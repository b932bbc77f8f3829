//! Build scheduling: tracks per-node readiness and hands out commands in
//! dependency order.
//!
//! Unaware of processes; the executor in `task` drives it through
//! `next_command` and reports results back through `finish`.

use crate::densemap::DenseMap;
use crate::graph::{Graph, Kind, Node, NodeId};
use crate::plan::Plan;
use crate::progress::Report;
use std::collections::VecDeque;
use std::ffi::OsString;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// Some input has not finished yet.
    NotReady,
    /// All inputs are done; waiting to be dispatched (or passed through).
    Ready,
    /// Command is running.
    Dispatched,
    /// Built, or nothing to do.
    Done,
    /// Failed, including failure to produce a command.
    Failed,
}

/// Counters of how many nodes are in each state.
#[derive(Clone, Debug, Default)]
pub struct StateCounts([usize; 5]);

impl StateCounts {
    fn idx(state: BuildState) -> usize {
        match state {
            BuildState::NotReady => 0,
            BuildState::Ready => 1,
            BuildState::Dispatched => 2,
            BuildState::Done => 3,
            BuildState::Failed => 4,
        }
    }

    pub fn add(&mut self, state: BuildState, delta: isize) {
        let slot = &mut self.0[StateCounts::idx(state)];
        *slot = slot.wrapping_add_signed(delta);
    }

    pub fn get(&self, state: BuildState) -> usize {
        self.0[StateCounts::idx(state)]
    }
}

/// Why a node did not get built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// No command could be produced for the node.
    Command(String),
    /// The command could not be started at all.
    Launch(String),
    /// Nonzero exit status.
    Exit(i32),
    /// Killed by a signal.
    Signal(i32),
    /// The command exited 0 but its output is missing or older than this run.
    Stale,
    /// A side output the command should have written is missing or stale.
    WaitUnresolved(String),
    /// A wait node nothing produces.
    NoProducer,
    /// The run was interrupted while the command was running.
    Interrupted,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Command(msg) => write!(f, "no command: {}", msg),
            Failure::Launch(msg) => write!(f, "launch failed: {}", msg),
            Failure::Exit(code) => write!(f, "exit status {}", code),
            Failure::Signal(sig) => write!(f, "signal {}", sig),
            Failure::Stale => write!(f, "output missing or not updated"),
            Failure::WaitUnresolved(path) => write!(f, "side output {} missing or not updated", path),
            Failure::NoProducer => write!(f, "nothing produces this file"),
            Failure::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A program and its arguments, run without a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new<P: Into<OsString>>(program: P) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<A: Into<OsString>>(mut self, arg: A) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Produces the command that rebuilds a node.
pub trait CommandGen {
    fn command(&mut self, graph: &Graph, node: &Node) -> anyhow::Result<Invocation>;
}

impl<F> CommandGen for F
where
    F: FnMut(&Graph, &Node) -> anyhow::Result<Invocation>,
{
    fn command(&mut self, graph: &Graph, node: &Node) -> anyhow::Result<Invocation> {
        self(graph, node)
    }
}

/// Runs the command line recorded on each node through `/bin/sh -c`.
#[derive(Default)]
pub struct StoredCommands;

impl CommandGen for StoredCommands {
    fn command(&mut self, _graph: &Graph, node: &Node) -> anyhow::Result<Invocation> {
        match &node.command {
            Some(cmdline) => Ok(Invocation::new("/bin/sh").arg("-c").arg(cmdline)),
            None => anyhow::bail!("no command recorded for {}", node.path),
        }
    }
}

/// A command ready to run.
#[derive(Debug)]
pub struct JobSpec {
    pub node: NodeId,
    pub invocation: Invocation,
}

#[derive(Debug)]
pub enum NextCommand {
    Run(JobSpec),
    /// Nothing can be dispatched until a running command finishes.
    Barrier,
    /// No more commands will be handed out this run.
    Finalize,
}

pub struct Scheduler<'a> {
    graph: &'a Graph,
    plan: &'a Plan,
    states: DenseMap<NodeId, BuildState>,
    /// Inputs of each node that have not reached Done yet.
    remaining: DenseMap<NodeId, usize>,
    counts: StateCounts,
    /// Nodes that just became ready and still need a target/pass-through decision.
    wavefront: VecDeque<NodeId>,
    /// Ready targets of the current round, in dispatch order.
    queue: VecDeque<NodeId>,
    in_flight: usize,
    stop_on_first_error: bool,
    failures: Vec<(NodeId, Failure)>,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a Graph, plan: &'a Plan, stop_on_first_error: bool) -> Self {
        let mut sched = Scheduler {
            graph,
            plan,
            states: DenseMap::new_sized(graph.id_bound(), BuildState::NotReady),
            remaining: DenseMap::new_sized(graph.id_bound(), 0),
            counts: StateCounts::default(),
            wavefront: VecDeque::new(),
            queue: VecDeque::new(),
            in_flight: 0,
            stop_on_first_error,
            failures: Vec::new(),
        };
        for node in graph.nodes() {
            let n = node.inputs().count();
            sched.remaining[node.id] = n;
            sched.counts.add(BuildState::NotReady, 1);
            if n == 0 {
                sched.set_state(node.id, BuildState::Ready);
                sched.wavefront.push_back(node.id);
            }
        }
        // Missing and not buildable this run: dependents must not run
        // against them.
        for &id in &plan.unreachable {
            sched.set_state(id, BuildState::Failed);
        }
        sched
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn state(&self, id: NodeId) -> BuildState {
        self.states[id]
    }

    pub fn counts(&self) -> &StateCounts {
        &self.counts
    }

    pub fn failures(&self) -> &[(NodeId, Failure)] {
        &self.failures
    }

    fn set_state(&mut self, id: NodeId, state: BuildState) {
        let prev = std::mem::replace(&mut self.states[id], state);
        self.counts.add(prev, -1);
        self.counts.add(state, 1);
    }

    /// Decide what to do with every node on the wavefront.  Non-targets and
    /// wait nodes complete immediately, which may ready further nodes.
    fn advance_wavefront(&mut self) {
        let graph = self.graph;
        while let Some(id) = self.wavefront.pop_front() {
            let node = graph.node(id);
            if node.kind == Kind::Wait {
                if self.plan.is_target(id) && node.weak_prerequisite_for().is_empty() {
                    self.finish(id, Err(Failure::NoProducer));
                } else {
                    self.finish(id, Ok(()));
                }
            } else if !self.plan.is_target(id) {
                self.finish(id, Ok(()));
            } else {
                self.queue.push_back(id);
            }
        }
    }

    /// Hand out the next command, if any.
    pub fn next_command(&mut self, gen: &mut dyn CommandGen, report: &mut dyn Report) -> NextCommand {
        loop {
            if self.stop_on_first_error && !self.failures.is_empty() {
                return NextCommand::Finalize;
            }
            // A new round starts only once the previous one has drained.
            if self.in_flight == 0 {
                self.advance_wavefront();
            }
            let Some(id) = self.queue.pop_front() else {
                return if self.in_flight > 0 {
                    NextCommand::Barrier
                } else {
                    NextCommand::Finalize
                };
            };
            let graph = self.graph;
            let node = graph.node(id);
            match gen.command(graph, node) {
                Ok(invocation) => {
                    self.set_state(id, BuildState::Dispatched);
                    self.in_flight += 1;
                    return NextCommand::Run(JobSpec { node: id, invocation });
                }
                Err(err) => {
                    warn!(path = %node.path, "command generation failed: {:#}", err);
                    let failure = Failure::Command(format!("{:#}", err));
                    report.report(node, &Err(failure.clone()), &[], &[]);
                    self.finish(id, Err(failure));
                }
            }
        }
    }

    /// Record the outcome of a node.  Success readies dependents whose
    /// inputs are now all done; failure leaves them waiting forever.
    pub fn finish(&mut self, id: NodeId, result: Result<(), Failure>) {
        if self.states[id] == BuildState::Dispatched {
            self.in_flight -= 1;
        }
        match result {
            Ok(()) => {
                self.set_state(id, BuildState::Done);
                let graph = self.graph;
                for out in graph.node(id).outputs() {
                    let left = &mut self.remaining[out];
                    *left -= 1;
                    if *left == 0 && self.states[out] == BuildState::NotReady {
                        self.set_state(out, BuildState::Ready);
                        self.wavefront.push_back(out);
                    }
                }
            }
            Err(failure) => {
                debug!(path = %self.graph.node(id).path, %failure, "failed");
                self.set_state(id, BuildState::Failed);
                self.failures.push((id, failure));
            }
        }
    }
}
