//! A build session: the graph, its db, the interrupt flag and the settings
//! one run works with.

use crate::closure::Closure;
use crate::db;
use crate::error::BuildError;
use crate::fs::{millis_since_epoch, FileSystem, MTimeCache, RealFileSystem};
use crate::graph::{Graph, NodeId};
use crate::plan::{self, Plan, PlanOptions};
use crate::progress::Report;
use crate::task::{Executor, RunEnd};
use crate::work::{BuildState, CommandGen, Failure, Scheduler};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    /// Where the graph is persisted.
    pub db_path: PathBuf,
    /// Maximum number of commands running at once.
    pub parallelism: usize,
    /// Stop handing out commands once anything failed.
    pub stop_on_first_error: bool,
    /// Tolerate coarse filesystem timestamps when comparing times.
    pub scfs: bool,
    /// Comparison window for scfs, and allowed skew when checking that a
    /// command wrote its outputs.
    pub mtime_slack_ms: u64,
    /// Let changes propagate through shared libraries to their consumers.
    pub deep_shared_libs: bool,
    /// Traversal depth beyond which the graph is assumed to be broken.
    pub max_depth: usize,
    /// Drop vanished sources and orphaned generated nodes before planning.
    pub collect_garbage: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from(".incr_db"),
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            stop_on_first_error: false,
            scfs: false,
            mtime_slack_ms: 1000,
            deep_shared_libs: false,
            max_depth: 10_000,
            collect_garbage: true,
        }
    }
}

/// Why an unfinished target did not get built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cause {
    /// Something upstream failed.
    Failed(NodeId),
    /// The run was interrupted first.
    Interrupted,
    /// Dispatch stopped after an earlier failure.
    Stopped,
    /// A missing file nothing this run would produce.
    NoProducer,
    /// An input is missing and nothing this run would produce it.
    Missing(NodeId),
}

/// A target (or missing generated node) left unbuilt.
#[derive(Clone, Debug)]
pub struct Unreachable {
    pub node: NodeId,
    pub cause: Cause,
    /// From the failed node down to `node`, when the cause is a failure.
    pub chain: Vec<NodeId>,
}

/// Summary of one build.
#[derive(Clone, Debug, Default)]
pub struct BuildOutcome {
    /// Commands that ran to completion.
    pub ran: usize,
    pub targets: usize,
    pub failed: Vec<(NodeId, Failure)>,
    pub unreachable: Vec<Unreachable>,
    /// Edges removed to break cycles, as (dependent, dependency).
    pub broken_cycles: Vec<(NodeId, NodeId)>,
    /// Paths of nodes dropped by garbage collection.
    pub collected: Vec<String>,
    pub interrupted: bool,
}

impl BuildOutcome {
    pub fn success(&self) -> bool {
        !self.interrupted && self.failed.is_empty() && self.unreachable.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.success() {
            0
        } else {
            1
        }
    }
}

pub struct BuildSession {
    pub graph: Graph,
    config: Config,
    interrupted: Arc<AtomicBool>,
}

impl BuildSession {
    pub fn new(graph: Graph, config: Config) -> Self {
        BuildSession {
            graph,
            config,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load the graph from the configured db, or start empty.
    pub fn open(config: Config) -> Result<Self, BuildError> {
        let graph = match db::load(&config.db_path)? {
            Some(graph) => {
                info!(nodes = graph.len(), "loaded {}", config.db_path.display());
                graph
            }
            None => Graph::new(),
        };
        Ok(BuildSession::new(graph, config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Raising this flag stops the current build at the next poll.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn save(&self) -> Result<(), BuildError> {
        db::save(&self.graph, &self.config.db_path)
    }

    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            scfs: self.config.scfs,
            slack_ms: self.config.mtime_slack_ms,
        }
    }

    /// Garbage collection and cycle breaking: everything that edits the
    /// graph before it is planned.
    fn prepare(&mut self, fs: &dyn FileSystem, outcome: &mut BuildOutcome) -> Result<(), BuildError> {
        if self.config.collect_garbage {
            outcome.collected = self.graph.collect_garbage(fs)?;
        }
        let roots = self.graph.find_roots(self.config.max_depth)?;
        outcome.broken_cycles = roots.broken;
        Ok(())
    }

    /// Work out what a build of `want` (or of everything stale, if empty)
    /// would run, without running it.
    pub fn plan(&mut self, want: &[NodeId]) -> Result<Plan, BuildError> {
        let fs = RealFileSystem::new();
        self.prepare(&fs, &mut BuildOutcome::default())?;
        let mut closure = Closure::new(&self.graph, self.config.max_depth, self.config.deep_shared_libs);
        plan::plan(
            &self.graph,
            &mut closure,
            &mut MTimeCache::new(),
            &fs,
            self.plan_options(),
            want,
        )
    }

    /// Bring `want` (or everything, if empty) up to date, then persist the
    /// graph.  Node failures are part of the outcome; only errors that stop
    /// the engine itself come back as `Err`.
    pub fn build(
        &mut self,
        want: &[NodeId],
        gen: &mut dyn CommandGen,
        report: &mut dyn Report,
    ) -> Result<BuildOutcome, BuildError> {
        for &id in want {
            if self.graph.get(id).is_none() {
                return Err(crate::error::GraphError::UnknownNode(id).into());
            }
        }
        let run_start = millis_since_epoch(SystemTime::now());
        let fs = RealFileSystem::new();
        let mut outcome = BuildOutcome::default();
        self.prepare(&fs, &mut outcome)?;

        let mut closure = Closure::new(&self.graph, self.config.max_depth, self.config.deep_shared_libs);
        let mut cache = MTimeCache::new();
        let plan = plan::plan(&self.graph, &mut closure, &mut cache, &fs, self.plan_options(), want)?;
        cache.clear();
        outcome.targets = plan.target_count();

        let mut done = Vec::new();
        let result = {
            let mut sched = Scheduler::new(&self.graph, &plan, self.config.stop_on_first_error);
            let mut exec = Executor::new(
                self.config.parallelism,
                &fs,
                &mut cache,
                &self.interrupted,
                run_start,
                self.config.mtime_slack_ms,
            );
            let result = exec.run(&mut sched, gen, report);
            outcome.ran = exec.ran();
            outcome.interrupted = matches!(result, Ok(RunEnd::Interrupted));
            summarize(&self.graph, &plan, &sched, &mut outcome);
            // Passing through a node does not rebuild it, so only targets lose
            // their marks.
            done.extend(plan.targets().filter(|&id| sched.state(id) == BuildState::Done));
            result
        };

        for id in done {
            let node = self.graph.node_mut(id);
            node.marked_for_deletion = false;
            node.marked_by_deps_changed = false;
        }
        self.interrupted.store(false, Ordering::SeqCst);
        self.save()?;
        result?;

        if outcome.interrupted {
            warn!("build interrupted");
        }
        info!(
            ran = outcome.ran,
            failed = outcome.failed.len(),
            unreachable = outcome.unreachable.len(),
            "build finished"
        );
        Ok(outcome)
    }
}

/// Fill in failures and unreachable targets from the final scheduler state.
fn summarize(graph: &Graph, plan: &Plan, sched: &Scheduler, outcome: &mut BuildOutcome) {
    outcome.failed = sched
        .failures()
        .iter()
        .filter(|(_, f)| *f != Failure::Interrupted)
        .cloned()
        .collect();

    for id in plan.targets() {
        match sched.state(id) {
            BuildState::Done | BuildState::Failed => continue,
            _ => {}
        }
        let unreachable = match failed_upstream(graph, sched, id) {
            Some(chain) => Unreachable {
                node: id,
                cause: if plan.unreachable.contains(&chain[0]) {
                    Cause::Missing(chain[0])
                } else {
                    Cause::Failed(chain[0])
                },
                chain,
            },
            None => Unreachable {
                node: id,
                cause: if outcome.interrupted {
                    Cause::Interrupted
                } else {
                    Cause::Stopped
                },
                chain: vec![id],
            },
        };
        outcome.unreachable.push(unreachable);
    }
    for &id in &plan.unreachable {
        outcome.unreachable.push(Unreachable {
            node: id,
            cause: Cause::NoProducer,
            chain: vec![id],
        });
    }
}

/// Breadth-first search upstream of `id` for the nearest failed node.
/// Returns the path from it down to `id`.
fn failed_upstream(graph: &Graph, sched: &Scheduler, id: NodeId) -> Option<Vec<NodeId>> {
    let mut parent: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    let mut queue = VecDeque::from([id]);
    while let Some(cur) = queue.pop_front() {
        for input in graph.node(cur).inputs() {
            if input == id || parent.contains_key(&input) {
                continue;
            }
            parent.insert(input, cur);
            if sched.state(input) == BuildState::Failed {
                let mut chain = vec![input];
                let mut at = input;
                while let Some(&next) = parent.get(&at) {
                    chain.push(next);
                    at = next;
                }
                return Some(chain);
            }
            queue.push_back(input);
        }
    }
    None
}
