//! Runs build commands as child processes.
//!
//! A single thread polls every running child: it drains their output pipes,
//! reaps the ones that exited, and asks the scheduler for more work.  When
//! nothing happens it sleeps for a delay that grows while things stay quiet.

use crate::error::BuildError;
use crate::fs::{FileSystem, MTime, MTimeCache};
use crate::graph::{Graph, NodeId};
use crate::process::{self, Child, Termination};
use crate::progress::Report;
use crate::work::{CommandGen, Failure, JobSpec, NextCommand, Scheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll delay that doubles while idle and snaps back on activity.
struct AdaptiveDelay {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl AdaptiveDelay {
    fn new() -> Self {
        let min = Duration::from_micros(100);
        AdaptiveDelay {
            current: min,
            min,
            max: Duration::from_millis(2),
        }
    }

    fn activity(&mut self) {
        self.current = self.min;
    }

    fn idle(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// A command in flight.
struct Job {
    node: NodeId,
    child: Child,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    started: Instant,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    /// The scheduler had nothing more to hand out.
    Finished,
    /// The interrupt flag was raised.
    Interrupted,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Dispatch,
    Barrier,
    Finalize,
}

pub struct Executor<'a> {
    parallelism: usize,
    fs: &'a dyn FileSystem,
    cache: &'a mut MTimeCache,
    interrupted: &'a AtomicBool,
    /// Outputs must be at least this new (in ms, less the slack) to count as written.
    run_start: u64,
    slack_ms: u64,
    jobs: Vec<Job>,
    delay: AdaptiveDelay,
    ran: usize,
}

impl<'a> Executor<'a> {
    pub fn new(
        parallelism: usize,
        fs: &'a dyn FileSystem,
        cache: &'a mut MTimeCache,
        interrupted: &'a AtomicBool,
        run_start: u64,
        slack_ms: u64,
    ) -> Self {
        Executor {
            parallelism: parallelism.max(1),
            fs,
            cache,
            interrupted,
            run_start,
            slack_ms,
            jobs: Vec::new(),
            delay: AdaptiveDelay::new(),
            ran: usize::default(),
        }
    }

    /// Number of commands that ran to completion (successfully or not).
    pub fn ran(&self) -> usize {
        self.ran
    }

    /// Drive the scheduler until it finalizes, or until interrupted.
    pub fn run(
        &mut self,
        sched: &mut Scheduler,
        gen: &mut dyn CommandGen,
        report: &mut dyn Report,
    ) -> Result<RunEnd, BuildError> {
        let mut mode = Mode::Dispatch;
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                self.abandon(sched, report)?;
                return Ok(RunEnd::Interrupted);
            }

            while mode == Mode::Dispatch && self.jobs.len() < self.parallelism {
                match sched.next_command(gen, report) {
                    NextCommand::Run(spec) => {
                        if let Err(err) = self.start(sched, spec, report) {
                            self.abandon(sched, report)?;
                            return Err(err);
                        }
                    }
                    NextCommand::Barrier => mode = Mode::Barrier,
                    NextCommand::Finalize => mode = Mode::Finalize,
                }
            }

            if self.jobs.is_empty() {
                if mode == Mode::Finalize {
                    return Ok(RunEnd::Finished);
                }
                mode = Mode::Dispatch;
                continue;
            }

            // In Barrier mode dispatch resumes only once `jobs` is empty.
            if self.poll(sched, report)? {
                self.delay.activity();
            } else {
                std::thread::sleep(self.delay.idle());
            }
        }
    }

    fn start(&mut self, sched: &mut Scheduler, spec: JobSpec, report: &mut dyn Report) -> Result<(), BuildError> {
        let graph = sched.graph();
        let node = graph.node(spec.node);
        for out in outputs(graph, spec.node) {
            if let Some(parent) = std::path::Path::new(out).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|source| BuildError::Launch {
                        path: node.path.clone(),
                        source,
                    })?;
                }
            }
        }
        report.task_started(node, &spec.invocation);
        debug!(path = %node.path, command = %spec.invocation, "start");
        match process::spawn(&spec.invocation.program, &spec.invocation.args) {
            Ok(child) => {
                self.jobs.push(Job {
                    node: spec.node,
                    child,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    started: Instant::now(),
                });
                Ok(())
            }
            Err(source) => {
                let failure = Failure::Launch(source.to_string());
                report.report(node, &Err(failure.clone()), &[], &[]);
                sched.finish(spec.node, Err(failure));
                Err(BuildError::Launch {
                    path: node.path.clone(),
                    source,
                })
            }
        }
    }

    /// One pass over the running jobs.  Returns whether anything happened.
    fn poll(&mut self, sched: &mut Scheduler, report: &mut dyn Report) -> Result<bool, BuildError> {
        let mut active = false;
        let mut i = 0;
        while i < self.jobs.len() {
            let job = &mut self.jobs[i];
            if job.child.drain(&mut job.stdout, &mut job.stderr)? {
                active = true;
            }
            match job.child.try_wait()? {
                None => i += 1,
                Some(termination) => {
                    active = true;
                    let mut job = self.jobs.swap_remove(i);
                    // Pick up whatever was written between the drain and the exit.
                    job.child.drain(&mut job.stdout, &mut job.stderr)?;
                    self.complete(sched, job, termination, report)?;
                }
            }
        }
        Ok(active)
    }

    /// Whether a file was written during this run.
    fn fresh(&mut self, graph: &Graph, id: NodeId) -> std::io::Result<bool> {
        self.cache.invalidate(id);
        Ok(match self.cache.stat(self.fs, id, &graph.node(id).path)? {
            MTime::Missing => false,
            MTime::Stamp(t) => t.saturating_add(self.slack_ms) >= self.run_start,
        })
    }

    fn complete(
        &mut self,
        sched: &mut Scheduler,
        job: Job,
        termination: Termination,
        report: &mut dyn Report,
    ) -> Result<(), BuildError> {
        let graph = sched.graph();
        let node = graph.node(job.node);
        self.ran += 1;
        debug!(path = %node.path, ?termination, elapsed = ?job.started.elapsed(), "finished");

        let mut unresolved = Vec::new();
        let result = match termination {
            Termination::Success => {
                for &w in node.weak_deps() {
                    if !self.fresh(graph, w)? {
                        unresolved.push(w);
                    }
                }
                if !self.fresh(graph, job.node)? {
                    Err(Failure::Stale)
                } else if let Some(&w) = unresolved.first() {
                    Err(Failure::WaitUnresolved(graph.node(w).path.clone()))
                } else {
                    Ok(())
                }
            }
            Termination::Exit(code) => Err(Failure::Exit(code)),
            Termination::Signal(sig) => Err(Failure::Signal(sig)),
        };

        if result.is_err() {
            self.remove_outputs(graph, job.node);
        }
        report.report(node, &result, &job.stdout, &job.stderr);
        for w in unresolved {
            let failure = Failure::WaitUnresolved(graph.node(w).path.clone());
            report.report(graph.node(w), &Err(failure.clone()), &[], &[]);
            sched.finish(w, Err(failure));
        }
        sched.finish(job.node, result);
        Ok(())
    }

    /// Delete whatever a failed or interrupted command may have left behind.
    fn remove_outputs(&mut self, graph: &Graph, id: NodeId) {
        for path in outputs(graph, id) {
            if let Err(err) = self.fs.remove(path) {
                warn!("removing {}: {}", path, err);
            }
        }
        self.cache.invalidate(id);
        for &w in graph.node(id).weak_deps() {
            self.cache.invalidate(w);
        }
    }

    /// Stop: wait for every running child and clean up after it.
    fn abandon(&mut self, sched: &mut Scheduler, report: &mut dyn Report) -> Result<(), BuildError> {
        let jobs = std::mem::take(&mut self.jobs);
        if !jobs.is_empty() {
            info!("waiting for {} running commands", jobs.len());
        }
        let graph = sched.graph();
        for mut job in jobs {
            loop {
                job.child.drain(&mut job.stdout, &mut job.stderr)?;
                if job.child.try_wait()?.is_some() {
                    break;
                }
                std::thread::sleep(self.delay.idle());
            }
            job.child.drain(&mut job.stdout, &mut job.stderr)?;
            self.remove_outputs(graph, job.node);
            report.report(graph.node(job.node), &Err(Failure::Interrupted), &job.stdout, &job.stderr);
            sched.finish(job.node, Err(Failure::Interrupted));
        }
        Ok(())
    }
}

/// Files a node's command writes: its own path plus its side outputs.
fn outputs(graph: &Graph, id: NodeId) -> impl Iterator<Item = &str> {
    let node = graph.node(id);
    std::iter::once(node.path.as_str()).chain(node.weak_deps().iter().map(move |&w| graph.node(w).path.as_str()))
}
