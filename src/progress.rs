//! Build progress reporting, for the purpose of display to the user.

use crate::graph::{Graph, Node, NodeId};
use crate::session::{BuildOutcome, Cause};
use crate::work::{Failure, Invocation};
use std::io::Write;

/// Trait for build progress notifications.
pub trait Report {
    /// Called when a command starts.
    fn task_started(&mut self, _node: &Node, _invocation: &Invocation) {}

    /// Called once per node that finished, successfully or not, with the
    /// output its command produced.
    fn report(&mut self, node: &Node, result: &Result<(), Failure>, stdout: &[u8], stderr: &[u8]);

    /// Log a line of output.
    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Discards everything.
pub struct NoReport;

impl Report for NoReport {
    fn report(&mut self, _node: &Node, _result: &Result<(), Failure>, _stdout: &[u8], _stderr: &[u8]) {}
    fn log(&mut self, _msg: &str) {}
}

/// Report implementation for a plain console, without any overprinting.
#[derive(Default)]
pub struct ConsoleReport {
    /// Whether to print command lines of started programs.
    verbose: bool,
}

impl ConsoleReport {
    pub fn new(verbose: bool) -> Self {
        ConsoleReport { verbose }
    }

    /// Print the end-of-run summary.
    pub fn summary(&mut self, graph: &Graph, outcome: &BuildOutcome) {
        let path = |id: NodeId| graph.node(id).path.as_str();
        for u in &outcome.unreachable {
            let why = match &u.cause {
                Cause::Failed(id) => format!("{} failed", path(*id)),
                Cause::Interrupted => "interrupted".to_string(),
                Cause::Stopped => "not started after an earlier failure".to_string(),
                Cause::NoProducer => "nothing produces it".to_string(),
                Cause::Missing(id) => format!("{} is missing", path(*id)),
            };
            self.log(&format!("unreachable: {} ({})", path(u.node), why));
            if u.chain.len() > 1 {
                let chain: Vec<&str> = u.chain.iter().map(|&id| path(id)).collect();
                self.log(&format!("  via {}", chain.join(" -> ")));
            }
        }
        if outcome.interrupted {
            self.log("incr: interrupted");
        } else if !outcome.success() {
            self.log(&format!(
                "incr: {} failed, {} unreachable",
                outcome.failed.len(),
                outcome.unreachable.len()
            ));
        } else if outcome.ran == 0 {
            self.log("incr: no work to do");
        } else {
            self.log(&format!(
                "incr: ran {} task{}, now up to date",
                outcome.ran,
                if outcome.ran == 1 { "" } else { "s" }
            ));
        }
    }
}

impl Report for ConsoleReport {
    fn task_started(&mut self, node: &Node, invocation: &Invocation) {
        if self.verbose {
            self.log(&invocation.to_string());
        } else {
            self.log(&node.path);
        }
    }

    fn report(&mut self, node: &Node, result: &Result<(), Failure>, stdout: &[u8], stderr: &[u8]) {
        match result {
            Ok(()) => {}
            Err(Failure::Interrupted) => self.log(&format!("interrupted: {}", node.path)),
            Err(failure) => self.log(&format!("failed: {}: {}", node.path, failure)),
        }
        // Output is shown even on success, e.g. compiler warnings.
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(stdout);
        let _ = out.write_all(stderr);
    }
}
