use crate::progress::ConsoleReport;
use crate::session::{BuildSession, Config};
use crate::signal;
use crate::work::StoredCommands;
use anyhow::anyhow;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(argh::FromArgs)]
/// incr, an incremental build engine
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// graph db to build from [default=.incr_db]
    #[argh(option, short = 'f', default = "String::from(\".incr_db\")")]
    file: String,

    /// parallelism [default from system]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// stop starting commands after the first failure
    #[argh(switch, short = 's')]
    stop_on_error: bool,

    /// tolerate filesystems with coarse timestamps
    #[argh(switch)]
    scfs: bool,

    /// print executed command lines and debug logs
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// paths to bring up to date [default=everything stale]
    #[argh(positional)]
    targets: Vec<String>,
}

/// Logs go to stderr.  `INCR_LOG` takes a tracing filter (e.g. "debug" or
/// "incr::plan=trace"); without it we log warnings, or debug with -v.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("INCR_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    // Fails only if a subscriber is already installed, which is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);

    if let Some(dir) = &args.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let mut config = Config {
        db_path: args.file.into(),
        stop_on_first_error: args.stop_on_error,
        scfs: args.scfs,
        ..Config::default()
    };
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            anyhow::bail!("invalid -j 0");
        }
        config.parallelism = jobs;
    }

    let mut session = BuildSession::open(config)?;
    signal::register(session.interrupt_flag());

    let mut want = Vec::new();
    for name in &args.targets {
        match session.graph.node_id(name) {
            Some(id) => want.push(id),
            None => anyhow::bail!("unknown path requested: {:?}", name),
        }
    }

    let mut report = ConsoleReport::new(args.verbose);
    let outcome = session.build(&want, &mut StoredCommands, &mut report)?;
    report.summary(&session.graph, &outcome);
    Ok(outcome.exit_code())
}
