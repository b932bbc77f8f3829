//! Support code for e2e tests, which run incr as a binary.

mod basic;
mod cycles;
mod failure;
mod interrupt;
mod wait;

use std::time::{Duration, SystemTime};

pub fn incr_binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_incr"))
}

pub fn incr_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(incr_binary());
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// Graph db text from record lines.
pub fn db(lines: &[&str]) -> String {
    let mut text = String::from("# incr graph db v1\n");
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

/// The compile/archive/link project most tests build:
/// app <- lib <- {a.o <- a.c, b.o <- b.c}.
pub fn project_db(b_command: &str) -> String {
    db(&[
        "node 0 p D a.c",
        "node 1 p D b.c",
        "node 2 p C a.o",
        "cmd 2 cat a.c > a.o",
        "node 3 p C b.o",
        &format!("cmd 3 {}", b_command),
        "node 4 p A lib",
        "cmd 4 cat a.o b.o > lib",
        "node 5 p L app",
        "cmd 5 cat lib > app",
        "2->0",
        "3->1",
        "4->2",
        "4->3",
        "5->4",
    ])
}

/// Manages a temporary directory for invoking incr.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    pub fn path(&self, path: &str) -> std::path::PathBuf {
        self.dir.path().join(path)
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.path(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path(path).exists()
    }

    /// Set a file's mtime to `secs` seconds ago.
    pub fn age(&self, path: &str, secs: u64) -> std::io::Result<()> {
        let t = SystemTime::now() - Duration::from_secs(secs);
        filetime::set_file_mtime(self.path(path), filetime::FileTime::from_system_time(t))
    }

    /// Invoke incr, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}
