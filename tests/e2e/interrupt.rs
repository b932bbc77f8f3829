use crate::e2e::*;
use std::time::{Duration, Instant};

#[test]
fn sigint_removes_partial_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&[
            "node 0 p D in",
            "node 1 p C out",
            "cmd 1 echo partial > out; sleep 2",
            "1->0",
        ]),
    )?;
    space.write("in", "")?;

    let mut child = incr_command(vec![])
        .current_dir(space.path(""))
        .stdout(std::process::Stdio::piped())
        .spawn()?;

    // Wait for the command to have started writing.
    let deadline = Instant::now() + Duration::from_secs(10);
    while !space.exists("out") {
        assert!(Instant::now() < deadline, "command never started");
        std::thread::sleep(Duration::from_millis(10));
    }
    unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };

    let out = child.wait_with_output()?;
    assert_eq!(out.status.code(), Some(130));
    assert_output_contains(&out, "interrupted: out");
    assert!(!space.exists("out"));

    // The db was still saved, and the next run retries.
    let saved = String::from_utf8(space.read(".incr_db")?)?;
    assert!(saved.contains("node 1 p C out"));
    Ok(())
}
