use crate::e2e::*;

#[test]
fn failure_blocks_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("echo compile error; exit 1"))?;
    space.write("a.c", "a")?;
    space.write("b.c", "b")?;

    let out = space.run(&mut incr_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: b.o: exit status 1");
    assert_output_contains(&out, "compile error");
    assert_output_contains(&out, "unreachable: lib (b.o failed)");
    assert_output_contains(&out, "unreachable: app (b.o failed)\n  via b.o -> lib -> app\n");
    assert!(space.exists("a.o"));
    assert!(!space.exists("lib"));
    assert!(!space.exists("app"));
    Ok(())
}

#[test]
fn failed_command_output_removed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("echo partial > b.o; exit 3"))?;
    space.write("a.c", "a")?;
    space.write("b.c", "b")?;

    let out = space.run(&mut incr_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(!space.exists("b.o"));

    // The failed node is retried on the next run.
    let out = space.run(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "failed: b.o: exit status 3");
    assert_output_not_contains(&out, "a.o\n");
    Ok(())
}

#[test]
fn exit_zero_without_output_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("true"))?;
    space.write("a.c", "a")?;
    space.write("b.c", "b")?;

    let out = space.run(&mut incr_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: b.o: output missing or not updated");
    Ok(())
}

#[test]
fn missing_command_fails_node() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&["node 0 p D in", "node 1 p C out", "1->0"]),
    )?;
    space.write("in", "")?;
    let out = space.run(&mut incr_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: out: no command: no command recorded for out");
    Ok(())
}

#[test]
fn stop_on_first_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&[
            "node 0 p D in",
            "node 1 p C one",
            "cmd 1 exit 1",
            "node 2 p C two",
            "cmd 2 touch two",
            "1->0",
            "2->0",
        ]),
    )?;
    space.write("in", "")?;
    let out = space.run(&mut incr_command(vec!["-s", "-j", "1"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "unreachable: two (not started after an earlier failure)");
    assert!(!space.exists("two"));
    Ok(())
}
