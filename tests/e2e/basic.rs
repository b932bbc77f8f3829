use crate::e2e::*;

#[test]
fn empty_db() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "incr: no work to do\n");
    // The db is written even when there was nothing to do.
    assert!(space.exists(".incr_db"));
    Ok(())
}

#[test]
fn builds_in_order_then_no_work() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("cat b.c > b.o"))?;
    space.write("a.c", "a")?;
    space.write("b.c", "b")?;

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_eq!(
        std::str::from_utf8(&out.stdout)?,
        "a.o\nb.o\nlib\napp\nincr: ran 4 tasks, now up to date\n"
    );
    assert_eq!(space.read("app")?, b"ab");

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "incr: no work to do");
    Ok(())
}

#[test]
fn touched_source_rebuilds_downstream_only() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("cat b.c > b.o"))?;
    space.write("a.c", "a")?;
    space.write("b.c", "b")?;
    space.run_expect(&mut incr_command(vec![]))?;

    for path in ["a.c", "b.c", "a.o", "b.o", "lib", "app"] {
        space.age(path, 100)?;
    }
    space.write("b.c", "B")?;
    space.age("b.c", 50)?;

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_not_contains(&out, "a.o");
    assert_output_contains(&out, "b.o\nlib\napp\nincr: ran 3 tasks");
    assert_eq!(space.read("app")?, b"aB");

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "incr: no work to do");
    Ok(())
}

#[test]
fn requested_target_only() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("cat b.c > b.o"))?;
    space.write("a.c", "a")?;
    space.write("b.c", "b")?;

    let out = space.run_expect(&mut incr_command(vec!["a.o"]))?;
    assert_output_contains(&out, "incr: ran 1 task, now up to date");
    assert!(space.exists("a.o"));
    assert!(!space.exists("b.o"));
    assert!(!space.exists("app"));
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &project_db("cat b.c > b.o"))?;
    let out = space.run(&mut incr_command(vec!["nope"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "incr: error: unknown path requested: \"nope\"");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // Run a command that needs a subdir to be automatically created.
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&[
            "node 0 p D in",
            "node 1 p C subdir/out",
            "cmd 1 touch subdir/out",
            "1->0",
        ]),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut incr_command(vec!["subdir/out"]))?;
    assert!(space.exists("subdir/out"));
    Ok(())
}

#[test]
fn marked_node_rebuilds_and_mark_clears() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&[
            "node 0 p D in",
            "node 1 p C out",
            "cmd 1 echo x >> out",
            "flags 1 M",
            "1->0",
        ]),
    )?;
    space.write("in", "")?;
    space.write("out", "")?;
    space.age("in", 100)?;

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "ran 1 task");
    let saved = String::from_utf8(space.read(".incr_db")?)?;
    assert!(!saved.contains("flags"), "{}", saved);

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn output_is_shown() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&[
            "node 0 p D in",
            "node 1 p C out",
            "cmd 1 echo hello from out; touch out",
            "1->0",
        ]),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "hello from out\n");
    Ok(())
}

#[test]
fn vanished_source_is_collected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&["node 0 p D gone.c", "node 1 p D kept.c"]),
    )?;
    space.write("kept.c", "")?;
    space.run_expect(&mut incr_command(vec![]))?;
    let saved = String::from_utf8(space.read(".incr_db")?)?;
    assert!(!saved.contains("gone.c"), "{}", saved);
    assert!(saved.contains("kept.c"), "{}", saved);
    Ok(())
}
