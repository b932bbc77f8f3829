use crate::e2e::*;

fn generator_db(command: &str) -> String {
    db(&[
        "node 0 p D x.y",
        "node 1 p yacc x.cpp",
        &format!("cmd 1 {}", command),
        "node 2 p W x.h",
        "node 3 p C main.o",
        "cmd 3 cat x.h > main.o",
        "1->0",
        "3->2",
        "1<>2",
    ])
}

#[test]
fn side_output_consumed_after_producer() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &generator_db("touch x.cpp; echo header > x.h"))?;
    space.write("x.y", "")?;
    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "x.cpp\nmain.o\n");
    assert_eq!(space.read("main.o")?, b"header\n");
    Ok(())
}

#[test]
fn missing_side_output_fails_producer() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &generator_db("touch x.cpp"))?;
    space.write("x.y", "")?;
    let out = space.run(&mut incr_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: x.cpp: side output x.h missing or not updated");
    assert_output_contains(&out, "failed: x.h");
    assert_output_contains(&out, "unreachable: main.o");
    // The producer's own output does not survive a failed run.
    assert!(!space.exists("x.cpp"));
    assert!(!space.exists("main.o"));
    Ok(())
}

#[test]
fn deleted_side_output_reruns_producer() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".incr_db", &generator_db("touch x.cpp; echo header > x.h"))?;
    space.write("x.y", "")?;
    space.run_expect(&mut incr_command(vec![]))?;

    std::fs::remove_file(space.path("x.h"))?;
    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "x.cpp\nmain.o\n");
    assert!(space.exists("x.h"));
    Ok(())
}
