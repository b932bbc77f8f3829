use crate::e2e::*;

#[test]
fn cycle_broken_and_persisted() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".incr_db",
        &db(&[
            "node 0 p D in",
            "node 1 p C a",
            "cmd 1 touch a",
            "node 2 p C b",
            "cmd 2 touch b",
            "1->0",
            "1->2",
            "2->0",
            "2->1",
        ]),
    )?;
    space.write("in", "")?;

    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "b\na\nincr: ran 2 tasks");
    let saved = String::from_utf8(space.read(".incr_db")?)?;
    assert!(saved.lines().any(|l| l == "2X1"), "{}", saved);
    assert!(!saved.lines().any(|l| l == "2->1"), "{}", saved);

    // The blocked edge stays out on later runs.
    let out = space.run_expect(&mut incr_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    let again = String::from_utf8(space.read(".incr_db")?)?;
    assert_eq!(saved, again);
    Ok(())
}
