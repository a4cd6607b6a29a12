// End-to-end scenarios through the public Core API.

use tabflow_engine::{
    hash_name, Block, Change, ColumnDef, ColumnRef, Core, EngineError, Ident, Mode, PausedCommits, Program,
    Register, Settings, TableDecl, TableStore, Value, ValueKind,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const BALL: &str = "\
-- Environment
#ball = [x y vx vy | 0 0 1 1]
#system/timer = [resolution: 15, tick: 0]

-- Move on every tick
~ #system/timer.tick
#ball.x := #ball.x + #ball.vx
#ball.y := #ball.y + #ball.vy
";

fn ball(settings: Settings) -> Core {
    let mut core = Core::with_settings(settings);
    core.compile(BALL).unwrap();
    core
}

fn tick(core: &mut Core, n: u32) {
    core.queue_change("system/timer", 1, hash_name("tick"), Value::Number(n as f64)).unwrap();
    core.process_transaction().unwrap();
}

fn numbers(core: &Core, table: &str, column: &str) -> Vec<f64> {
    core.column(table, column)
        .unwrap()
        .iter()
        .map(|v| v.as_number().unwrap())
        .collect()
}

fn ball_row(core: &Core) -> (f64, f64, f64, f64) {
    let row = |c: &str| numbers(core, "ball", c)[0];
    (row("x"), row("y"), row("vx"), row("vy"))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn ball_ticks_and_steps_back() {
    let mut core = ball(Settings::default());
    for n in 1..=3 {
        tick(&mut core, n);
    }
    assert_eq!(ball_row(&core), (3.0, 3.0, 1.0, 1.0));

    core.pause().unwrap();
    core.step_back_one().unwrap();
    assert_eq!(ball_row(&core), (2.0, 2.0, 1.0, 1.0));

    core.step_back_one().unwrap();
    core.step_back_one().unwrap();
    assert_eq!(ball_row(&core), (0.0, 0.0, 1.0, 1.0));
    assert_eq!(core.history_cursor(), 0);

    assert_eq!(core.step_back_one(), Err(EngineError::AtOldestEntry));
    assert_eq!(ball_row(&core), (0.0, 0.0, 1.0, 1.0));

    core.resume().unwrap();
    assert_eq!(core.mode(), Mode::Live);
    assert_eq!(ball_row(&core), (3.0, 3.0, 1.0, 1.0));
}

#[test]
fn step_back_then_forward_is_identity() {
    let mut core = ball(Settings::default());
    tick(&mut core, 1);
    tick(&mut core, 2);
    let tip = core.fingerprint();

    core.pause().unwrap();
    core.step_back_one().unwrap();
    assert_ne!(core.fingerprint(), tip);
    core.step_forward_one().unwrap();
    assert_eq!(core.fingerprint(), tip);
    assert_eq!(core.step_forward_one(), Err(EngineError::AtNewestEntry));
}

#[test]
fn appended_row_is_removed_by_step_back() {
    let mut core = ball(Settings::default());
    let values = [5.0, 5.0, 0.0, 0.0].iter().map(|n| Value::Number(*n)).collect();
    core.queue_append("ball", vec![values]).unwrap();
    core.process_transaction().unwrap();
    assert_eq!(numbers(&core, "ball", "x"), vec![0.0, 5.0]);

    // Both rows move; the new one has zero velocity.
    tick(&mut core, 1);
    assert_eq!(numbers(&core, "ball", "x"), vec![1.0, 5.0]);

    core.pause().unwrap();
    core.step_back_one().unwrap();
    core.step_back_one().unwrap();
    assert_eq!(numbers(&core, "ball", "x"), vec![0.0]);
    let summary = core.list_tables().into_iter().find(|t| t.name == "ball").unwrap();
    assert_eq!(summary.rows, 1);
}

#[test]
fn branch_commit_discards_redo() {
    let settings = Settings { paused_commits: PausedCommits::Branch, ..Settings::default() };
    let mut core = ball(settings);
    for n in 1..=3 {
        tick(&mut core, n);
    }

    core.pause().unwrap();
    core.step_back_one().unwrap();
    core.step_back_one().unwrap();
    assert_eq!(ball_row(&core), (1.0, 1.0, 1.0, 1.0));

    tick(&mut core, 10);
    assert_eq!(core.history_len(), 2);
    assert_eq!(core.history_cursor(), 2);
    assert_eq!(ball_row(&core), (2.0, 2.0, 1.0, 1.0));
    assert_eq!(core.step_forward_one(), Err(EngineError::AtNewestEntry));
}

#[test]
fn paused_append_keeps_view_frozen() {
    let mut core = ball(Settings::default());
    tick(&mut core, 1);
    tick(&mut core, 2);
    core.pause().unwrap();
    core.step_back_one().unwrap();

    tick(&mut core, 3);
    assert_eq!(core.history_len(), 3);
    assert_eq!(core.history_cursor(), 1);
    assert_eq!(ball_row(&core), (1.0, 1.0, 1.0, 1.0));

    core.resume().unwrap();
    assert_eq!(ball_row(&core), (3.0, 3.0, 1.0, 1.0));
}

#[test]
fn paused_append_with_eviction() {
    let settings = Settings { max_history_entries: Some(2), ..Settings::default() };
    let mut core = ball(settings);
    tick(&mut core, 1);
    tick(&mut core, 2);
    core.pause().unwrap();
    core.step_back_one().unwrap();

    tick(&mut core, 3);
    assert_eq!(core.history_len(), 2);
    assert_eq!(core.history_cursor(), 0);
    assert_eq!(ball_row(&core), (1.0, 1.0, 1.0, 1.0));
    assert_eq!(core.step_back_one(), Err(EngineError::AtOldestEntry));

    core.resume().unwrap();
    assert_eq!(ball_row(&core), (3.0, 3.0, 1.0, 1.0));
}

#[test]
fn paused_reject_changes_nothing() {
    let settings = Settings { paused_commits: PausedCommits::Reject, ..Settings::default() };
    let mut core = ball(settings);
    tick(&mut core, 1);
    core.pause().unwrap();
    let before = core.fingerprint();

    core.queue_change("system/timer", 1, hash_name("tick"), Value::Number(2.0)).unwrap();
    assert_eq!(core.process_transaction(), Err(EngineError::CommitWhilePaused));
    assert_eq!(core.fingerprint(), before);
    assert_eq!(core.history_len(), 1);
}

#[test]
fn divergent_transaction_rolls_back() {
    let settings = Settings { max_rounds: 8, ..Settings::default() };
    let mut core = Core::with_settings(settings);
    core.compile("#a = [x | 0]\n\n-- Runaway\n~ #a.x\n#a.x :+= 1\n").unwrap();
    let before = core.fingerprint();

    core.queue_change("a", 1, 1, Value::Number(1.0)).unwrap();
    assert_eq!(core.process_transaction(), Err(EngineError::DivergentTransaction { rounds: 8 }));
    assert_eq!(core.fingerprint(), before);
    assert_eq!(core.history_len(), 0);

    let graph = core.describe_block_graph();
    assert_eq!(graph.feedback_edges(), 1);
}

#[test]
fn compile_failure_keeps_previous_universe() {
    let mut core = ball(Settings::default());
    tick(&mut core, 1);
    let before = core.fingerprint();

    let err = core.compile("-- Bad\n~ #ball.x\n#ball.y := nope\n").unwrap_err();
    match err {
        EngineError::Compile(e) => assert_eq!(e.line, 3),
        other => panic!("expected a compile error, got {:?}", other),
    }
    assert_eq!(core.fingerprint(), before);
    assert_eq!(core.history_len(), 1);
}

#[test]
fn formula_block_tracks_inputs() {
    let mut core = Core::new();
    core.compile("#ball = [x y | 1 2]\n\n-- Sum\n#sum = #ball.x + #ball.y\n").unwrap();
    assert_eq!(core.get_column(hash_name("sum"), 1).unwrap(), vec![Value::Number(3.0)]);

    core.queue_change("ball", 1, hash_name("x"), Value::Number(10.0)).unwrap();
    let entry = core.process_transaction().unwrap().unwrap();
    assert_eq!(entry.fired, vec!["Sum".to_string()]);
    assert_eq!(core.get_column(hash_name("sum"), 1).unwrap(), vec![Value::Number(12.0)]);

    core.pause().unwrap();
    core.step_back_one().unwrap();
    assert_eq!(core.get_column(hash_name("sum"), 1).unwrap(), vec![Value::Number(3.0)]);
}

#[test]
fn program_built_in_code() {
    let double = Block::from_fn("double", |tables: &TableStore| {
        let input = tables
            .read_cell(Ident::of("t"), 0, ColumnRef::named("a"))
            .map_err(|e| e.to_string())?;
        let a = input.as_number().ok_or("a is not a number")?;
        Ok(vec![Change::set("t", 0, "b", a * 2.0)])
    })
    .watching(Register::named("t", "a"))
    .producing(Register::named("t", "b"));

    let table = TableDecl::new(
        "t",
        vec![ColumnDef::new("a", ValueKind::Number), ColumnDef::new("b", ValueKind::Number)],
        vec![vec![Value::Number(1.0), Value::Number(2.0)]],
    );
    let mut core = Core::new();
    core.load(Program::new().with_table(table).with_block(double)).unwrap();

    core.queue_change("t", 1, hash_name("a"), Value::Number(21.0)).unwrap();
    core.process_transaction().unwrap();
    assert_eq!(core.column("t", "b").unwrap(), vec![Value::Number(42.0)]);
}

#[test]
fn clear_returns_to_empty() {
    let mut core = ball(Settings::default());
    tick(&mut core, 1);
    core.clear();
    assert_eq!(core.mode(), Mode::Empty);
    assert_eq!(core.history_len(), 0);
    assert_eq!(
        core.queue_change("ball", 1, hash_name("x"), Value::Number(1.0)),
        Err(EngineError::NotReady)
    );
}

#[test]
fn acyclic_chain_is_not_divergent() {
    let settings = Settings { max_rounds: 2, ..Settings::default() };
    let mut core = Core::with_settings(settings);
    core.compile(
        "#t = [a b c d | 0 0 0 0]\n\n~ #t.a\n#t.b := #t.a + 1\n\n~ #t.b\n#t.c := #t.b + 1\n\n~ #t.c\n#t.d := #t.c + 1\n",
    )
    .unwrap();

    core.queue_change("t", 1, hash_name("a"), Value::Number(1.0)).unwrap();
    let entry = core.process_transaction().unwrap().unwrap();
    assert_eq!(entry.rounds, 1);
    assert_eq!(numbers(&core, "t", "d"), vec![4.0]);
    assert_eq!(core.describe_block_graph().feedback_edges(), 0);
}

#[test]
fn append_to_columnless_table_is_rejected() {
    let mut core = Core::new();
    core.load(Program::new().with_table(TableDecl::new("t", Vec::new(), Vec::new()))).unwrap();
    let before = core.fingerprint();

    core.queue_append("t", vec![Vec::new()]).unwrap();
    let err = core.process_transaction().unwrap_err();
    assert!(matches!(err, EngineError::TransactionRejected { index: 0, .. }));
    assert_eq!(core.fingerprint(), before);
    assert_eq!(core.list_tables()[0].rows, 0);
    assert_eq!(core.history_len(), 0);
}
