//! Case recording round trips through SQLite.

use approx::assert_abs_diff_eq;
use coupler::component::{ExecComp, IndepVarComp, VarMeta};
use coupler::group::{Group, Promotes};
use coupler::recorder::{CaseReader, SqliteRecorder};
use coupler::Problem;

/// Helper: `indep.x` (ft) promoted as `x`, feeding `comp` (y=2*x).
fn model() -> Group {
    let mut model = Group::new();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::array(vec![1.0, 2.0]).units("ft")),
        Promotes::all(),
    );
    model.add_subsystem(
        "comp",
        ExecComp::new("y=2*x")
            .with_var("x", VarMeta::zeros(2).units("ft"))
            .with_var("y", VarMeta::zeros(2).units("ft")),
        Promotes::all(),
    );
    model
}

#[test]
fn record_read_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = Problem::new(model()).named("rec").with_work_dir(dir.path());
    p.add_recorder(SqliteRecorder::new("cases.db"));
    p.setup().unwrap();

    p.run_model().unwrap();
    p.record("first").unwrap();
    p.set_val("x", vec![3.0, 4.0]).unwrap();
    p.run_model().unwrap();
    p.record("second").unwrap();
    p.cleanup().unwrap();

    let path = dir.path().join("rec_out").join("cases.db");
    assert!(path.exists());
    let reader = CaseReader::open(&path).unwrap();
    assert_eq!(reader.list_cases().unwrap(), vec!["first", "second"]);

    let first = reader.get_case("first").unwrap();
    assert_eq!(first.get_val("y").unwrap(), vec![2.0, 4.0]);
    assert_eq!(first.get_val("comp.y").unwrap(), vec![2.0, 4.0]);
    // Promoted names prefer the output.
    assert_eq!(first.get_val("x").unwrap(), vec![1.0, 2.0]);
    assert_eq!(first.get_val("comp.x").unwrap(), vec![1.0, 2.0]);
    assert_eq!(first.units("y"), Some("ft"));
    let inches = first.get_val_units("y", "inch").unwrap();
    assert_abs_diff_eq!(inches[1], 48.0, epsilon = 1e-9);
    assert!(first.get_val("nope").is_err());
    assert!(reader.get_case("third").is_err());

    // Restore the first case into the live problem.
    p.load_case(&first).unwrap();
    assert_eq!(p.get_val("x").unwrap(), vec![1.0, 2.0]);
    assert_eq!(p.get_val("y").unwrap(), vec![2.0, 4.0]);
}

#[test]
fn recording_options_filter_variables() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = Problem::new(model()).with_work_dir(dir.path());
    p.add_recorder(SqliteRecorder::new("filtered.db"));
    {
        let opts = p.recording_options_mut();
        opts.record_inputs = false;
        opts.excludes = vec!["y".to_string()];
    }
    p.setup().unwrap();
    p.run_model().unwrap();
    p.record("only_x").unwrap();
    p.cleanup().unwrap();

    let reader = CaseReader::open(p.outputs_dir().join("filtered.db")).unwrap();
    let case = reader.get_case("only_x").unwrap();
    assert!(case.inputs.is_empty());
    assert_eq!(case.outputs.keys().collect::<Vec<_>>(), vec!["indep.x"]);
}

#[test]
fn startup_replaces_an_existing_database() {
    let dir = tempfile::tempdir().unwrap();
    let run = |case: &str| {
        let mut p = Problem::new(model()).with_work_dir(dir.path());
        p.add_recorder(SqliteRecorder::new("cases.db"));
        p.setup().unwrap();
        p.run_model().unwrap();
        p.record(case).unwrap();
        p.cleanup().unwrap();
        p.outputs_dir().join("cases.db")
    };
    run("old");
    let path = run("new");
    let reader = CaseReader::open(path).unwrap();
    assert_eq!(reader.list_cases().unwrap(), vec!["new"]);
}

#[test]
fn recorder_added_after_run_is_started_on_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = Problem::new(model()).named("late").with_work_dir(dir.path());
    p.setup().unwrap();
    p.run_model().unwrap();

    p.add_recorder(SqliteRecorder::new("late.db"));
    p.final_setup().unwrap();
    p.record("after").unwrap();
    p.cleanup().unwrap();

    let reader = CaseReader::open(dir.path().join("late_out").join("late.db")).unwrap();
    let case = reader.get_case("after").unwrap();
    assert_eq!(case.get_val("y").unwrap(), vec![2.0, 4.0]);
}
