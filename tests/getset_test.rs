//! Get/set by promoted and absolute names on a single rank.

use approx::assert_abs_diff_eq;
use coupler::component::{ExecComp, IndepVarComp, VarMeta};
use coupler::group::{Group, InputDefaults, Promotes};
use coupler::solver::nonlinear::{NonlinearSolver, SolverOptions};
use coupler::{CouplerError, GetOpts, Problem, SetOpts};

/// Helper: model with `g.c` (y=2*x) and nothing promoted.
fn unpromoted() -> Problem {
    let mut g = Group::new();
    g.add_subsystem("c", ExecComp::new("y=2*x"), Promotes::none());
    let mut model = Group::new();
    model.add_subsystem("g", g, Promotes::none());
    Problem::new(model)
}

/// Helper: model with `g.c1` (y=2*x) and `g.c2` (z=3*y), everything promoted.
fn promoted() -> Problem {
    let mut g = Group::new();
    g.add_subsystem("c1", ExecComp::new("y=2*x"), Promotes::all());
    g.add_subsystem("c2", ExecComp::new("z=3*y"), Promotes::all());
    let mut model = Group::new();
    model.add_subsystem("g", g, Promotes::all());
    Problem::new(model)
}

#[test]
fn absolute_name_round_trip() {
    let mut p = unpromoted();
    p.setup().unwrap();

    p.set_val("g.c.x", 5.0).unwrap();
    assert_eq!(p.get_val("g.c.x").unwrap(), vec![5.0]);

    p.final_setup().unwrap();
    assert_eq!(p.get_val("g.c.x").unwrap(), vec![5.0]);

    p.set_val("g.c.x", 7.0).unwrap();
    p.run_model().unwrap();
    assert_eq!(p.get_val("g.c.x").unwrap(), vec![7.0]);
    assert_eq!(p.get_val("g.c.y").unwrap(), vec![14.0]);
}

#[test]
fn promoted_and_absolute_names_share_values() {
    let mut p = promoted();
    p.setup().unwrap();
    p.set_val("x", 3.0).unwrap();
    p.run_model().unwrap();

    assert_eq!(p.get_val("y").unwrap(), vec![6.0]);
    assert_eq!(p.get_val("g.c1.y").unwrap(), p.get_val("y").unwrap());
    assert_eq!(p.get_val("z").unwrap(), vec![18.0]);
    assert_eq!(p.get_val("g.c2.z").unwrap(), vec![18.0]);

    p.set_val("g.c1.y", 10.0).unwrap();
    assert_eq!(p.get_val("y").unwrap(), vec![10.0]);
    // The connected input reads through its source.
    assert_eq!(p.get_val("g.c2.y").unwrap(), vec![10.0]);
    assert_eq!(
        p.get_val_with("g.c2.y", &GetOpts::default().with_from_src(false)).unwrap(),
        vec![6.0]
    );
}

#[test]
fn unknown_name_suggests_close_matches() {
    let mut p = promoted();
    p.setup().unwrap();
    let err = p.get_val("xx").unwrap_err();
    assert!(matches!(err, CouplerError::NotFound(_)));
    assert_eq!(
        err.to_string(),
        "<model> <class Group>: Variable 'xx' not found. Perhaps you meant one of the \
         following variables: ['x']."
    );
    assert!(p.set_val("qqq", 1.0).is_err());
}

#[test]
fn units_on_get_and_set() {
    let mut model = Group::new();
    model.add_subsystem(
        "C1",
        ExecComp::new("y=2*x")
            .with_var("x", VarMeta::scalar(1.0).units("ft"))
            .with_var("y", VarMeta::scalar(0.0).units("ft")),
        Promotes::all(),
    );
    let mut p = Problem::new(model);
    p.setup().unwrap();

    p.set_val_with("x", 12.0, &SetOpts::units("inch")).unwrap();
    assert_abs_diff_eq!(p.get_val("x").unwrap()[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(
        p.get_val_with("x", &GetOpts::units("inch")).unwrap()[0],
        12.0,
        epsilon = 1e-9
    );

    // Same as assigning directly in component units.
    p.set_val("x", 2.0).unwrap();
    let via_units = p.get_val_with("x", &GetOpts::units("inch")).unwrap();
    p.set_val_with("x", 24.0, &SetOpts::units("inch")).unwrap();
    assert_abs_diff_eq!(via_units[0], 24.0, epsilon = 1e-9);
    assert_abs_diff_eq!(p.get_val("x").unwrap()[0], 2.0, epsilon = 1e-12);

    p.run_model().unwrap();
    assert_abs_diff_eq!(
        p.get_val_with("y", &GetOpts::units("inch")).unwrap()[0],
        48.0,
        epsilon = 1e-9
    );

    let err = p.get_val_with("x", &GetOpts::units("s")).unwrap_err();
    assert_eq!(err.to_string(), "Units error: Cannot convert from 'ft' to 's'.");
}

#[test]
fn last_set_val_wins_across_handles() {
    let build = || {
        let mut g = Group::new();
        g.add_subsystem("C1", ExecComp::new("y=2*x"), Promotes::none());
        let mut model = Group::new();
        model.add_subsystem("G", g, Promotes::none());
        let mut p = Problem::new(model);
        p.setup().unwrap();
        p
    };

    let mut p = build();
    p.system("G").unwrap().set_val("C1.x", 5.0).unwrap();
    p.set_val("G.C1.x", 7.0).unwrap();
    p.final_setup().unwrap();
    assert_eq!(p.get_val("G.C1.x").unwrap(), vec![7.0]);

    let mut p = build();
    p.set_val("G.C1.x", 7.0).unwrap();
    p.system("G").unwrap().set_val("C1.x", 5.0).unwrap();
    p.final_setup().unwrap();
    assert_eq!(p.get_val("G.C1.x").unwrap(), vec![5.0]);
    assert_eq!(p.system("G").unwrap().get_val("C1.x").unwrap(), vec![5.0]);

    // And after final_setup.
    p.system("G").unwrap().set_val("C1.x", 9.0).unwrap();
    p.run_model().unwrap();
    assert_eq!(p.get_val("G.C1.y").unwrap(), vec![18.0]);
}

#[test]
fn array_values_and_indices() {
    let mut model = Group::new();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::array(vec![1.0, 2.0, 3.0])),
        Promotes::all(),
    );
    let mut p = Problem::new(model);
    p.setup().unwrap();

    assert_eq!(p.get_val("x").unwrap(), vec![1.0, 2.0, 3.0]);
    p.set_val_with("x", 9.0, &SetOpts::default().with_indices(vec![1i64]))
        .unwrap();
    assert_eq!(p.get_val("x").unwrap(), vec![1.0, 9.0, 3.0]);
    assert_eq!(
        p.get_val_with("x", &GetOpts::default().with_indices(vec![-1i64]))
            .unwrap(),
        vec![3.0]
    );

    // Scalars broadcast; other size mismatches are rejected.
    p.set_val("x", 0.5).unwrap();
    assert_eq!(p.get_val("x").unwrap(), vec![0.5; 3]);
    assert!(matches!(
        p.set_val("x", vec![1.0, 2.0]),
        Err(CouplerError::Value(_))
    ));
}

#[test]
fn shared_promoted_input_with_defaults() {
    let mut model = Group::new();
    for (name, units) in [("C1", "ft"), ("C2", "inch")] {
        model.add_subsystem(
            name,
            ExecComp::new("y=2*x").with_var("x", VarMeta::scalar(1.0).units(units)),
            Promotes::inputs(["x"]),
        );
    }
    model.set_input_defaults(
        "x",
        InputDefaults {
            val: Some(vec![2.0]),
            units: Some("ft".to_string()),
        },
    );
    let mut p = Problem::new(model);
    p.setup().unwrap();
    p.final_setup().unwrap();

    assert_abs_diff_eq!(p.get_val("x").unwrap()[0], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(p.get_val("C2.x").unwrap()[0], 24.0, epsilon = 1e-9);

    p.set_val("x", 3.0).unwrap();
    p.run_model().unwrap();
    assert_abs_diff_eq!(p.get_val("C1.y").unwrap()[0], 6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(p.get_val("C2.y").unwrap()[0], 72.0, epsilon = 1e-9);
}

#[test]
fn vectors_resolve_names_and_report_errors() {
    let mut model = Group::new();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::scalar(1.0).units("m")),
        Promotes::all(),
    );
    model.add_subsystem(
        "C1",
        ExecComp::new("y1=2*x").with_var("x", VarMeta::scalar(1.0).units("m")),
        Promotes::inputs(["x"]),
    );
    model.add_subsystem(
        "C2",
        ExecComp::new("y2=3*x").with_var("x", VarMeta::scalar(1.0).units("cm")),
        Promotes::inputs(["x"]),
    );
    let mut p = Problem::new(model);
    p.setup().unwrap();
    p.run_model().unwrap();

    let mut vecs = p.nonlinear_vectors_mut("").unwrap();
    let err = vecs.inputs.get("x").unwrap_err();
    assert_eq!(
        err.to_string(),
        "<model> <class Group>: The promoted name x is invalid because it refers to multiple \
         inputs: [C1.x ,C2.x]. Access the value from the connected output variable x instead."
    );
    assert_abs_diff_eq!(vecs.inputs.get("C2.x").unwrap()[0], 100.0, epsilon = 1e-9);
    assert_eq!(vecs.outputs.get("x").unwrap(), &[1.0]);

    let err = vecs.outputs.set("xx", 2.0).unwrap_err();
    assert_eq!(err.to_string(), "<model> <class Group>: Variable name 'xx' not found.");
    let err = vecs.outputs.get("xx").unwrap_err();
    assert_eq!(
        err.to_string(),
        "<model> <class Group>: Variable name 'xx' not found. Perhaps you meant one of the \
         following variables: ['x']."
    );

    vecs.outputs.set("C1.y1", 4.0).unwrap();
    vecs.residuals.set("C1.y1", 0.25).unwrap();
    assert_eq!(vecs.outputs.get("C1.y1").unwrap(), &[4.0]);
    assert_eq!(vecs.residuals.get("C1.y1").unwrap(), &[0.25]);
    drop(vecs);
    assert_eq!(p.get_val("C1.y1").unwrap(), vec![4.0]);

    // Scoped to a subsystem, names are relative to it.
    let vecs = p.nonlinear_vectors_mut("C1").unwrap();
    assert_eq!(vecs.outputs.get("y1").unwrap(), &[4.0]);
    assert_eq!(vecs.inputs.names(), vec!["C1.x"]);
}

#[test]
fn partials_through_scoped_jacobian() {
    let mut model = Group::new();
    model.add_subsystem(
        "C1",
        ExecComp::new("y=x**2").with_var("x", VarMeta::scalar(3.0)),
        Promotes::all(),
    );
    let mut p = Problem::new(model);
    p.setup().unwrap();
    p.run_model().unwrap();
    p.compute_partials().unwrap();

    let mut jac = p.jacobian_mut("").unwrap();
    assert_abs_diff_eq!(jac.get("y", "x").unwrap()[0], 6.0, epsilon = 1e-9);
    let err = jac.get("y", "q").unwrap_err();
    assert_eq!(err.to_string(), "Variable name pair ('y', 'q') not found.");

    jac.set("y", "x", &[1.5]).unwrap();
    assert_eq!(jac.get("y", "x").unwrap(), &[1.5]);
    assert!(matches!(
        jac.set("y", "x", &[1.0, 2.0]),
        Err(CouplerError::Value(_))
    ));

    let jac = p.jacobian_mut("C1").unwrap();
    assert_eq!(jac.get("y", "x").unwrap(), &[1.5]);
}

#[test]
fn block_solvers_converge_on_a_cycle() {
    for solver in [
        NonlinearSolver::BlockGaussSeidel(SolverOptions {
            maxiter: 100,
            atol: 1e-12,
            rtol: 1e-14,
            ..SolverOptions::default()
        }),
        NonlinearSolver::BlockJacobi(SolverOptions {
            maxiter: 100,
            atol: 1e-12,
            rtol: 1e-14,
            ..SolverOptions::default()
        }),
    ] {
        let mut model = Group::new();
        model.add_subsystem("C1", ExecComp::new("y1=0.5*y2+1"), Promotes::all());
        model.add_subsystem("C2", ExecComp::new("y2=0.5*y1"), Promotes::all());
        model.set_nonlinear_solver(solver);
        let mut p = Problem::new(model);
        p.setup().unwrap();
        p.run_model().unwrap();
        assert_abs_diff_eq!(p.get_val("y1").unwrap()[0], 4.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.get_val("y2").unwrap()[0], 2.0 / 3.0, epsilon = 1e-9);
    }
}

#[test]
fn non_convergence_can_be_an_error() {
    let mut model = Group::new();
    model.add_subsystem("C1", ExecComp::new("y1=0.5*y2+1"), Promotes::all());
    model.add_subsystem("C2", ExecComp::new("y2=0.5*y1"), Promotes::all());
    model.set_nonlinear_solver(NonlinearSolver::BlockGaussSeidel(SolverOptions {
        maxiter: 2,
        err_on_non_converge: true,
        ..SolverOptions::default()
    }));
    let mut p = Problem::new(model);
    p.setup().unwrap();
    let err = p.run_model().unwrap_err();
    assert!(matches!(err, CouplerError::Solve(_)));
    assert!(err
        .to_string()
        .contains("failed to converge in 2 iterations"));
}

#[test]
fn stats_count_runs_and_transfers() {
    let mut p = promoted();
    p.setup().unwrap();
    let mut stats = coupler::stats::Stats::new();
    p.run_model_with(Some(&mut stats)).unwrap();
    assert_eq!(stats.component_runs, 2);
    assert!(stats.local_transfers > 0);
    assert_eq!(stats.collective_transfers, 0);
    assert_eq!(stats.phases()[0].0, "run_model");
}
