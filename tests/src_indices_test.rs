//! Connections through source indices, with and without units.

use approx::assert_abs_diff_eq;
use coupler::component::{ExecComp, IndepVarComp, VarMeta};
use coupler::group::{Group, InputDefaults, Promotes};
use coupler::indices::SrcIndices;
use coupler::{CouplerError, GetOpts, Problem, SetOpts};

fn arange(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

/// Helper: `indep.x` (10 values) split between `C1.x` (0..7) and `C2.x` (7..10).
fn split_model() -> Group {
    let mut model = Group::new();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::array(arange(10))),
        Promotes::any(["x"]),
    );
    model.add_subsystem(
        "C1",
        ExecComp::new("y=x*2.")
            .with_var("x", VarMeta::zeros(7))
            .with_var("y", VarMeta::zeros(7)),
        Promotes::none(),
    );
    model.add_subsystem(
        "C2",
        ExecComp::new("y=x*3.")
            .with_var("x", VarMeta::zeros(3))
            .with_var("y", VarMeta::zeros(3)),
        Promotes::none(),
    );
    model.promotes("C1", Promotes::inputs(["x"]).with_src_indices(0..7));
    model.promotes("C2", Promotes::inputs(["x"]).with_src_indices(7..10));
    model
}

#[test]
fn disjoint_partitions_update_their_slice() {
    let mut p = Problem::new(split_model());
    p.setup().unwrap();
    p.run_model().unwrap();

    assert_eq!(p.get_val("C1.x").unwrap(), arange(7));
    assert_eq!(p.get_val("C2.x").unwrap(), vec![7.0, 8.0, 9.0]);
    assert_eq!(
        p.get_val("C1.y").unwrap(),
        arange(7).iter().map(|v| v * 2.0).collect::<Vec<_>>()
    );
    assert_eq!(p.get_val("C2.y").unwrap(), vec![21.0, 24.0, 27.0]);

    p.set_val("C2.x", vec![10.0, 11.0, 12.0]).unwrap();
    let mut expected = arange(7);
    expected.extend([10.0, 11.0, 12.0]);
    assert_eq!(p.get_val("x").unwrap(), expected);

    p.set_val("C1.x", vec![1.0; 7]).unwrap();
    let mut expected = vec![1.0; 7];
    expected.extend([10.0, 11.0, 12.0]);
    assert_eq!(p.get_val("x").unwrap(), expected);

    p.run_model().unwrap();
    assert_eq!(p.get_val("C2.y").unwrap(), vec![30.0, 33.0, 36.0]);
    assert_eq!(p.get_val("C1.y").unwrap(), vec![2.0; 7]);
}

#[test]
fn explicit_connection_with_src_indices() {
    let mut model = Group::new();
    model.add_subsystem(
        "p1",
        IndepVarComp::new().output("x", VarMeta::array(arange(5))),
        Promotes::none(),
    );
    model.add_subsystem(
        "C1",
        ExecComp::new("y=x+1")
            .with_var("x", VarMeta::zeros(2))
            .with_var("y", VarMeta::zeros(2)),
        Promotes::none(),
    );
    model.connect("p1.x", "C1.x", Some(SrcIndices::new(vec![-1, 1])));
    let mut p = Problem::new(model);
    p.setup().unwrap();
    p.run_model().unwrap();

    assert_eq!(p.get_val("C1.x").unwrap(), vec![4.0, 1.0]);
    assert_eq!(p.get_val("C1.y").unwrap(), vec![5.0, 2.0]);

    p.set_val_with("C1.x", 20.0, &SetOpts::default().with_indices(vec![0i64]))
        .unwrap();
    assert_eq!(p.get_val("p1.x").unwrap(), vec![0.0, 1.0, 2.0, 3.0, 20.0]);
}

#[test]
fn src_indices_with_unit_conversion() {
    let mut model = Group::new();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::array(vec![12.0, 24.0, 36.0]).units("inch")),
        Promotes::any(["x"]),
    );
    model.add_subsystem(
        "C1",
        ExecComp::new("y=2*x")
            .with_var("x", VarMeta::zeros(2).units("ft"))
            .with_var("y", VarMeta::zeros(2).units("ft")),
        Promotes::none(),
    );
    model.promotes("C1", Promotes::inputs(["x"]).with_src_indices(vec![0i64, 2]));
    let mut p = Problem::new(model);
    p.setup().unwrap();

    let x = p.get_val("C1.x").unwrap();
    assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(x[1], 3.0, epsilon = 1e-12);
    let x_in = p.get_val_with("C1.x", &GetOpts::units("inch")).unwrap();
    assert_abs_diff_eq!(x_in[1], 36.0, epsilon = 1e-9);

    p.set_val("C1.x", vec![2.0, 4.0]).unwrap();
    let src = p.get_val("x").unwrap();
    assert_abs_diff_eq!(src[0], 24.0, epsilon = 1e-9);
    assert_abs_diff_eq!(src[1], 24.0, epsilon = 1e-9);
    assert_abs_diff_eq!(src[2], 48.0, epsilon = 1e-9);

    p.set_val_with("C1.x", vec![12.0, 60.0], &SetOpts::units("inch"))
        .unwrap();
    let src = p.get_val("x").unwrap();
    assert_abs_diff_eq!(src[0], 12.0, epsilon = 1e-9);
    assert_abs_diff_eq!(src[2], 60.0, epsilon = 1e-9);

    p.run_model().unwrap();
    let y = p.get_val("C1.y").unwrap();
    assert_abs_diff_eq!(y[0], 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(y[1], 10.0, epsilon = 1e-9);
}

/// Helper: three inputs promoted to `x` with no output to feed them.
fn no_src_model(units: [&str; 3]) -> Group {
    let mut model = Group::new();
    for (i, u) in units.iter().enumerate() {
        let name = format!("C{}", i + 1);
        model.add_subsystem(
            &name,
            ExecComp::new(&format!("y{}={}*x", i + 1, i + 2))
                .with_var("x", VarMeta::scalar(1.0).units(u)),
            Promotes::inputs(["x"]),
        );
    }
    model
}

/// Helper: `C1` (ft) on 0..7 and `C2` (inch) on 7..10 promoted to `x`
/// through src_indices.
fn split_units_model() -> Group {
    let mut model = Group::new();
    model.add_subsystem(
        "C1",
        ExecComp::new("y=x*2.")
            .with_var("x", VarMeta::zeros(7).units("ft"))
            .with_var("y", VarMeta::zeros(7).units("ft")),
        Promotes::none(),
    );
    model.add_subsystem(
        "C2",
        ExecComp::new("y=x*3.")
            .with_var("x", VarMeta::zeros(3).units("inch"))
            .with_var("y", VarMeta::zeros(3).units("inch")),
        Promotes::none(),
    );
    model
}

#[test]
fn mismatched_units_without_source_fail_setup() {
    let mut model = split_units_model();
    model.add_subsystem(
        "C3",
        ExecComp::new("y=x*4.")
            .with_var("x", VarMeta::zeros(10).units("mm"))
            .with_var("y", VarMeta::zeros(10).units("mm")),
        Promotes::any(["x"]),
    );
    model.promotes("C1", Promotes::inputs(["x"]).with_src_indices(0..7));
    model.promotes("C2", Promotes::inputs(["x"]).with_src_indices(7..10));

    let mut p = Problem::new(model).named("serial_multi_src_inds_units_promoted_no_src");
    let err = p.setup().unwrap_err();
    assert!(matches!(err, CouplerError::Setup(_)));
    assert_eq!(
        err.to_string(),
        "\nCollected errors for problem 'serial_multi_src_inds_units_promoted_no_src':\n   \
         <model> <class Group>: The following inputs, ['C1.x', 'C2.x', 'C3.x'], promoted to 'x', \
         are connected but their metadata entries ['units'] differ. Call \
         <group>.set_input_defaults('x', units=?), where <group> is the model to remove the \
         ambiguity."
    );
}

#[test]
fn set_val_with_units_through_promoted_src_indices() {
    let mut model = split_units_model();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::array(vec![1.0; 10]).units("inch")),
        Promotes::any(["x"]),
    );
    model.promotes("C1", Promotes::inputs(["x"]).with_src_indices(0..7));
    model.promotes("C2", Promotes::inputs(["x"]).with_src_indices(7..10));
    let mut p = Problem::new(model);
    p.setup().unwrap();

    p.set_val_with("C1.x", vec![24.0; 7], &SetOpts::units("inch"))
        .unwrap();
    p.set_val_with("C2.x", vec![3.0; 3], &SetOpts::units("inch"))
        .unwrap();
    p.run_model().unwrap();

    let src = p.get_val("indep.x").unwrap();
    for v in &src[..7] {
        assert_abs_diff_eq!(*v, 24.0, epsilon = 1e-9);
    }
    for v in &src[7..] {
        assert_abs_diff_eq!(*v, 3.0, epsilon = 1e-9);
    }
    for v in p.get_val("C1.x").unwrap() {
        assert_abs_diff_eq!(v, 2.0, epsilon = 1e-9);
    }
    for v in p.get_val("C1.y").unwrap() {
        assert_abs_diff_eq!(v, 4.0, epsilon = 1e-9);
    }
    assert_eq!(p.get_val("C2.x").unwrap(), vec![3.0; 3]);
    assert_eq!(p.get_val("C2.y").unwrap(), vec![9.0; 3]);
}

#[test]
fn matching_units_without_source_succeed() {
    let mut p = Problem::new(no_src_model(["ft", "ft", "ft"]));
    p.setup().unwrap();
    p.set_val("x", 2.0).unwrap();
    p.run_model().unwrap();
    assert_abs_diff_eq!(p.get_val("C1.y1").unwrap()[0], 4.0, epsilon = 1e-12);
    assert_abs_diff_eq!(p.get_val("C3.y3").unwrap()[0], 8.0, epsilon = 1e-12);
}

#[test]
fn input_defaults_resolve_unit_ambiguity() {
    let mut model = no_src_model(["ft", "inch", "m"]);
    model.set_input_defaults("x", InputDefaults::units("m"));
    let mut p = Problem::new(model);
    p.setup().unwrap();

    p.set_val("x", 1.0).unwrap();
    assert_abs_diff_eq!(p.get_val("x").unwrap()[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(
        p.get_val("C2.x").unwrap()[0],
        1.0 / 0.0254,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        p.get_val_with("x", &GetOpts::units("cm")).unwrap()[0],
        100.0,
        epsilon = 1e-9
    );
}

#[test]
fn out_of_range_src_indices_fail_setup() {
    let mut model = Group::new();
    model.add_subsystem(
        "indep",
        IndepVarComp::new().output("x", VarMeta::array(arange(3))),
        Promotes::any(["x"]),
    );
    model.add_subsystem(
        "C1",
        ExecComp::new("y=2*x")
            .with_var("x", VarMeta::zeros(2))
            .with_var("y", VarMeta::zeros(2)),
        Promotes::none(),
    );
    model.promotes("C1", Promotes::inputs(["x"]).with_src_indices(vec![0i64, 5]));
    let mut p = Problem::new(model);
    let err = p.setup().unwrap_err().to_string();
    assert!(err.contains("index 5 is out of bounds for source dimension of size 3."));
}
