use crate::{quad_discretization, quad_layouts};
use fieldgraph::discretization::Discretization;
use fieldgraph::eval_type::{DistParamDeriv, Jacobian, Residual, Tangent};
use fieldgraph::evaluators::{
    BinaryOperation, CellReduction, DofInterpolation, GatherScalarNodalParameter, GatherSolution, P0Interpolation,
    ReductionKind, SharedParameter, SimpleBinaryOperation, SimpleTernaryOperation, SimpleUnaryOperation,
    UnaryOperation,
};
use fieldgraph::field::{FieldScalarType, FieldTag};
use fieldgraph::inputs::EvaluationInputs;
use fieldgraph::layout::{LayoutDims, Layouts};
use fieldgraph::manager::{ExternalSource, FieldManager};
use fieldgraph::params::ParameterLibrary;
use fieldgraph::FadType;
use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use util::{q4_gauss_points, unit_square_quad_mesh};

use FieldScalarType::{MeshScalar, ParamScalar, Real, Scalar};

#[test]
fn unary_operations_on_plain_values() {
    let apply = |op: UnaryOperation, x: f64| op.apply(&x);
    assert_eq!(apply(UnaryOperation::Scale { factor: 2.5 }, 2.0), 5.0);
    assert_scalar_eq!(apply(UnaryOperation::Log { factor: 2.0 }, 1.5), 3.0f64.ln(), comp = float);
    assert_scalar_eq!(apply(UnaryOperation::Exp { tau: -0.5 }, 2.0), (-1.0f64).exp(), comp = float);
    assert_eq!(apply(UnaryOperation::LowPass { upper: 1.0 }, 3.0), 1.0);
    assert_eq!(apply(UnaryOperation::LowPass { upper: 1.0 }, -3.0), -3.0);
    assert_eq!(apply(UnaryOperation::HighPass { lower: 1.0 }, 3.0), 3.0);
    assert_eq!(apply(UnaryOperation::HighPass { lower: 1.0 }, -3.0), 1.0);
    let band = UnaryOperation::BandPass { lower: -1.0, upper: 1.0 };
    assert_eq!(apply(band, -2.0), -1.0);
    assert_eq!(apply(band, 0.25), 0.25);
    assert_eq!(apply(band, 2.0), 1.0);
}

#[test]
fn unary_operations_propagate_derivatives() {
    let x = FadType::variable(2.0, 2, 1);
    let y = UnaryOperation::Exp { tau: 0.5 }.apply(&x);
    assert_scalar_eq!(y.value(), 1.0f64.exp(), comp = float);
    assert_eq!(y.dx()[0], 0.0);
    assert_scalar_eq!(y.dx()[1], 0.5 * 1.0f64.exp(), comp = float);

    let y = UnaryOperation::Log { factor: 3.0 }.apply(&x);
    assert_scalar_eq!(y.dx()[1], 0.5, comp = float);

    // Clamped values are constant w.r.t. the input
    let y = UnaryOperation::LowPass { upper: 1.0 }.apply(&x);
    assert_eq!(y.value(), 1.0);
    assert!(y.dx().iter().all(|&d| d == 0.0));
}

#[test]
fn binary_operations_on_plain_values() {
    let (x, p) = (3.0, 2.0);
    assert_eq!(BinaryOperation::Scale.apply(&x, &p), 6.0);
    assert_eq!(BinaryOperation::Sum.apply(&x, &p), 5.0);
    assert_scalar_eq!(BinaryOperation::Log.apply(&x, &p), 6.0f64.ln(), comp = float);
    assert_scalar_eq!(BinaryOperation::Exp.apply(&x, &p), 6.0f64.exp(), comp = float);
    assert_eq!(BinaryOperation::LowPass.apply(&x, &p), 2.0);
    assert_eq!(BinaryOperation::HighPass.apply(&x, &p), 3.0);
    assert_eq!(BinaryOperation::BandPassFixedUpper { upper: 2.5 }.apply(&x, &p), 2.5);
    assert_eq!(BinaryOperation::BandPassFixedUpper { upper: 2.5 }.apply(&1.0, &p), 2.0);
    assert_eq!(BinaryOperation::BandPassFixedLower { lower: 2.5 }.apply(&x, &p), 2.5);
    assert_eq!(BinaryOperation::BandPassFixedLower { lower: 0.0 }.apply(&1.0, &p), 1.0);
}

#[test]
fn operation_outputs_take_the_stronger_scalar_class() {
    let layouts = quad_layouts(2);
    let binary = SimpleBinaryOperation::new(
        ("x", Real),
        ("p", ParamScalar),
        "y",
        &layouts.qp_scalar,
        BinaryOperation::Scale,
    );
    assert_eq!(binary.output().scalar_type(), ParamScalar);
    let binary = SimpleBinaryOperation::new(("x", Scalar), ("p", MeshScalar), "y", &layouts.qp_scalar, BinaryOperation::Sum);
    assert_eq!(binary.output().scalar_type(), Scalar);

    let ternary = SimpleTernaryOperation::band_pass(("x", MeshScalar), "lo", "hi", ParamScalar, "y", &layouts.qp_scalar);
    assert_eq!(ternary.output().scalar_type(), ParamScalar);

    let unary = SimpleUnaryOperation::new("x", "y", &layouts.qp_scalar, MeshScalar, UnaryOperation::Exp { tau: 1.0 });
    assert_eq!(unary.output().scalar_type(), MeshScalar);
    assert_eq!(
        <SimpleUnaryOperation as fieldgraph::evaluator::Evaluator<Residual>>::name(&unary),
        "Simple Unary Exp: x -> y"
    );
}

#[test]
fn ternary_band_pass_clamps_between_bound_fields() {
    let layouts = quad_layouts(1);
    let disc = quad_discretization(1, 1, 1, 1)
        .with_cell_array("x", 4, &[-2.0, 0.5, 3.0, 1.5])
        .unwrap()
        .with_cell_array("lo", 4, &[0.0, 0.0, 0.0, 1.0])
        .unwrap()
        .with_cell_array("hi", 4, &[1.0, 1.0, 2.0, 2.0])
        .unwrap();

    let mut fm = FieldManager::<Residual>::default();
    for name in ["x", "lo", "hi"] {
        let tag = FieldTag::new(name, &layouts.node_scalar, Real);
        fm.declare_external(&tag, ExternalSource::WorksetArray(name.to_string()))
            .unwrap();
    }
    let op = SimpleTernaryOperation::band_pass(("x", Real), "lo", "hi", Real, "y", &layouts.node_scalar);
    let y = op.output().clone();
    fm.register_evaluator(op).unwrap();
    fm.require_field(&y).unwrap();
    fm.post_registration_setup().unwrap();

    let x = DVector::zeros(disc.num_dofs());
    let evaluation = fm
        .evaluate_workset(&disc.worksets()[0], &EvaluationInputs::new(&x))
        .unwrap();
    assert_eq!(evaluation.values::<f64>(&y).unwrap(), vec![0.0, 0.5, 2.0, 1.5]);
}

fn linear(x: f64, y: f64) -> f64 {
    1.0 + 2.0 * x + 3.0 * y
}

/// Gathers `T` and interpolates it, along with the node coordinates, to quadrature points.
fn interpolation_manager(layouts: &Layouts) -> FieldManager<Residual> {
    let mut fm = FieldManager::<Residual>::default();
    let bf = FieldTag::new("BF", &layouts.node_qp_scalar, Real);
    fm.declare_external(&bf, ExternalSource::WorksetArray("BF".to_string()))
        .unwrap();
    let coords = FieldTag::new("Coord Vec", &layouts.vertices_vector, Real);
    fm.declare_external(&coords, ExternalSource::Coordinates)
        .unwrap();

    fm.register_evaluator(GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap())
        .unwrap();
    let interpolations = [
        DofInterpolation::new(
            "T",
            "T QP",
            "BF",
            &layouts.node_scalar,
            &layouts.qp_scalar,
            &layouts.node_qp_scalar,
            Scalar,
        )
        .unwrap(),
        DofInterpolation::new(
            "Coord Vec",
            "Coord QP",
            "BF",
            &layouts.vertices_vector,
            &layouts.qp_gradient,
            &layouts.node_qp_scalar,
            Real,
        )
        .unwrap(),
    ];
    for interpolation in interpolations {
        let output = interpolation.output().clone();
        fm.register_evaluator(interpolation).unwrap();
        fm.require_field(&output).unwrap();
    }
    fm.post_registration_setup().unwrap();
    fm
}

#[test]
fn dof_interpolation_reproduces_linear_functions() {
    let layouts = quad_layouts(3);
    let mesh = unit_square_quad_mesh(2, 2);
    let disc = quad_discretization(2, 2, 1, 3);
    let x = DVector::from_fn(disc.num_dofs(), |i, _| linear(mesh.vertices[2 * i], mesh.vertices[2 * i + 1]));
    let inputs = EvaluationInputs::new(&x);
    let fm = interpolation_manager(&layouts);

    let t_qp = FieldTag::new("T QP", &layouts.qp_scalar, Scalar);
    let coord_qp = FieldTag::new("Coord QP", &layouts.qp_gradient, Real);
    for workset in disc.worksets() {
        let evaluation = fm.evaluate_workset(workset, &inputs).unwrap();
        let values = evaluation.real_values(&t_qp).unwrap();
        let points = evaluation.real_values(&coord_qp).unwrap();
        assert_eq!(values.len(), 4 * workset.num_cells());
        for (i, value) in values.iter().enumerate() {
            let expected = linear(points[2 * i], points[2 * i + 1]);
            assert_scalar_eq!(*value, expected, comp = abs, tol = 1e-12);
        }
    }

    // The first Gauss point of the first cell lies in its lower left corner
    let evaluation = fm
        .evaluate_workset(&disc.worksets()[0], &inputs)
        .unwrap();
    let points = evaluation.real_values(&coord_qp).unwrap();
    let [xi, eta] = q4_gauss_points()[0];
    assert_scalar_eq!(points[0], 0.25 * (1.0 + xi), comp = abs, tol = 1e-14);
    assert_scalar_eq!(points[1], 0.25 * (1.0 + eta), comp = abs, tol = 1e-14);
}

#[test]
fn dof_interpolation_of_vector_solution() {
    let layouts = Layouts::new(LayoutDims {
        vec_dim: 2,
        ..*quad_layouts(4).dims()
    });
    let mesh = unit_square_quad_mesh(2, 2);
    let disc = quad_discretization(2, 2, 2, 4);
    let x = DVector::from_fn(disc.num_dofs(), |i, _| {
        let (node, eq) = (i / 2, i % 2);
        let (px, py) = (mesh.vertices[2 * node], mesh.vertices[2 * node + 1]);
        if eq == 0 {
            linear(px, py)
        } else {
            px - py
        }
    });

    let mut fm = FieldManager::<Jacobian>::default();
    let bf = FieldTag::new("BF", &layouts.node_qp_scalar, Real);
    fm.declare_external(&bf, ExternalSource::WorksetArray("BF".to_string()))
        .unwrap();
    fm.register_evaluator(GatherSolution::vector("U", &layouts.node_vector).unwrap())
        .unwrap();
    let interpolation = DofInterpolation::new(
        "U",
        "U QP",
        "BF",
        &layouts.node_vector,
        &layouts.qp_vector,
        &layouts.node_qp_scalar,
        Scalar,
    )
    .unwrap();
    let u_qp = interpolation.output().clone();
    fm.register_evaluator(interpolation).unwrap();
    fm.require_field(&u_qp).unwrap();
    fm.post_registration_setup().unwrap();

    let evaluation = fm
        .evaluate_workset(&disc.worksets()[0], &EvaluationInputs::new(&x))
        .unwrap();
    let values = evaluation.values::<FadType>(&u_qp).unwrap();
    // Cell 0 spans [0, 0.5]^2
    for (q, [xi, eta]) in q4_gauss_points().into_iter().enumerate() {
        let (px, py) = (0.25 * (1.0 + xi), 0.25 * (1.0 + eta));
        assert_scalar_eq!(values[2 * q].value(), linear(px, py), comp = abs, tol = 1e-12);
        assert_scalar_eq!(values[2 * q + 1].value(), px - py, comp = abs, tol = 1e-12);
        // The first component depends only on the first equation of each node
        let derivatives = values[2 * q].dx();
        assert_eq!(derivatives.len(), 8);
        assert!(derivatives.iter().skip(1).step_by(2).all(|&d| d == 0.0));
        assert_scalar_eq!(derivatives.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn cell_averages_of_a_linear_function() {
    let layouts = quad_layouts(1);
    let mesh = unit_square_quad_mesh(1, 1);
    let disc = quad_discretization(1, 1, 1, 1);
    let x = DVector::from_fn(4, |i, _| linear(mesh.vertices[2 * i], mesh.vertices[2 * i + 1]));

    let mut fm = FieldManager::<Residual>::default();
    for (name, layout) in [("BF", &layouts.node_qp_scalar), ("Weights", &layouts.qp_scalar)] {
        let tag = FieldTag::new(name, layout, Real);
        fm.declare_external(&tag, ExternalSource::WorksetArray(name.to_string()))
            .unwrap();
    }
    fm.register_evaluator(GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap())
        .unwrap();
    fm.register_evaluator(
        DofInterpolation::new(
            "T",
            "T QP",
            "BF",
            &layouts.node_scalar,
            &layouts.qp_scalar,
            &layouts.node_qp_scalar,
            Scalar,
        )
        .unwrap(),
    )
    .unwrap();
    let average = P0Interpolation::cell_average(
        "T QP",
        "T Average",
        "Weights",
        &layouts.qp_scalar,
        &layouts.qp_scalar,
        &layouts.cell_scalar,
        Scalar,
    )
    .unwrap();
    let barycenter =
        P0Interpolation::barycenter_value("T", "T Center", &layouts.node_scalar, &layouts.cell_scalar, Scalar).unwrap();
    let mean = CellReduction::new(
        "T",
        "T Mean",
        &layouts.node_scalar,
        &layouts.cell_scalar,
        Scalar,
        ReductionKind::Mean,
    )
    .unwrap();
    let outputs = [
        average.output().clone(),
        barycenter.output().clone(),
        mean.output().clone(),
    ];
    fm.register_evaluator(average).unwrap();
    fm.register_evaluator(barycenter).unwrap();
    fm.register_evaluator(mean).unwrap();
    for output in &outputs {
        fm.require_field(output).unwrap();
    }
    fm.post_registration_setup().unwrap();

    let evaluation = fm
        .evaluate_workset(&disc.worksets()[0], &EvaluationInputs::new(&x))
        .unwrap();
    for output in &outputs {
        let values = evaluation.real_values(output).unwrap();
        assert_eq!(values.len(), 1);
        assert_scalar_eq!(values[0], 3.5, comp = abs, tol = 1e-12);
    }
}

#[test]
fn p0_rejects_inconsistent_layouts() {
    let layouts = quad_layouts(2);
    assert!(P0Interpolation::barycenter_value("T", "C", &layouts.qp_scalar, &layouts.cell_scalar, Scalar).is_err());
    assert!(P0Interpolation::cell_average(
        "T",
        "C",
        "w",
        &layouts.qp_vector,
        &layouts.qp_scalar,
        &layouts.cell_scalar,
        Scalar
    )
    .is_err());
    assert!(CellReduction::new(
        "T",
        "C",
        &layouts.qp_scalar,
        &layouts.node_scalar,
        Scalar,
        ReductionKind::Sum
    )
    .is_err());
}

#[test]
fn shared_parameter_is_seeded_in_tangent_passes() {
    let layouts = quad_layouts(1);
    let disc = quad_discretization(1, 1, 1, 1);
    let library = Arc::new(ParameterLibrary::new());

    let mut fm = FieldManager::<Tangent>::new(Arc::clone(&library));
    let parameter = SharedParameter::new("alpha", &layouts.shared_param, 2.0);
    let field = parameter.field().clone();
    fm.register_evaluator(parameter).unwrap();
    fm.require_field(&field).unwrap();
    fm.post_registration_setup().unwrap();
    assert_eq!(library.value("alpha"), Some(2.0));

    let x = DVector::zeros(disc.num_dofs());
    let vx = DMatrix::zeros(disc.num_dofs(), 1);
    let inputs = EvaluationInputs::new(&x).with_tangent_directions(Some(&vx), &["alpha"]);
    let evaluation = fm.evaluate_workset(&disc.worksets()[0], &inputs).unwrap();
    let values = evaluation.values::<FadType>(&field).unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value(), 2.0);
    assert_eq!(values[0].dx(), &[0.0, 1.0]);
    drop(evaluation);

    // Without a tangent direction for the parameter it is a constant
    let inputs = EvaluationInputs::new(&x);
    let evaluation = fm.evaluate_workset(&disc.worksets()[0], &inputs).unwrap();
    assert!(evaluation.values::<FadType>(&field).unwrap()[0].dx().is_empty());
}

#[test]
fn shared_parameter_reads_the_current_library_value() {
    let layouts = quad_layouts(1);
    let disc = quad_discretization(1, 1, 1, 1);
    let library = Arc::new(ParameterLibrary::new());
    // Existing values take precedence over nominal values
    library.add("beta", 4.0);

    let mut fm = FieldManager::<Residual>::new(Arc::clone(&library));
    let parameter = SharedParameter::new("beta", &layouts.shared_param, 1.0);
    let field = parameter.field().clone();
    fm.register_evaluator(parameter).unwrap();
    fm.require_field(&field).unwrap();
    fm.post_registration_setup().unwrap();

    let x = DVector::zeros(disc.num_dofs());
    let inputs = EvaluationInputs::new(&x);
    let value = |fm: &FieldManager<Residual>| {
        fm.evaluate_workset(&disc.worksets()[0], &inputs)
            .unwrap()
            .real_values(&field)
            .unwrap()
    };
    assert_eq!(value(&fm), vec![4.0]);
    library.set_value("beta", 5.0).unwrap();
    assert_eq!(value(&fm), vec![5.0]);
}

#[test]
fn nodal_parameter_is_seeded_per_local_node() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let kappa = DVector::from_fn(disc.num_nodes(), |i, _| 10.0 + i as f64);

    let mut fm = FieldManager::<DistParamDeriv>::default();
    let gather = GatherScalarNodalParameter::new("kappa", &layouts.node_scalar).unwrap();
    let field = gather.field().clone();
    assert_eq!(field.scalar_type(), ParamScalar);
    fm.register_evaluator(gather).unwrap();
    fm.require_field(&field).unwrap();
    fm.post_registration_setup().unwrap();

    let x = DVector::zeros(disc.num_dofs());
    let inputs = EvaluationInputs::new(&x)
        .with_distributed_parameter("kappa", &kappa)
        .with_active_distributed_parameter("kappa");
    let workset = &disc.worksets()[0];
    let evaluation = fm.evaluate_workset(workset, &inputs).unwrap();
    let values = evaluation.values::<FadType>(&field).unwrap();
    for cell in 0..workset.num_cells() {
        for (node, &gid) in workset.cell_nodes(cell).iter().enumerate() {
            let value = &values[4 * cell + node];
            assert_eq!(value.value(), kappa[gid]);
            let mut expected = vec![0.0; 4];
            expected[node] = 1.0;
            assert_eq!(value.dx(), expected.as_slice());
        }
    }
    drop(evaluation);

    // A missing parameter vector is an evaluation error
    let inputs = EvaluationInputs::new(&x);
    assert!(fm.evaluate_workset(workset, &inputs).is_err());
}

#[test]
fn gather_with_offset_selects_equations() {
    let layouts = quad_layouts(1);
    let disc = quad_discretization(1, 1, 2, 1);
    let x = DVector::from_fn(disc.num_dofs(), |i, _| i as f64);

    let mut fm = FieldManager::<Jacobian>::default();
    let gather = GatherSolution::scalar(&["V"], &layouts.node_scalar)
        .unwrap()
        .with_offset(1);
    let v = gather.solution_fields()[0].clone();
    fm.register_evaluator(gather).unwrap();
    fm.require_field(&v).unwrap();
    fm.post_registration_setup().unwrap();

    let workset = &disc.worksets()[0];
    let evaluation = fm
        .evaluate_workset(workset, &EvaluationInputs::new(&x))
        .unwrap();
    let values = evaluation.values::<FadType>(&v).unwrap();
    for (node, &gid) in workset.cell_nodes(0).iter().enumerate() {
        assert_eq!(values[node].value(), (2 * gid + 1) as f64);
        let mut expected = vec![0.0; 8];
        expected[2 * node + 1] = 1.0;
        assert_eq!(values[node].dx(), expected.as_slice());
    }
}

#[test]
fn gather_beyond_the_equations_of_a_node_fails() {
    let layouts = quad_layouts(1);
    let disc = quad_discretization(1, 1, 2, 1);
    let x = DVector::zeros(disc.num_dofs());

    let mut fm = FieldManager::<Residual>::default();
    let gather = GatherSolution::scalar(&["A", "B"], &layouts.node_scalar)
        .unwrap()
        .with_offset(1);
    let fields: Vec<_> = gather.solution_fields().into_iter().cloned().collect();
    fm.register_evaluator(gather).unwrap();
    for field in &fields {
        fm.require_field(field).unwrap();
    }
    fm.post_registration_setup().unwrap();

    let err = fm
        .evaluate_workset(&disc.worksets()[0], &EvaluationInputs::new(&x))
        .err()
        .unwrap();
    assert!(format!("{:?}", err).contains("offset 1"));
}

#[test]
fn gather_time_derivatives_need_matching_names() {
    let layouts = quad_layouts(1);
    let gather = GatherSolution::scalar(&["A", "B"], &layouts.node_scalar).unwrap();
    assert!(gather.clone().with_time_derivative(&["A_dot"]).is_err());
    assert!(gather.with_time_derivative(&["A_dot", "B_dot"]).is_ok());
    assert!(GatherSolution::scalar(&[], &layouts.node_scalar).is_err());
    assert!(GatherSolution::scalar(&["A"], &layouts.qp_vector).is_err());
}
