use crate::{node_valences, quad_discretization, quad_layouts, CellCoupling};
use fieldgraph::comm::{Communicator, SerialComm};
use fieldgraph::discretization::{Discretization, MeshDiscretization};
use fieldgraph::eval_type::{DistParamDeriv, EvaluationType, Jacobian, Residual, Tangent};
use fieldgraph::evaluators::{
    BinaryOperation, CellReduction, GatherScalarNodalParameter, GatherSolution, IntegralResponse, ReductionKind,
    ScatterResidual, SimpleBinaryOperation, SimpleUnaryOperation, UnaryOperation,
};
use fieldgraph::field::{FieldScalarType, FieldTag};
use fieldgraph::global::{assemble_dof_node_pattern, assemble_dof_pattern, GlobalOutputs};
use fieldgraph::inputs::EvaluationInputs;
use fieldgraph::layout::{LayoutDims, Layouts};
use fieldgraph::manager::{ExternalSource, FieldManager};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use parking_lot::Mutex;
use util::approximate_jacobian_fd;

use FieldScalarType::{ParamScalar, Real, Scalar};

fn scatter_into<E: EvaluationType>(fm: &mut FieldManager<E>, layouts: &Layouts, residual: &str) {
    let scatter = ScatterResidual::scalar("Residual", &[residual], &layouts.node_scalar, &layouts.dummy).unwrap();
    let tag = scatter.scatter_tag().clone();
    fm.register_evaluator(scatter).unwrap();
    fm.require_field(&tag).unwrap();
}

/// `R = exp(0.1 * T * sum_cell(T))` for a gathered solution `T`.
fn coupled_exp_manager<E: EvaluationType>(layouts: &Layouts) -> FieldManager<E> {
    let mut fm = FieldManager::<E>::default();
    fm.register_evaluator(GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap())
        .unwrap();
    fm.register_evaluator(CellCoupling::new("T", "U", &layouts.node_scalar))
        .unwrap();
    fm.register_evaluator(SimpleUnaryOperation::new(
        "U",
        "R",
        &layouts.node_scalar,
        Scalar,
        UnaryOperation::Exp { tau: 0.1 },
    ))
    .unwrap();
    scatter_into(&mut fm, layouts, "R");
    fm.post_registration_setup().unwrap();
    fm
}

fn evaluate_residual(fm: &FieldManager<Residual>, disc: &dyn Discretization, inputs: &EvaluationInputs) -> DVector<f64> {
    let mut outputs = GlobalOutputs::new(disc.num_dofs());
    fm.evaluate(disc, inputs, &mut outputs, &SerialComm).unwrap();
    outputs.residual().clone()
}

fn sample_solution(n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| 0.3 + 0.1 * (i as f64).sin() + 0.05 * i as f64)
}

#[test]
fn cell_sum_of_external_node_field() {
    let layouts = quad_layouts(2);
    let values: Vec<f64> = (1..=8).map(|v| v as f64).collect();
    let disc = quad_discretization(2, 1, 1, 2)
        .with_cell_array("A", 4, &values)
        .unwrap();

    let mut fm = FieldManager::<Residual>::default();
    let a = FieldTag::new("A", &layouts.node_scalar, Real);
    fm.declare_external(&a, ExternalSource::WorksetArray("A".to_string()))
        .unwrap();
    let reduction = CellReduction::new(
        "A",
        "B",
        &layouts.node_scalar,
        &layouts.cell_scalar,
        Real,
        ReductionKind::Sum,
    )
    .unwrap();
    let b = reduction.output().clone();
    fm.register_evaluator(reduction).unwrap();
    fm.require_field(&b).unwrap();
    fm.post_registration_setup().unwrap();

    let x = DVector::zeros(disc.num_dofs());
    let evaluation = fm
        .evaluate_workset(&disc.worksets()[0], &EvaluationInputs::new(&x))
        .unwrap();
    assert_eq!(evaluation.values::<f64>(&b).unwrap(), vec![10.0, 26.0]);
}

/// Integrates the workset arrays `f` and `w` into the response "Total".
fn total_response_manager(layouts: &Layouts) -> FieldManager<Residual> {
    let mut fm = FieldManager::<Residual>::default();
    for name in ["f", "w"] {
        let tag = FieldTag::new(name, &layouts.qp_scalar, Real);
        fm.declare_external(&tag, ExternalSource::WorksetArray(name.to_string()))
            .unwrap();
    }
    let response = IntegralResponse::new("Total", "f", "w", &layouts.qp_scalar, &layouts.dummy, Real, 1.0).unwrap();
    let tag = response.response_tag().clone();
    fm.register_evaluator(response).unwrap();
    fm.require_field(&tag).unwrap();
    fm.post_registration_setup().unwrap();
    fm
}

fn single_qp_layouts() -> Layouts {
    Layouts::new(LayoutDims {
        workset_size: 1,
        nodes_per_cell: 4,
        qps_per_cell: 1,
        num_dims: 2,
        vec_dim: 1,
        sides_per_cell: 4,
        nodes_per_side: 2,
    })
}

#[test]
fn integral_response_sums_over_worksets() {
    let layouts = single_qp_layouts();
    let disc = quad_discretization(2, 1, 1, 1)
        .with_cell_array("f", 1, &[3.0, 4.0])
        .unwrap()
        .with_cell_array("w", 1, &[1.0, 1.0])
        .unwrap();
    assert_eq!(disc.worksets().len(), 2);

    let fm = total_response_manager(&layouts);
    let x = DVector::zeros(disc.num_dofs());
    let mut outputs = GlobalOutputs::new(disc.num_dofs());
    fm.evaluate(&disc, &EvaluationInputs::new(&x), &mut outputs, &SerialComm)
        .unwrap();
    let total = outputs.response("Total").unwrap();
    assert_scalar_eq!(total.value, 7.0, comp = float);
    assert!(total.gradient.is_empty());
}

#[test]
fn repeated_passes_give_identical_results() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let x = sample_solution(disc.num_dofs());
    let inputs = EvaluationInputs::new(&x);
    let fm = coupled_exp_manager::<Residual>(&layouts);

    let first = evaluate_residual(&fm, &disc, &inputs);
    let second = evaluate_residual(&fm, &disc, &inputs);
    assert_eq!(first, second);

    let r = FieldTag::new("R", &layouts.node_scalar, Scalar);
    let ws = &disc.worksets()[1];
    let a = fm.evaluate_workset(ws, &inputs).unwrap().real_values(&r).unwrap();
    let b = fm.evaluate_workset(ws, &inputs).unwrap().real_values(&r).unwrap();
    assert_eq!(a, b);
    // The second workset holds a single cell
    assert_eq!(a.len(), 4);
}

#[test]
fn single_dof_jacobian_of_scaled_solution() {
    let layouts = Layouts::new(LayoutDims {
        workset_size: 1,
        nodes_per_cell: 1,
        qps_per_cell: 1,
        num_dims: 1,
        vec_dim: 1,
        sides_per_cell: 1,
        nodes_per_side: 1,
    });
    let disc = MeshDiscretization::new(1, &[0.0], 1, &[0], 1, 1).unwrap();

    let mut fm = FieldManager::<Jacobian>::default();
    fm.register_evaluator(GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap())
        .unwrap();
    fm.register_evaluator(SimpleUnaryOperation::new(
        "T",
        "R",
        &layouts.node_scalar,
        Scalar,
        UnaryOperation::Scale { factor: 2.0 },
    ))
    .unwrap();
    scatter_into(&mut fm, &layouts, "R");
    fm.post_registration_setup().unwrap();

    let x = DVector::from_element(1, 3.0);
    let mut outputs = GlobalOutputs::new(1).with_jacobian(assemble_dof_pattern(&disc));
    fm.evaluate(&disc, &EvaluationInputs::new(&x), &mut outputs, &SerialComm)
        .unwrap();

    assert_eq!(outputs.residual().as_slice(), &[6.0]);
    assert_eq!(outputs.jacobian().unwrap().values(), &[2.0]);
}

#[test]
fn jacobian_matches_finite_differences_of_residual() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let n = disc.num_dofs();
    let mut x = sample_solution(n);

    let residual_fm = coupled_exp_manager::<Residual>(&layouts);
    let jacobian_fm = coupled_exp_manager::<Jacobian>(&layouts);

    let mut outputs = GlobalOutputs::new(n).with_jacobian(assemble_dof_pattern(&disc));
    jacobian_fm
        .evaluate(&disc, &EvaluationInputs::new(&x), &mut outputs, &SerialComm)
        .unwrap();
    let jacobian = DMatrix::from(outputs.jacobian().unwrap());

    // The Jacobian pass computes the same residual
    let residual = evaluate_residual(&residual_fm, &disc, &EvaluationInputs::new(&x));
    assert_matrix_eq!(outputs.residual().clone(), residual, comp = abs, tol = 1e-14);

    let fd = approximate_jacobian_fd(
        n,
        |x, f| f.copy_from(&evaluate_residual(&residual_fm, &disc, &EvaluationInputs::new(x))),
        &mut x,
        1e-6,
    );
    assert_matrix_eq!(jacobian, fd, comp = abs, tol = 1e-6);
}

#[test]
fn jacobian_combines_time_derivative_coefficients() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let n = disc.num_dofs();

    let mut fm = FieldManager::<Jacobian>::default();
    let gather = GatherSolution::scalar(&["T"], &layouts.node_scalar)
        .unwrap()
        .with_time_derivative(&["T_dot"])
        .unwrap();
    fm.register_evaluator(gather).unwrap();
    fm.register_evaluator(SimpleBinaryOperation::new(
        ("T", Scalar),
        ("T_dot", Scalar),
        "R",
        &layouts.node_scalar,
        BinaryOperation::Sum,
    ))
    .unwrap();
    scatter_into(&mut fm, &layouts, "R");
    fm.post_registration_setup().unwrap();

    let x = sample_solution(n);
    let xdot = DVector::from_element(n, 0.5);
    let inputs = EvaluationInputs::new(&x)
        .with_xdot(&xdot)
        .with_coefficients(2.0, 3.0, 0.0);
    let mut outputs = GlobalOutputs::new(n).with_jacobian(assemble_dof_pattern(&disc));
    fm.evaluate(&disc, &inputs, &mut outputs, &SerialComm).unwrap();

    let valences = DVector::from_vec(node_valences(&disc));
    let expected = DMatrix::from_diagonal(&(valences * 5.0));
    assert_matrix_eq!(DMatrix::from(outputs.jacobian().unwrap()), expected, comp = abs, tol = 1e-14);
}

#[test]
fn tangent_equals_jacobian_times_directions() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let n = disc.num_dofs();
    let x = sample_solution(n);
    let vx = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { (i as f64 + 1.0).recip() });

    let jacobian_fm = coupled_exp_manager::<Jacobian>(&layouts);
    let mut jacobian_outputs = GlobalOutputs::new(n).with_jacobian(assemble_dof_pattern(&disc));
    jacobian_fm
        .evaluate(&disc, &EvaluationInputs::new(&x), &mut jacobian_outputs, &SerialComm)
        .unwrap();
    let jacobian = DMatrix::from(jacobian_outputs.jacobian().unwrap());

    let tangent_fm = coupled_exp_manager::<Tangent>(&layouts);
    let inputs = EvaluationInputs::new(&x).with_tangent_directions::<&str>(Some(&vx), &[]);
    let mut outputs = GlobalOutputs::new(n).with_tangent(2);
    tangent_fm
        .evaluate(&disc, &inputs, &mut outputs, &SerialComm)
        .unwrap();

    assert_matrix_eq!(outputs.tangent().unwrap().clone(), jacobian * vx, comp = abs, tol = 1e-12);
}

/// `R = T * sum_cell(exp(kappa * T))` with a nodal parameter `kappa`.
fn parameter_manager<E: EvaluationType>(layouts: &Layouts) -> FieldManager<E> {
    let mut fm = FieldManager::<E>::default();
    fm.register_evaluator(GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap())
        .unwrap();
    fm.register_evaluator(GatherScalarNodalParameter::new("kappa", &layouts.node_scalar).unwrap())
        .unwrap();
    fm.register_evaluator(SimpleBinaryOperation::new(
        ("T", Scalar),
        ("kappa", ParamScalar),
        "E",
        &layouts.node_scalar,
        BinaryOperation::Exp,
    ))
    .unwrap();
    fm.register_evaluator(CellCoupling::new("E", "R", &layouts.node_scalar))
        .unwrap();
    scatter_into(&mut fm, layouts, "R");
    fm.post_registration_setup().unwrap();
    fm
}

#[test]
fn distributed_parameter_derivative_matches_finite_differences() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let n = disc.num_dofs();
    let x = sample_solution(n);
    let mut kappa = DVector::from_fn(disc.num_nodes(), |i, _| 0.5 + 0.1 * i as f64);

    let fm = parameter_manager::<DistParamDeriv>(&layouts);
    let inputs = EvaluationInputs::new(&x)
        .with_distributed_parameter("kappa", &kappa)
        .with_active_distributed_parameter("kappa");
    let mut outputs = GlobalOutputs::new(n).with_dist_param_deriv(assemble_dof_node_pattern(&disc));
    fm.evaluate(&disc, &inputs, &mut outputs, &SerialComm).unwrap();
    let dfdp = DMatrix::from(outputs.dist_param_deriv().unwrap());

    let residual_fm = parameter_manager::<Residual>(&layouts);
    let fd = approximate_jacobian_fd(
        n,
        |kappa, f| {
            let inputs = EvaluationInputs::new(&x).with_distributed_parameter("kappa", kappa);
            f.copy_from(&evaluate_residual(&residual_fm, &disc, &inputs));
        },
        &mut kappa,
        1e-6,
    );
    assert_matrix_eq!(dfdp, fd, comp = abs, tol = 1e-6);

    // Without an active parameter there is nothing to differentiate
    let inputs = EvaluationInputs::new(&x).with_distributed_parameter("kappa", &kappa);
    let mut outputs = GlobalOutputs::new(n).with_dist_param_deriv(assemble_dof_node_pattern(&disc));
    fm.evaluate(&disc, &inputs, &mut outputs, &SerialComm).unwrap();
    assert!(outputs
        .dist_param_deriv()
        .unwrap()
        .values()
        .iter()
        .all(|&v| v == 0.0));
}

#[test]
fn jacobian_rows_without_scatter_stay_zero() {
    // A Jacobian pass without a scatter leaves the outputs untouched
    let layouts = quad_layouts(3);
    let disc = quad_discretization(1, 1, 1, 3);
    let mut fm = FieldManager::<Jacobian>::default();
    let gather = GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap();
    let t = gather.solution_fields()[0].clone();
    fm.register_evaluator(gather).unwrap();
    fm.require_field(&t).unwrap();
    fm.post_registration_setup().unwrap();

    let x = sample_solution(disc.num_dofs());
    let mut outputs = GlobalOutputs::new(disc.num_dofs()).with_jacobian(assemble_dof_pattern(&disc));
    fm.evaluate(&disc, &EvaluationInputs::new(&x), &mut outputs, &SerialComm)
        .unwrap();
    assert!(outputs.residual().iter().all(|&r| r == 0.0));
    assert!(outputs.jacobian().unwrap().values().iter().all(|&v| v == 0.0));
}

#[test]
fn layouts_with_wrong_node_count_are_rejected() {
    let layouts = Layouts::new(LayoutDims {
        workset_size: 2,
        nodes_per_cell: 2,
        qps_per_cell: 4,
        num_dims: 2,
        vec_dim: 1,
        sides_per_cell: 4,
        nodes_per_side: 2,
    });
    let disc = quad_discretization(2, 1, 1, 2);

    let mut fm = FieldManager::<Residual>::default();
    fm.register_evaluator(GatherSolution::scalar(&["T"], &layouts.node_scalar).unwrap())
        .unwrap();
    scatter_into(&mut fm, &layouts, "T");
    fm.post_registration_setup().unwrap();

    let x = sample_solution(disc.num_dofs());
    let mut outputs = GlobalOutputs::new(disc.num_dofs());
    assert!(fm
        .evaluate(&disc, &EvaluationInputs::new(&x), &mut outputs, &SerialComm)
        .is_err());
    assert!(fm
        .evaluate_workset(&disc.worksets()[0], &EvaluationInputs::new(&x))
        .is_err());
    assert!(outputs.residual().iter().all(|&r| r == 0.0));
}

#[test]
fn solution_vectors_of_wrong_length_are_rejected() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let n = disc.num_dofs();
    let short = sample_solution(n - 1);

    let fm = coupled_exp_manager::<Residual>(&layouts);
    let mut outputs = GlobalOutputs::new(n);
    assert!(fm
        .evaluate(&disc, &EvaluationInputs::new(&short), &mut outputs, &SerialComm)
        .is_err());
    // A single workset only sees the gathered entries, which run past the end of `short`
    assert!(fm
        .evaluate_workset(&disc.worksets()[1], &EvaluationInputs::new(&short))
        .is_err());

    let x = sample_solution(n);
    let short_xdot = DVector::zeros(n - 1);
    let inputs = EvaluationInputs::new(&x).with_xdot(&short_xdot);
    assert!(fm.evaluate(&disc, &inputs, &mut outputs, &SerialComm).is_err());
    assert!(outputs.residual().iter().all(|&r| r == 0.0));

    let tangent_fm = coupled_exp_manager::<Tangent>(&layouts);
    let vx = DMatrix::repeat(n - 1, 2, 1.0);
    let inputs = EvaluationInputs::new(&x).with_tangent_directions::<&str>(Some(&vx), &[]);
    let mut outputs = GlobalOutputs::new(n).with_tangent(2);
    assert!(tangent_fm
        .evaluate(&disc, &inputs, &mut outputs, &SerialComm)
        .is_err());
    assert!(outputs.tangent().unwrap().iter().all(|&t| t == 0.0));
}

#[test]
fn failed_pass_leaves_outputs_unchanged() {
    let layouts = quad_layouts(3);
    let disc = quad_discretization(2, 2, 1, 3);
    let n = disc.num_dofs();
    let x = sample_solution(n);
    let inputs = EvaluationInputs::new(&x);

    // Cells couple all of their nodes, so a diagonal pattern misses most entries
    let diagonal = SparsityPattern::try_from_offsets_and_indices(n, n, (0..=n).collect(), (0..n).collect()).unwrap();
    let mut outputs = GlobalOutputs::new(n).with_jacobian(diagonal);
    coupled_exp_manager::<Residual>(&layouts)
        .evaluate(&disc, &inputs, &mut outputs, &SerialComm)
        .unwrap();
    let residual = outputs.residual().clone();
    assert!(residual.iter().any(|&r| r != 0.0));

    let result = coupled_exp_manager::<Jacobian>(&layouts).evaluate(&disc, &inputs, &mut outputs, &SerialComm);
    assert!(result.is_err());
    assert_matrix_eq!(outputs.residual().clone(), residual, comp = exact);
    assert!(outputs.jacobian().unwrap().values().iter().all(|&v| v == 0.0));
}

/// A single-process communicator that records the length of every reduction.
#[derive(Default)]
struct RecordingComm {
    lengths: Mutex<Vec<usize>>,
}

impl Communicator for RecordingComm {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn sum_all(&self, values: &mut [f64]) {
        self.lengths.lock().push(values.len());
    }
}

#[test]
fn ranks_without_cells_reduce_the_same_responses() {
    let layouts = single_qp_layouts();
    let fm = total_response_manager(&layouts);

    let disc = quad_discretization(2, 1, 1, 1)
        .with_cell_array("f", 1, &[3.0, 4.0])
        .unwrap()
        .with_cell_array("w", 1, &[1.0, 1.0])
        .unwrap();
    // Owns a node but no cells
    let empty = MeshDiscretization::new(2, &[0.0, 0.0], 4, &[], 1, 1).unwrap();
    assert!(empty.worksets().is_empty());

    let comm = RecordingComm::default();
    for disc in [&disc as &dyn Discretization, &empty] {
        let x = DVector::zeros(disc.num_dofs());
        let mut outputs = GlobalOutputs::new(disc.num_dofs());
        fm.evaluate(disc, &EvaluationInputs::new(&x), &mut outputs, &comm)
            .unwrap();
        assert!(outputs.response("Total").is_some());
    }
    assert_eq!(*comm.lengths.lock(), vec![1, 1]);
}
