use crate::quad_discretization;
use fieldgraph::comm::SerialComm;
use fieldgraph::config::ProblemConfig;
use fieldgraph::discretization::Discretization;
use fieldgraph::error::GraphError;
use fieldgraph::eval_type::{Jacobian, Residual};
use fieldgraph::inputs::EvaluationInputs;
use fieldgraph::manager::FieldManager;
use fieldgraph::params::ParameterLibrary;
use fieldgraph::responses::{FieldResponse, ScalarResponse, TikhonovRegularization};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use serde_json::json;
use std::sync::Arc;
use util::approximate_jacobian_fd;

#[test]
fn tikhonov_value_and_gradient() {
    let library = Arc::new(ParameterLibrary::new());
    library.add("a", 3.0);
    library.add("b", -1.0);
    let response = TikhonovRegularization::new(
        Arc::clone(&library),
        2.0,
        vec!["a".to_string(), "b".to_string()],
        vec![1.0, 1.0],
    )
    .unwrap();
    assert_eq!(response.parameter_names(), &["a".to_string(), "b".to_string()]);

    // 2 / 2 * (2^2 + (-2)^2)
    assert_scalar_eq!(response.value().unwrap(), 8.0, comp = float);
    assert_eq!(response.parameter_gradient().unwrap(), vec![4.0, -4.0]);

    let disc = quad_discretization(1, 1, 1, 1);
    let x = DVector::zeros(disc.num_dofs());
    let gradient = response
        .evaluate_gradient(&disc, &EvaluationInputs::new(&x), &SerialComm)
        .unwrap();
    assert_eq!(gradient.dg_dx, DVector::zeros(4));
    assert_eq!(gradient.dg_dp, vec![4.0, -4.0]);

    library.set_value("a", 1.0).unwrap();
    assert_scalar_eq!(response.value().unwrap(), 4.0, comp = float);
}

#[test]
fn tikhonov_rejects_mismatched_reference_values() {
    let library = Arc::new(ParameterLibrary::new());
    let result = TikhonovRegularization::new(library, 1.0, vec!["a".to_string()], vec![0.0, 1.0]);
    assert!(matches!(result, Err(GraphError::InvalidConfiguration { .. })));
}

#[test]
fn tikhonov_with_unknown_parameter_fails_to_evaluate() {
    let library = Arc::new(ParameterLibrary::new());
    let response = TikhonovRegularization::new(library, 1.0, vec!["a".to_string()], vec![0.0]).unwrap();
    assert!(response.value().is_err());
}

fn exponential_integral_problem() -> ProblemConfig {
    ProblemConfig::from_value(json!({
        "Layout Dimensions": {
            "Workset Size": 2,
            "Nodes Per Cell": 4,
            "Quad Points Per Cell": 4,
            "Spatial Dimension": 2
        },
        "External Fields": [
            { "Name": "BF", "Layout": "Node QP Scalar", "Scalar Type": "Real", "Source": { "Workset Array": "BF" } },
            { "Name": "Weights", "Layout": "QP Scalar", "Scalar Type": "Real", "Source": { "Workset Array": "Weights" } }
        ],
        "Evaluators": [
            { "type": "Gather Solution", "Solution Names": ["T"] },
            { "type": "DOF Interpolation", "Variable Name": "T" },
            {
                "type": "Simple Unary Operation",
                "Operation": "Exp",
                "Tau": 0.5,
                "Input Field Name": "T",
                "Output Field Name": "Exp T",
                "Field Layout": "QP Scalar"
            },
            { "type": "Integral Response", "Response Name": "Energy", "Field Name": "Exp T", "Scaling": 2.0 }
        ],
        "Required Fields": [
            { "Name": "Response Energy", "Layout": "Dummy", "Scalar Type": "Real" }
        ]
    }))
    .unwrap()
}

fn energy_response() -> FieldResponse {
    let config = exponential_integral_problem();
    let library = Arc::new(ParameterLibrary::new());
    let residual = config
        .build_field_manager::<Residual>(Arc::clone(&library), None)
        .unwrap();
    let jacobian = config.build_field_manager::<Jacobian>(library, None).unwrap();
    FieldResponse::new("Energy", residual, jacobian).unwrap()
}

#[test]
fn field_response_of_constant_solution() {
    let response = energy_response();
    assert_eq!(response.name(), "Energy");
    let disc = quad_discretization(2, 3, 1, 2);
    let x = DVector::repeat(disc.num_dofs(), 2.0);
    let value = response
        .evaluate_response(&disc, &EvaluationInputs::new(&x), &SerialComm)
        .unwrap();
    // 2 * exp(0.5 * 2) over the unit square
    assert_scalar_eq!(value, 2.0 * f64::exp(1.0), comp = abs, tol = 1e-12);
}

#[test]
fn field_response_gradient_matches_finite_differences() {
    let response = energy_response();
    let disc = quad_discretization(2, 3, 1, 2);
    let mut x = DVector::from_fn(disc.num_dofs(), |i, _| 0.1 * i as f64 - 0.4);

    let gradient = response
        .evaluate_gradient(&disc, &EvaluationInputs::new(&x), &SerialComm)
        .unwrap();
    let value = response
        .evaluate_response(&disc, &EvaluationInputs::new(&x), &SerialComm)
        .unwrap();
    assert_scalar_eq!(gradient.value, value, comp = abs, tol = 1e-12);
    assert!(gradient.dg_dp.is_empty());

    let fd = approximate_jacobian_fd(
        1,
        |x, g| {
            g[0] = response
                .evaluate_response(&disc, &EvaluationInputs::new(x), &SerialComm)
                .unwrap();
        },
        &mut x,
        1e-6,
    );
    let dg_dx = DMatrix::from_row_slice(1, disc.num_dofs(), gradient.dg_dx.as_slice());
    assert_matrix_eq!(dg_dx, fd, comp = abs, tol = 1e-7);
}

#[test]
fn field_response_requires_finalized_managers() {
    let config = exponential_integral_problem();
    let library = Arc::new(ParameterLibrary::new());
    let residual = config
        .build_field_manager::<Residual>(Arc::clone(&library), None)
        .unwrap();
    let jacobian = FieldManager::<Jacobian>::new(library);
    assert!(matches!(
        FieldResponse::new("Energy", residual, jacobian),
        Err(GraphError::NotFinalized { .. })
    ));
}
