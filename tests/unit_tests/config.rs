use crate::quad_discretization;
use fieldgraph::comm::SerialComm;
use fieldgraph::config::{EvaluatorConfig, ProblemConfig};
use fieldgraph::discretization::Discretization;
use fieldgraph::error::GraphError;
use fieldgraph::eval_type::{Jacobian, Residual};
use fieldgraph::global::GlobalOutputs;
use fieldgraph::inputs::EvaluationInputs;
use fieldgraph::params::ParameterLibrary;
use matrixcompare::assert_scalar_eq;
use nalgebra::DVector;
use serde_json::json;
use std::sync::Arc;
use util::unit_square_quad_mesh;

fn integral_problem() -> serde_json::Value {
    json!({
        "Layout Dimensions": {
            "Workset Size": 3,
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
            { "type": "Integral Response", "Response Name": "Total", "Field Name": "T" }
        ],
        "Required Fields": [
            { "Name": "Response Total", "Layout": "Dummy", "Scalar Type": "Real" }
        ]
    })
}

#[test]
fn integral_of_linear_function_from_json_problem() {
    let config = ProblemConfig::from_value(integral_problem()).unwrap();
    assert_eq!(config.evaluators.len(), 3);
    assert!(matches!(config.evaluators[0], EvaluatorConfig::GatherSolution { .. }));

    let mesh = unit_square_quad_mesh(2, 2);
    let disc = quad_discretization(2, 2, 1, 3);
    let x = DVector::from_fn(disc.num_dofs(), |i, _| {
        1.0 + 2.0 * mesh.vertices[2 * i] + 3.0 * mesh.vertices[2 * i + 1]
    });
    let inputs = EvaluationInputs::new(&x);
    let library = Arc::new(ParameterLibrary::new());

    let fm = config
        .build_field_manager::<Residual>(Arc::clone(&library), None)
        .unwrap();
    assert!(fm.is_finalized());
    let mut outputs = GlobalOutputs::new(disc.num_dofs());
    fm.evaluate(&disc, &inputs, &mut outputs, &SerialComm).unwrap();
    assert_scalar_eq!(outputs.response("Total").unwrap().value, 3.5, comp = abs, tol = 1e-12);

    // The gradient of the integral holds the integrals of the basis functions
    let fm = config
        .build_field_manager::<Jacobian>(library, None)
        .unwrap();
    let mut outputs = GlobalOutputs::new(disc.num_dofs());
    fm.evaluate(&disc, &inputs, &mut outputs, &SerialComm).unwrap();
    let response = outputs.response("Total").unwrap();
    assert_scalar_eq!(response.value, 3.5, comp = abs, tol = 1e-12);
    assert_eq!(response.gradient.len(), disc.num_dofs());
    let total: f64 = response.gradient.values().sum();
    assert_scalar_eq!(total, 1.0, comp = abs, tol = 1e-12);
    // The center node is shared by all four cells
    assert_scalar_eq!(response.gradient[&4], 0.25, comp = abs, tol = 1e-12);
    assert_scalar_eq!(response.gradient[&0], 0.0625, comp = abs, tol = 1e-12);
}

#[test]
fn shared_parameter_nominal_value_comes_from_parameter_list() {
    let config = ProblemConfig::from_value(json!({
        "Layout Dimensions": { "Workset Size": 1, "Nodes Per Cell": 4 },
        "Parameters": {
            "Number Of Parameters": 1,
            "Parameter 0": { "Type": "Scalar", "Name": "kappa", "Nominal Value": 0.25 }
        },
        "Evaluators": [
            { "type": "Shared Parameter", "Parameter Name": "kappa", "Default Value": 1.0 },
            { "type": "Shared Parameter", "Parameter Name": "lambda", "Default Value": 3.0 }
        ],
        "Required Fields": [
            { "Name": "kappa", "Layout": "Shared Param", "Scalar Type": "ParamScalar" },
            { "Name": "lambda", "Layout": "Shared Param", "Scalar Type": "ParamScalar" }
        ]
    }))
    .unwrap();

    let library = Arc::new(ParameterLibrary::new());
    let fm = config
        .build_field_manager::<Residual>(Arc::clone(&library), None)
        .unwrap();
    assert_eq!(fm.num_evaluators(), 2);
    assert_eq!(library.value("kappa"), Some(0.25));
    assert_eq!(library.value("lambda"), Some(3.0));
}

fn unary_problem(operation: serde_json::Value) -> serde_json::Value {
    json!({
        "Layout Dimensions": { "Workset Size": 1, "Nodes Per Cell": 4 },
        "Evaluators": [
            { "type": "Gather Solution", "Solution Names": ["T"] },
            operation
        ],
        "Required Fields": [ { "Name": "U", "Layout": "Node Scalar" } ]
    })
}

#[test]
fn unary_operation_parameters() {
    let scale = unary_problem(json!({
        "type": "Simple Unary Operation",
        "Operation": "Scale",
        "Scaling Factor": 3.0,
        "Input Field Name": "T",
        "Output Field Name": "U",
        "Field Layout": "Node Scalar"
    }));
    let config = ProblemConfig::from_value(scale).unwrap();
    let fm = config
        .build_field_manager::<Residual>(Arc::new(ParameterLibrary::new()), None)
        .unwrap();
    assert_eq!(
        fm.ordered_evaluator_names().unwrap(),
        vec!["Gather Solution T", "Simple Unary Scale: T -> U"]
    );

    let missing_factor = unary_problem(json!({
        "type": "Simple Unary Operation",
        "Operation": "Scale",
        "Input Field Name": "T",
        "Output Field Name": "U",
        "Field Layout": "Node Scalar"
    }));
    let config = ProblemConfig::from_value(missing_factor).unwrap();
    let err = config
        .build_field_manager::<Residual>(Arc::new(ParameterLibrary::new()), None)
        .err()
        .unwrap();
    match err {
        GraphError::InvalidConfiguration { message, .. } => assert!(message.contains("Scaling Factor")),
        other => panic!("Unexpected error: {}", other),
    }

    let unknown_op = unary_problem(json!({
        "type": "Simple Unary Operation",
        "Operation": "Square",
        "Input Field Name": "T",
        "Output Field Name": "U",
        "Field Layout": "Node Scalar"
    }));
    let config = ProblemConfig::from_value(unknown_op).unwrap();
    assert!(matches!(
        config.build_field_manager::<Residual>(Arc::new(ParameterLibrary::new()), None),
        Err(GraphError::InvalidConfiguration { .. })
    ));
}

#[test]
fn unknown_layout_names_are_rejected() {
    let problem = unary_problem(json!({
        "type": "Simple Unary Operation",
        "Operation": "Exp",
        "Input Field Name": "T",
        "Output Field Name": "U",
        "Field Layout": "Node Hyper Scalar"
    }));
    let config = ProblemConfig::from_value(problem).unwrap();
    let err = config
        .build_field_manager::<Residual>(Arc::new(ParameterLibrary::new()), None)
        .err()
        .unwrap();
    assert!(matches!(err, GraphError::InvalidConfiguration { .. }));
    assert!(err.to_string().contains("Node Hyper Scalar"));
}

#[test]
fn unknown_evaluator_types_are_rejected() {
    let text = r#"{
        "Layout Dimensions": { "Workset Size": 1, "Nodes Per Cell": 4 },
        "Evaluators": [ { "type": "Flux Capacitor" } ]
    }"#;
    assert!(matches!(
        ProblemConfig::from_json(text),
        Err(GraphError::InvalidConfiguration { .. })
    ));
}

#[test]
fn missing_providers_surface_from_the_build() {
    let problem = unary_problem(json!({
        "type": "Simple Unary Operation",
        "Operation": "Exp",
        "Input Field Name": "V",
        "Output Field Name": "U",
        "Field Layout": "Node Scalar"
    }));
    let config = ProblemConfig::from_value(problem).unwrap();
    assert!(matches!(
        config.build_field_manager::<Residual>(Arc::new(ParameterLibrary::new()), None),
        Err(GraphError::MissingProvider { .. })
    ));
}
