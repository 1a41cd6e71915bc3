//! Scalar response functions evaluated on top of field managers and the parameter library.
use crate::comm::Communicator;
use crate::discretization::Discretization;
use crate::error::GraphError;
use crate::eval_type::{Jacobian, Residual};
use crate::global::GlobalOutputs;
use crate::inputs::EvaluationInputs;
use crate::manager::FieldManager;
use crate::params::ParameterLibrary;
use eyre::eyre;
use nalgebra::DVector;
use std::sync::Arc;

/// Derivatives of a scalar response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseGradient {
    pub value: f64,
    /// Gradient w.r.t. the solution.
    pub dg_dx: DVector<f64>,
    /// Gradient w.r.t. the scalar parameters of the response, in the order of
    /// [`ScalarResponse::parameter_names`].
    pub dg_dp: Vec<f64>,
}

pub trait ScalarResponse {
    fn name(&self) -> &str;

    /// The scalar parameters the response depends on directly.
    fn parameter_names(&self) -> &[String] {
        &[]
    }

    fn evaluate_response(
        &self,
        disc: &dyn Discretization,
        inputs: &EvaluationInputs,
        comm: &dyn Communicator,
    ) -> eyre::Result<f64>;

    fn evaluate_gradient(
        &self,
        disc: &dyn Discretization,
        inputs: &EvaluationInputs,
        comm: &dyn Communicator,
    ) -> eyre::Result<ResponseGradient>;
}

/// Penalizes the distance of scalar parameters from reference values:
/// `g = coeff / 2 * sum_i (p_i - ref_i)^2`.
#[derive(Debug, Clone)]
pub struct TikhonovRegularization {
    coefficient: f64,
    parameters: Vec<String>,
    reference: Vec<f64>,
    library: Arc<ParameterLibrary>,
}

impl TikhonovRegularization {
    pub fn new(
        library: Arc<ParameterLibrary>,
        coefficient: f64,
        parameters: Vec<String>,
        reference: Vec<f64>,
    ) -> Result<Self, GraphError> {
        if parameters.len() != reference.len() {
            return Err(GraphError::invalid_configuration(
                "Tikhonov Regularization",
                format!(
                    "{} parameters but {} reference values",
                    parameters.len(),
                    reference.len()
                ),
            ));
        }
        Ok(Self {
            coefficient,
            parameters,
            reference,
            library,
        })
    }

    fn deviations(&self) -> eyre::Result<Vec<f64>> {
        self.parameters
            .iter()
            .zip(&self.reference)
            .map(|(name, r)| {
                self.library
                    .value(name)
                    .map(|p| p - r)
                    .ok_or_else(|| eyre!("Unknown parameter '{}'", name))
            })
            .collect()
    }

    pub fn value(&self) -> eyre::Result<f64> {
        let sum: f64 = self.deviations()?.iter().map(|d| d * d).sum();
        Ok(0.5 * self.coefficient * sum)
    }

    /// `dg/dp_i = coeff * (p_i - ref_i)`.
    pub fn parameter_gradient(&self) -> eyre::Result<Vec<f64>> {
        Ok(self
            .deviations()?
            .into_iter()
            .map(|d| self.coefficient * d)
            .collect())
    }
}

impl ScalarResponse for TikhonovRegularization {
    fn name(&self) -> &str {
        "Tikhonov Regularization"
    }

    fn parameter_names(&self) -> &[String] {
        &self.parameters
    }

    fn evaluate_response(&self, _: &dyn Discretization, _: &EvaluationInputs, _: &dyn Communicator) -> eyre::Result<f64> {
        self.value()
    }

    fn evaluate_gradient(
        &self,
        disc: &dyn Discretization,
        _: &EvaluationInputs,
        _: &dyn Communicator,
    ) -> eyre::Result<ResponseGradient> {
        Ok(ResponseGradient {
            value: self.value()?,
            dg_dx: DVector::zeros(disc.num_dofs()),
            dg_dp: self.parameter_gradient()?,
        })
    }
}

/// A response computed by response evaluators in a pair of field managers.
///
/// The Residual manager provides the value and the Jacobian manager the gradient w.r.t. the
/// solution. Both must require the response field of the evaluator producing `name`.
pub struct FieldResponse {
    name: String,
    residual: FieldManager<Residual>,
    jacobian: FieldManager<Jacobian>,
}

impl FieldResponse {
    pub fn new(name: &str, residual: FieldManager<Residual>, jacobian: FieldManager<Jacobian>) -> Result<Self, GraphError> {
        if !residual.is_finalized() || !jacobian.is_finalized() {
            return Err(GraphError::NotFinalized {
                operation: format!("create field response '{}'", name),
            });
        }
        Ok(Self {
            name: name.to_string(),
            residual,
            jacobian,
        })
    }
}

impl ScalarResponse for FieldResponse {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate_response(
        &self,
        disc: &dyn Discretization,
        inputs: &EvaluationInputs,
        comm: &dyn Communicator,
    ) -> eyre::Result<f64> {
        let mut outputs = GlobalOutputs::new(disc.num_dofs());
        self.residual.evaluate(disc, inputs, &mut outputs, comm)?;
        outputs
            .response(&self.name)
            .map(|r| r.value)
            .ok_or_else(|| eyre!("No evaluator contributed to response '{}'", self.name))
    }

    fn evaluate_gradient(
        &self,
        disc: &dyn Discretization,
        inputs: &EvaluationInputs,
        comm: &dyn Communicator,
    ) -> eyre::Result<ResponseGradient> {
        let inputs = inputs.clone().with_coefficients(0.0, 1.0, 0.0);
        let mut outputs = GlobalOutputs::new(disc.num_dofs());
        self.jacobian.evaluate(disc, &inputs, &mut outputs, comm)?;
        let response = outputs
            .response(&self.name)
            .ok_or_else(|| eyre!("No evaluator contributed to response '{}'", self.name))?;

        let mut dg_dx = DVector::zeros(disc.num_dofs());
        for (&col, &d) in &response.gradient {
            let entry = dg_dx
                .get_mut(col)
                .ok_or_else(|| eyre!("Gradient column {} out of bounds for {} dofs", col, disc.num_dofs()))?;
            *entry += d;
        }
        Ok(ResponseGradient {
            value: response.value,
            dg_dx,
            dg_dp: Vec::new(),
        })
    }
}
