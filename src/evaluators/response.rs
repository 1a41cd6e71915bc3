use super::{bind_promotable, OperandBuffers};
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::{FieldScalarType, FieldTag};
use crate::layout::{DataLayout, DimTag};
use crate::mdfield::AnyField;
use fieldgraph_traits::FieldScalar;
use std::sync::Arc;

/// Integrates a quadrature point field into a named scalar response:
///
/// ```text
/// g = sum_c sum_q scaling * f(c, q) * w(c, q)
/// ```
///
/// Derivatives of the integrand are added to the response gradient with the same column mapping
/// as [`ScatterResidual`](super::ScatterResidual). The evaluator evaluates a dummy field named
/// `"Response <name>"`.
#[derive(Debug, Clone)]
pub struct IntegralResponse {
    name: String,
    response: String,
    scaling: f64,
    field: AnyField,
    weights: AnyField,
    response_tag: FieldTag,
}

impl IntegralResponse {
    pub fn new(
        response: &str,
        field: &str,
        weights: &str,
        qp_layout: &Arc<DataLayout>,
        dummy: &Arc<DataLayout>,
        class: FieldScalarType,
        scaling: f64,
    ) -> Result<Self, GraphError> {
        qp_layout.expect_dims(field, &[DimTag::Cell, DimTag::QuadPoint])?;
        Ok(Self {
            name: format!("Integral Response {}", response),
            response: response.to_string(),
            scaling,
            field: AnyField::new(field, qp_layout, class),
            weights: AnyField::new(weights, qp_layout, FieldScalarType::MeshScalar),
            response_tag: FieldTag::new(format!("Response {}", response), dummy, FieldScalarType::Real),
        })
    }

    pub fn response_tag(&self) -> &FieldTag {
        &self.response_tag
    }

    fn integrate<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let workset = data.workset;
        let num_cells = workset.num_cells();
        let num_qps = self.field.layout().extent(1);
        let len = self.field.layout().active_size(num_cells);

        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields.read_promoted::<E, S>(&self.field, len, &mut buffers.first)?;
        data.fields.read_promoted::<E, S>(&self.weights, len, &mut buffers.second)?;

        data.contributions.touch_response(&self.response);
        for cell in 0..num_cells {
            let mut integral = S::from(0.0);
            for q in 0..num_qps {
                let i = cell * num_qps + q;
                integral += buffers.first[i].clone() * buffers.second[i].clone();
            }
            integral *= self.scaling;
            data.contributions
                .scatter_response::<E, S>(&self.response, &integral, &workset.columns(cell))?;
        }
        Ok(())
    }

    fn class(&self) -> FieldScalarType {
        self.field.scalar_type() | self.weights.scalar_type()
    }
}

impl<E: EvaluationType> Evaluator<E> for IntegralResponse {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.field);
        fields.depends_on(&self.weights);
        fields.evaluates(&self.response_tag);
        fields.contributes_to_response(&self.response);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_promotable(setup, &mut self.field, FieldScalarType::Scalar)?;
        bind_promotable(setup, &mut self.weights, FieldScalarType::Scalar)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.class(), E, self.integrate(data))
    }
}
