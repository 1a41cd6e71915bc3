use super::{bind_promotable, OperandBuffers};
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::{FieldScalarType, FieldTag};
use crate::layout::{DataLayout, DimTag};
use crate::mdfield::AnyField;
use eyre::eyre;
use std::sync::Arc;

/// Adds nodal residual fields to the global residual, and their derivatives to the global
/// derivative output of the pass.
///
/// The evaluator produces no data. It evaluates a dummy field named `"Scatter <name>"`, which
/// must be required for the scatter to run.
#[derive(Debug, Clone)]
pub struct ScatterResidual {
    name: String,
    residuals: Vec<AnyField>,
    vector: bool,
    offset: usize,
    scatter_tag: FieldTag,
}

impl ScatterResidual {
    /// Scatters one [Cell, Node] residual field per equation.
    pub fn scalar(name: &str, residuals: &[&str], layout: &Arc<DataLayout>, dummy: &Arc<DataLayout>) -> Result<Self, GraphError> {
        if residuals.is_empty() {
            return Err(GraphError::invalid_configuration("Scatter Residual", "no residual field names given"));
        }
        for residual in residuals {
            layout.expect_dims(residual, &[DimTag::Cell, DimTag::Node])?;
        }
        Ok(Self::with_fields(name, residuals, layout, dummy, false))
    }

    /// Scatters a single [Cell, Node, VecDim] residual field.
    pub fn vector(name: &str, residual: &str, layout: &Arc<DataLayout>, dummy: &Arc<DataLayout>) -> Result<Self, GraphError> {
        layout.expect_dims(residual, &[DimTag::Cell, DimTag::Node, DimTag::VecDim])?;
        Ok(Self::with_fields(name, &[residual], layout, dummy, true))
    }

    fn with_fields(name: &str, residuals: &[&str], layout: &Arc<DataLayout>, dummy: &Arc<DataLayout>, vector: bool) -> Self {
        Self {
            name: format!("Scatter {}", name),
            residuals: residuals
                .iter()
                .map(|r| AnyField::new(r, layout, FieldScalarType::Scalar))
                .collect(),
            vector,
            offset: 0,
            scatter_tag: FieldTag::new(format!("Scatter {}", name), dummy, FieldScalarType::Real),
        }
    }

    /// Scatters into equations starting at `offset`.
    pub fn with_offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }

    /// The dummy field to require in order to run the scatter.
    pub fn scatter_tag(&self) -> &FieldTag {
        &self.scatter_tag
    }

    fn num_components(&self) -> usize {
        if self.vector {
            self.residuals[0].layout().extent(2)
        } else {
            self.residuals.len()
        }
    }

    fn scatter<E: EvaluationType>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let workset = data.workset;
        let num_eq = workset.num_eq();
        let num_components = self.num_components();
        if self.offset + num_components > num_eq {
            return Err(eyre!(
                "Cannot scatter {} equations at offset {} with {} equations per node",
                num_components,
                self.offset,
                num_eq
            ));
        }
        let num_cells = workset.num_cells();
        let nodes_per_cell = workset.nodes_per_cell();
        let buffers = data.scratch.get_or_default::<OperandBuffers<E::ScalarT>>();

        for (k, residual) in self.residuals.iter().enumerate() {
            let len = residual.layout().active_size(num_cells);
            data.fields
                .read_promoted::<E, E::ScalarT>(residual, len, &mut buffers.first)?;
            let values = &buffers.first;
            for cell in 0..num_cells {
                let columns = workset.columns(cell);
                for node in 0..nodes_per_cell {
                    if self.vector {
                        for eq in 0..num_components {
                            let value = &values[(cell * nodes_per_cell + node) * num_components + eq];
                            let row = columns.dofs[node * num_eq + self.offset + eq];
                            data.contributions.scatter::<E, _>(row, value, &columns)?;
                        }
                    } else {
                        let value = &values[cell * nodes_per_cell + node];
                        let row = columns.dofs[node * num_eq + self.offset + k];
                        data.contributions.scatter::<E, _>(row, value, &columns)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for ScatterResidual {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        for residual in &self.residuals {
            fields.depends_on(residual);
        }
        fields.evaluates(&self.scatter_tag);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        for residual in &mut self.residuals {
            bind_promotable(setup, residual, FieldScalarType::Scalar)?;
        }
        Ok(())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        self.scatter::<E>(data)
    }
}
