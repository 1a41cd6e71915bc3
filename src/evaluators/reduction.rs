use super::{bind_output, bind_promotable, OperandBuffers};
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::FieldScalarType;
use crate::layout::{DataLayout, DimTag};
use crate::mdfield::AnyField;
use fieldgraph_traits::FieldScalar;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionKind {
    Sum,
    Mean,
}

/// Reduces a [Cell, X, ...] field over its second dimension into a [Cell, ...] field.
#[derive(Debug, Clone)]
pub struct CellReduction {
    name: String,
    kind: ReductionKind,
    input: AnyField,
    output: AnyField,
}

impl CellReduction {
    pub fn new(
        input: &str,
        output: &str,
        input_layout: &Arc<DataLayout>,
        output_layout: &Arc<DataLayout>,
        class: FieldScalarType,
        kind: ReductionKind,
    ) -> Result<Self, GraphError> {
        input_layout.expect_leading_dims(input, &[DimTag::Cell])?;
        output_layout.expect_leading_dims(output, &[DimTag::Cell])?;
        let consistent = input_layout.rank() >= 2
            && input_layout.extent(0) == output_layout.extent(0)
            && input_layout.extents()[2..] == output_layout.extents()[1..];
        if !consistent {
            return Err(GraphError::LayoutMismatch {
                field: output.to_string(),
                expected: format!("{} without its second dimension", input_layout),
                found: output_layout.to_string(),
            });
        }
        Ok(Self {
            name: format!("Cell {:?} {} -> {}", kind, input, output),
            kind,
            input: AnyField::new(input, input_layout, class),
            output: AnyField::new(output, output_layout, class),
        })
    }

    pub fn output(&self) -> &AnyField {
        &self.output
    }

    fn reduce<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let num_cells = data.num_cells();
        let layout = self.input.layout();
        let num_reduced = layout.extent(1);
        let num_components = layout.trailing_size(2);

        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields
            .read_promoted::<E, S>(&self.input, layout.active_size(num_cells), &mut buffers.first)?;
        let values = &buffers.first;
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        let out = out.as_mut_slice();

        for cell in 0..num_cells {
            for k in 0..num_components {
                let mut sum = S::from(0.0);
                for i in 0..num_reduced {
                    sum += values[(cell * num_reduced + i) * num_components + k].clone();
                }
                if self.kind == ReductionKind::Mean && num_reduced > 0 {
                    sum /= S::from(num_reduced as f64);
                }
                out[cell * num_components + k] = sum;
            }
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for CellReduction {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.input);
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.output)?;
        bind_promotable(setup, &mut self.input, self.output.scalar_type())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.reduce(data))
    }
}
