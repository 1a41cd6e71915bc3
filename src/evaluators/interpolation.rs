use super::{bind_output, bind_promotable, OperandBuffers};
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::FieldScalarType;
use crate::layout::{DataLayout, DimTag};
use crate::mdfield::AnyField;
use fieldgraph_traits::FieldScalar;
use std::sync::Arc;

fn expect_extent(field: &str, layout: &DataLayout, dim: usize, expected: usize) -> Result<(), GraphError> {
    if layout.extent(dim) != expected {
        return Err(GraphError::LayoutMismatch {
            field: field.to_string(),
            expected: format!("extent {} in dimension {}", expected, dim),
            found: layout.to_string(),
        });
    }
    Ok(())
}

/// Interpolates nodal values to quadrature points with precomputed basis function values:
///
/// ```text
/// out(c, q, k) = sum_n in(c, n, k) * BF(c, n, q)
/// ```
///
/// The input has layout [Cell, Node, ...] and the output [Cell, QuadPoint, ...] with matching
/// trailing dimensions, so scalar, vector and tensor fields are handled alike. The basis field has
/// layout [Cell, Node, QuadPoint] and scalar class `Real`.
#[derive(Debug, Clone)]
pub struct DofInterpolation {
    name: String,
    input: AnyField,
    basis: AnyField,
    output: AnyField,
}

impl DofInterpolation {
    pub fn new(
        input: &str,
        output: &str,
        basis: &str,
        node_layout: &Arc<DataLayout>,
        qp_layout: &Arc<DataLayout>,
        basis_layout: &Arc<DataLayout>,
        class: FieldScalarType,
    ) -> Result<Self, GraphError> {
        node_layout.expect_leading_dims(input, &[DimTag::Cell, DimTag::Node])?;
        qp_layout.expect_leading_dims(output, &[DimTag::Cell, DimTag::QuadPoint])?;
        basis_layout.expect_dims(basis, &[DimTag::Cell, DimTag::Node, DimTag::QuadPoint])?;
        if node_layout.extents()[2..] != qp_layout.extents()[2..] {
            return Err(GraphError::LayoutMismatch {
                field: output.to_string(),
                expected: format!("trailing extents of {}", node_layout),
                found: qp_layout.to_string(),
            });
        }
        expect_extent(basis, basis_layout, 1, node_layout.extent(1))?;
        expect_extent(basis, basis_layout, 2, qp_layout.extent(1))?;

        Ok(Self {
            name: format!("DOF Interpolation {} -> {}", input, output),
            input: AnyField::new(input, node_layout, class),
            basis: AnyField::new(basis, basis_layout, FieldScalarType::Real),
            output: AnyField::new(output, qp_layout, class),
        })
    }

    pub fn output(&self) -> &AnyField {
        &self.output
    }

    fn interpolate<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let num_cells = data.num_cells();
        let node_layout = self.input.layout();
        let num_nodes = node_layout.extent(1);
        let num_qps = self.output.layout().extent(1);
        let num_components = node_layout.trailing_size(2);

        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields
            .read_promoted::<E, S>(&self.input, node_layout.active_size(num_cells), &mut buffers.first)?;
        let values = &buffers.first;
        let basis = data.fields.view_any::<f64>(&self.basis)?;
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        let out = out.as_mut_slice();

        for cell in 0..num_cells {
            for q in 0..num_qps {
                for k in 0..num_components {
                    let mut sum = S::from(0.0);
                    for n in 0..num_nodes {
                        let v = values[(cell * num_nodes + n) * num_components + k].clone();
                        sum += v * basis[(cell, n, q)];
                    }
                    out[(cell * num_qps + q) * num_components + k] = sum;
                }
            }
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for DofInterpolation {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.input);
        fields.depends_on(&self.basis);
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.output)?;
        bind_promotable(setup, &mut self.input, self.output.scalar_type())?;
        bind_promotable(setup, &mut self.basis, FieldScalarType::Real)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.interpolate(data))
    }
}

/// How [`P0Interpolation`] reduces a field to one value per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum P0Kind {
    /// Quadrature-weighted average of a [Cell, QuadPoint, ...] field.
    CellAverage,
    /// Value at the cell barycenter of a [Cell, Node, ...] field with a linear basis, i.e. the
    /// mean of the nodal values.
    ValueAtCellBarycenter,
}

/// Projects a field onto piecewise constants, producing a [Cell, ...] field.
#[derive(Debug, Clone)]
pub struct P0Interpolation {
    name: String,
    kind: P0Kind,
    input: AnyField,
    weights: Option<AnyField>,
    output: AnyField,
}

impl P0Interpolation {
    /// Averages a quadrature point field with the measure weights field `weights` of layout
    /// [Cell, QuadPoint] and class `MeshScalar`.
    pub fn cell_average(
        input: &str,
        output: &str,
        weights: &str,
        qp_layout: &Arc<DataLayout>,
        weights_layout: &Arc<DataLayout>,
        cell_layout: &Arc<DataLayout>,
        class: FieldScalarType,
    ) -> Result<Self, GraphError> {
        qp_layout.expect_leading_dims(input, &[DimTag::Cell, DimTag::QuadPoint])?;
        weights_layout.expect_dims(weights, &[DimTag::Cell, DimTag::QuadPoint])?;
        expect_extent(weights, weights_layout, 1, qp_layout.extent(1))?;
        Self::check_output(output, qp_layout, cell_layout)?;
        Ok(Self {
            name: format!("P0 Interpolation {} -> {}", input, output),
            kind: P0Kind::CellAverage,
            input: AnyField::new(input, qp_layout, class),
            weights: Some(AnyField::new(weights, weights_layout, FieldScalarType::MeshScalar)),
            output: AnyField::new(output, cell_layout, class | FieldScalarType::MeshScalar),
        })
    }

    pub fn barycenter_value(
        input: &str,
        output: &str,
        node_layout: &Arc<DataLayout>,
        cell_layout: &Arc<DataLayout>,
        class: FieldScalarType,
    ) -> Result<Self, GraphError> {
        node_layout.expect_leading_dims(input, &[DimTag::Cell, DimTag::Node])?;
        Self::check_output(output, node_layout, cell_layout)?;
        Ok(Self {
            name: format!("P0 Interpolation {} -> {}", input, output),
            kind: P0Kind::ValueAtCellBarycenter,
            input: AnyField::new(input, node_layout, class),
            weights: None,
            output: AnyField::new(output, cell_layout, class),
        })
    }

    fn check_output(output: &str, input_layout: &DataLayout, cell_layout: &DataLayout) -> Result<(), GraphError> {
        cell_layout.expect_leading_dims(output, &[DimTag::Cell])?;
        if input_layout.extents()[2..] != cell_layout.extents()[1..] {
            return Err(GraphError::LayoutMismatch {
                field: output.to_string(),
                expected: format!("trailing extents of {}", input_layout),
                found: cell_layout.to_string(),
            });
        }
        Ok(())
    }

    pub fn kind(&self) -> P0Kind {
        self.kind
    }

    pub fn output(&self) -> &AnyField {
        &self.output
    }

    fn project<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let num_cells = data.num_cells();
        let layout = self.input.layout();
        let num_points = layout.extent(1);
        let num_components = layout.trailing_size(2);

        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields
            .read_promoted::<E, S>(&self.input, layout.active_size(num_cells), &mut buffers.first)?;
        match &self.weights {
            Some(weights) => {
                let len = weights.layout().active_size(num_cells);
                data.fields.read_promoted::<E, S>(weights, len, &mut buffers.second)?;
            }
            None => {
                buffers.second.clear();
                buffers
                    .second
                    .resize(num_cells * num_points, S::from(1.0));
            }
        }
        let (values, weights) = (&buffers.first, &buffers.second);
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        let out = out.as_mut_slice();

        for cell in 0..num_cells {
            let cell_weights = &weights[cell * num_points..(cell + 1) * num_points];
            let mut measure = S::from(0.0);
            for w in cell_weights {
                measure += w.clone();
            }
            for k in 0..num_components {
                let mut sum = S::from(0.0);
                for (p, w) in cell_weights.iter().enumerate() {
                    sum += values[(cell * num_points + p) * num_components + k].clone() * w.clone();
                }
                out[cell * num_components + k] = sum / measure.clone();
            }
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for P0Interpolation {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.input);
        if let Some(weights) = &self.weights {
            fields.depends_on(weights);
        }
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.output)?;
        let class = self.output.scalar_type();
        bind_promotable(setup, &mut self.input, class)?;
        if let Some(weights) = &mut self.weights {
            bind_promotable(setup, weights, class)?;
        }
        Ok(())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.project(data))
    }
}
